//! Instrument CSV import.
//!
//! Accepts a header line with at least a symbol column (`symbol` or
//! `ticker`, case-insensitive) and optional `name`, `type` and `weight`
//! columns. Both `,` and `;` delimiters are supported, and weights may use
//! `,` as the decimal separator. Bad rows are collected as errors instead
//! of failing the whole import.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::models::InstrumentType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedInstrument {
    pub symbol: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub instrument_type: Option<InstrumentType>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    /// 1-based line number in the source file
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub instruments: Vec<ParsedInstrument>,
    pub errors: Vec<ImportRowError>,
}

struct ColumnMap {
    symbol: usize,
    name: Option<usize>,
    instrument_type: Option<usize>,
    weight: Option<usize>,
}

/// Parse an instrument list from CSV content.
pub fn parse_instruments_csv(content: &str) -> Result<ImportResult> {
    let mut lines = content.lines().enumerate();

    let (_, header) = lines
        .by_ref()
        .find(|(_, line)| !line.trim().is_empty())
        .ok_or_else(|| anyhow!("CSV file is empty"))?;

    let delimiter = detect_delimiter(header);
    let columns = map_columns(header, delimiter)?;

    let mut instruments = Vec::new();
    let mut errors = Vec::new();

    for (idx, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 1;
        let fields = split_fields(line, delimiter);

        match parse_row(&fields, &columns) {
            Ok(instrument) => instruments.push(instrument),
            Err(message) => errors.push(ImportRowError { line: line_no, message }),
        }
    }

    Ok(ImportResult { instruments, errors })
}

/// Pick the delimiter that splits the header into more fields.
fn detect_delimiter(header: &str) -> char {
    let semicolons = header.matches(';').count();
    let commas = header.matches(',').count();
    if semicolons > commas {
        ';'
    } else {
        ','
    }
}

fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter)
        .map(|f| f.trim().trim_matches('"').trim().to_string())
        .collect()
}

fn map_columns(header: &str, delimiter: char) -> Result<ColumnMap> {
    let fields = split_fields(header, delimiter);

    let mut symbol = None;
    let mut name = None;
    let mut instrument_type = None;
    let mut weight = None;

    for (i, field) in fields.iter().enumerate() {
        match field.to_lowercase().as_str() {
            "symbol" | "ticker" => symbol = Some(i),
            "name" => name = Some(i),
            "type" => instrument_type = Some(i),
            "weight" => weight = Some(i),
            _ => {}
        }
    }

    Ok(ColumnMap {
        symbol: symbol.ok_or_else(|| anyhow!("Missing 'symbol' column in CSV header"))?,
        name,
        instrument_type,
        weight,
    })
}

fn parse_row(fields: &[String], columns: &ColumnMap) -> std::result::Result<ParsedInstrument, String> {
    let symbol = fields
        .get(columns.symbol)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "Missing symbol".to_string())?;

    let name = columns
        .name
        .and_then(|i| fields.get(i))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());

    let instrument_type = match columns.instrument_type.and_then(|i| fields.get(i)) {
        Some(raw) if !raw.is_empty() => Some(
            InstrumentType::from_str(raw)
                .ok_or_else(|| format!("Unknown instrument type '{}'", raw))?,
        ),
        _ => None,
    };

    let weight = match columns.weight.and_then(|i| fields.get(i)) {
        Some(raw) if !raw.is_empty() => {
            let value = parse_weight(raw).ok_or_else(|| format!("Invalid weight '{}'", raw))?;
            if value <= 0.0 || value > 100.0 {
                return Err(format!("Weight {} out of range (0, 100]", value));
            }
            Some(value)
        }
        _ => None,
    };

    Ok(ParsedInstrument {
        symbol,
        name,
        instrument_type,
        weight,
    })
}

/// Parse a weight that may use `,` as the decimal separator.
fn parse_weight(raw: &str) -> Option<f64> {
    let normalized = if raw.contains(',') && !raw.contains('.') {
        raw.replace(',', ".")
    } else {
        raw.to_string()
    };
    normalized.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_delimited_file() {
        let csv = "symbol,name,type,weight\nAAPL,Apple,stock,60\nBTC-USD,Bitcoin,crypto,40\n";
        let result = parse_instruments_csv(csv).unwrap();
        assert_eq!(result.instruments.len(), 2);
        assert!(result.errors.is_empty());
        assert_eq!(result.instruments[0].symbol, "AAPL");
        assert_eq!(result.instruments[0].instrument_type, Some(InstrumentType::Stock));
        assert_eq!(result.instruments[1].weight, Some(40.0));
    }

    #[test]
    fn parses_semicolon_delimiter_and_decimal_comma() {
        let csv = "Symbol;Weight\nVWCE.DE;62,5\n";
        let result = parse_instruments_csv(csv).unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(result.instruments[0].symbol, "VWCE.DE");
        assert_eq!(result.instruments[0].weight, Some(62.5));
    }

    #[test]
    fn header_matching_is_case_insensitive() {
        let csv = "TICKER,NAME\nmsft,Microsoft\n";
        let result = parse_instruments_csv(csv).unwrap();
        assert_eq!(result.instruments[0].symbol, "MSFT");
        assert_eq!(result.instruments[0].name.as_deref(), Some("Microsoft"));
    }

    #[test]
    fn bad_rows_are_collected_not_fatal() {
        let csv = "symbol,type,weight\nAAPL,stock,50\n,stock,10\nMSFT,widget,20\nGOOG,etf,150\n";
        let result = parse_instruments_csv(csv).unwrap();
        assert_eq!(result.instruments.len(), 1);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.errors[0].line, 3);
        assert!(result.errors[1].message.contains("widget"));
        assert!(result.errors[2].message.contains("out of range"));
    }

    #[test]
    fn missing_symbol_column_is_an_error() {
        assert!(parse_instruments_csv("name,weight\nApple,50\n").is_err());
        assert!(parse_instruments_csv("").is_err());
    }

    #[test]
    fn blank_lines_are_skipped() {
        let csv = "symbol\n\nAAPL\n\n";
        let result = parse_instruments_csv(csv).unwrap();
        assert_eq!(result.instruments.len(), 1);
    }
}
