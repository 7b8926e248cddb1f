use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tradable asset category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Stock,
    Etf,
    Crypto,
    Bond,
    Commodity,
}

impl InstrumentType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stock" => Some(Self::Stock),
            "etf" => Some(Self::Etf),
            "crypto" => Some(Self::Crypto),
            "bond" => Some(Self::Bond),
            "commodity" => Some(Self::Commodity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stock => "stock",
            Self::Etf => "etf",
            Self::Crypto => "crypto",
            Self::Bond => "bond",
            Self::Commodity => "commodity",
        }
    }

    /// Map a Yahoo Finance quoteType to our instrument categories.
    pub fn from_quote_type(quote_type: &str) -> Self {
        match quote_type.to_uppercase().as_str() {
            "ETF" | "MUTUALFUND" => Self::Etf,
            "CRYPTOCURRENCY" => Self::Crypto,
            "FUTURE" | "COMMODITY" => Self::Commodity,
            _ => Self::Stock,
        }
    }
}

/// An instrument held in a portfolio, identified by its ticker symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub instrument_type: InstrumentType,
    pub sector: Option<String>,
    /// Percentage weight in (0, 100]; None means "use equal weighting"
    pub weight: Option<f64>,
    pub added_at: DateTime<Utc>,
}

/// A named collection of instruments owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub id: String,
    #[serde(skip_serializing)]
    pub user_id: String,
    pub name: String,
    pub is_active: bool,
    pub use_custom_weights: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

impl Portfolio {
    pub fn new(user_id: &str, name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name,
            is_active: false,
            use_custom_weights: false,
            created_at: now,
            updated_at: now,
            instruments: vec![],
        }
    }

    /// Effective weight vector for aggregation, in the same order as
    /// `instruments`. Custom weights apply only when every instrument
    /// carries one; otherwise instruments are equally weighted.
    pub fn effective_weights(&self) -> Vec<f64> {
        let n = self.instruments.len();
        if n == 0 {
            return vec![];
        }

        if self.use_custom_weights {
            let weights: Vec<f64> = self.instruments.iter().filter_map(|i| i.weight).collect();
            if weights.len() == n {
                let total: f64 = weights.iter().sum();
                if total > 0.0 {
                    // Re-base so the vector always sums to 100
                    return weights.iter().map(|w| w / total * 100.0).collect();
                }
            }
        }

        vec![100.0 / n as f64; n]
    }
}

/// Registered user; the password hash never leaves the database layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user display preferences persisted for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub language: String,
    pub theme: String,
    pub dashboard_order: Vec<String>,
    pub market_indexes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            theme: "light".to_string(),
            dashboard_order: vec![],
            market_indexes: vec!["^GSPC".to_string(), "^IXIC".to_string(), "^DJI".to_string()],
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(symbol: &str, weight: Option<f64>) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            instrument_type: InstrumentType::Stock,
            sector: None,
            weight,
            added_at: Utc::now(),
        }
    }

    #[test]
    fn equal_weights_when_custom_disabled() {
        let mut p = Portfolio::new("u1", "Test".into());
        p.instruments = vec![instrument("AAPL", Some(80.0)), instrument("MSFT", Some(20.0))];
        assert_eq!(p.effective_weights(), vec![50.0, 50.0]);
    }

    #[test]
    fn custom_weights_rebased_to_100() {
        let mut p = Portfolio::new("u1", "Test".into());
        p.use_custom_weights = true;
        p.instruments = vec![instrument("AAPL", Some(60.0)), instrument("MSFT", Some(20.0))];
        let w = p.effective_weights();
        assert!((w[0] - 75.0).abs() < 1e-9);
        assert!((w[1] - 25.0).abs() < 1e-9);
    }

    #[test]
    fn incomplete_custom_weights_fall_back_to_equal() {
        let mut p = Portfolio::new("u1", "Test".into());
        p.use_custom_weights = true;
        p.instruments = vec![instrument("AAPL", Some(60.0)), instrument("MSFT", None)];
        assert_eq!(p.effective_weights(), vec![50.0, 50.0]);
    }

    #[test]
    fn instrument_type_maps_yahoo_quote_types() {
        assert_eq!(InstrumentType::from_quote_type("EQUITY"), InstrumentType::Stock);
        assert_eq!(InstrumentType::from_quote_type("MUTUALFUND"), InstrumentType::Etf);
        assert_eq!(InstrumentType::from_quote_type("CRYPTOCURRENCY"), InstrumentType::Crypto);
        assert_eq!(InstrumentType::from_quote_type("FUTURE"), InstrumentType::Commodity);
        assert_eq!(InstrumentType::from_quote_type("whatever"), InstrumentType::Stock);
    }
}
