//! Yahoo Finance data provider.
//!
//! Covers:
//! - Chart data (intraday and historical closes)
//! - Symbol search and related news
//! - Quote summary modules (valuation, calendar events, company profile)

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

const CHART_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
const SEARCH_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";
const SUMMARY_URL: &str = "https://query1.finance.yahoo.com/v10/finance/quoteSummary";
const QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";

/// HTTP client with a browser User-Agent; Yahoo rejects the default one.
pub fn create_client() -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static("Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))
}

/// One chart series for a symbol: aligned timestamps and closes plus
/// the metadata Yahoo attaches to every chart response.
#[derive(Debug, Clone)]
pub struct ChartData {
    pub symbol: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub regular_market_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub timestamps: Vec<i64>,
    pub closes: Vec<f64>,
}

impl ChartData {
    /// Close price at or immediately before `target` (Unix seconds).
    /// Series timestamps are ascending.
    pub fn close_at_or_before(&self, target: i64) -> Option<f64> {
        self.timestamps
            .iter()
            .zip(self.closes.iter())
            .take_while(|(ts, _)| **ts <= target)
            .last()
            .map(|(_, close)| *close)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.regular_market_price.or_else(|| self.closes.last().copied())
    }
}

/// Fetch chart data for a symbol over a Unix timestamp window.
pub async fn fetch_chart(
    client: &reqwest::Client,
    symbol: &str,
    period1: i64,
    period2: i64,
    interval: &str,
) -> Result<ChartData> {
    let url = format!(
        "{}/{}?period1={}&period2={}&interval={}",
        CHART_URL,
        urlencoding::encode(symbol),
        period1,
        period2,
        interval
    );
    log::debug!("Fetching Yahoo chart for {} from {}", symbol, url);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Request failed for {}: {}", symbol, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        log::error!("Yahoo API error for {}: {} - {}", symbol, status, body);
        return Err(anyhow!("HTTP error for {}: {}", symbol, status));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse JSON for {}: {}", symbol, e))?;

    check_chart_error(symbol, &data)?;
    parse_chart(symbol, &data)
}

/// Check for Yahoo API error object in a chart response.
fn check_chart_error(symbol: &str, data: &serde_json::Value) -> Result<()> {
    if let Some(error) = data
        .get("chart")
        .and_then(|c| c.get("error"))
        .and_then(|e| e.as_object())
    {
        let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("unknown");
        let desc = error
            .get("description")
            .and_then(|d| d.as_str())
            .unwrap_or("No description");
        log::error!("Yahoo API returned error for {}: {} - {}", symbol, code, desc);
        return Err(anyhow!("Yahoo API error for {}: {} - {}", symbol, code, desc));
    }
    Ok(())
}

fn parse_chart(symbol: &str, data: &serde_json::Value) -> Result<ChartData> {
    let chart = data
        .get("chart")
        .and_then(|c| c.get("result"))
        .and_then(|r| r.get(0))
        .ok_or_else(|| anyhow!("Invalid response format for {}", symbol))?;

    let meta = chart.get("meta").ok_or_else(|| anyhow!("Missing meta for {}", symbol))?;

    let name = meta.get("shortName").and_then(|n| n.as_str()).map(String::from);
    let currency = meta.get("currency").and_then(|c| c.as_str()).map(String::from);
    let regular_market_price = meta.get("regularMarketPrice").and_then(|p| p.as_f64());
    let previous_close = meta.get("chartPreviousClose").and_then(|p| p.as_f64());

    let raw_timestamps = chart
        .get("timestamp")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();

    let raw_closes = chart
        .get("indicators")
        .and_then(|i| i.get("quote"))
        .and_then(|q| q.get(0))
        .and_then(|q| q.get("close"))
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    // Drop points with null closes so timestamps and closes stay aligned
    let mut timestamps = Vec::with_capacity(raw_timestamps.len());
    let mut closes = Vec::with_capacity(raw_timestamps.len());
    for (ts, close) in raw_timestamps.iter().zip(raw_closes.iter()) {
        if let (Some(ts), Some(close)) = (ts.as_i64(), close.as_f64()) {
            timestamps.push(ts);
            closes.push(close);
        }
    }

    Ok(ChartData {
        symbol: symbol.to_string(),
        name,
        currency,
        regular_market_price,
        previous_close,
        timestamps,
        closes,
    })
}

/// Snapshot quote from the batch quote endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuote {
    pub symbol: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub currency: Option<String>,
    pub regular_market_price: Option<f64>,
    pub regular_market_previous_close: Option<f64>,
    pub regular_market_change_percent: Option<f64>,
    pub market_cap: Option<f64>,
}

impl BatchQuote {
    pub fn display_name(&self) -> String {
        self.short_name
            .clone()
            .or_else(|| self.long_name.clone())
            .unwrap_or_else(|| self.symbol.clone())
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponseBody,
}

#[derive(Debug, Deserialize)]
struct QuoteResponseBody {
    result: Option<Vec<BatchQuote>>,
}

/// Fetch snapshot quotes for several symbols in one request.
pub async fn fetch_quotes_batch(
    client: &reqwest::Client,
    symbols: &[String],
) -> Result<Vec<BatchQuote>> {
    if symbols.is_empty() {
        return Ok(vec![]);
    }

    let url = format!(
        "{}?symbols={}",
        QUOTE_URL,
        urlencoding::encode(&symbols.join(","))
    );
    log::debug!("Fetching Yahoo batch quote for {} symbols", symbols.len());

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Batch quote request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(anyhow!("Yahoo quote error: {}", response.status()));
    }

    let data: QuoteResponse = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse Yahoo quote response: {}", e))?;

    Ok(data.quote_response.result.unwrap_or_default())
}

/// Symbol match from Yahoo search.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub quote_type: String,
    pub sector: Option<String>,
}

/// News article attached to a symbol.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub uuid: String,
    pub title: String,
    pub publisher: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail: Option<String>,
    pub related_symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    quotes: Option<Vec<SearchQuote>>,
    news: Option<Vec<SearchNews>>,
}

#[derive(Debug, Deserialize)]
struct SearchQuote {
    symbol: String,
    shortname: Option<String>,
    longname: Option<String>,
    exchange: Option<String>,
    #[serde(rename = "quoteType")]
    quote_type: Option<String>,
    sector: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNews {
    uuid: Option<String>,
    title: Option<String>,
    publisher: Option<String>,
    link: Option<String>,
    provider_publish_time: Option<i64>,
    thumbnail: Option<serde_json::Value>,
    related_tickers: Option<Vec<String>>,
}

async fn search_raw(
    client: &reqwest::Client,
    query: &str,
    quotes_count: u32,
    news_count: u32,
) -> Result<SearchResponse> {
    let url = format!(
        "{}?q={}&quotesCount={}&newsCount={}",
        SEARCH_URL,
        urlencoding::encode(query),
        quotes_count,
        news_count
    );
    log::debug!("Yahoo search for: {}", query);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Yahoo search request failed: {}", e))?;

    if !response.status().is_success() {
        return Err(anyhow!("Yahoo search error: {}", response.status()));
    }

    response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse Yahoo search response: {}", e))
}

/// Search for instruments matching a free-text query.
pub async fn search(client: &reqwest::Client, query: &str) -> Result<Vec<SearchMatch>> {
    let data = search_raw(client, query, 20, 0).await?;

    let results = data
        .quotes
        .unwrap_or_default()
        .into_iter()
        .map(|q| SearchMatch {
            symbol: q.symbol,
            name: q.longname.or(q.shortname).unwrap_or_default(),
            exchange: q.exchange.unwrap_or_default(),
            quote_type: q.quote_type.unwrap_or_else(|| "EQUITY".to_string()),
            sector: q.sector,
        })
        .collect();

    Ok(results)
}

/// Fetch news articles related to a symbol.
pub async fn fetch_news(
    client: &reqwest::Client,
    symbol: &str,
    count: u32,
) -> Result<Vec<NewsItem>> {
    let data = search_raw(client, symbol, 0, count).await?;

    let items = data
        .news
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| {
            let title = n.title?;
            let link = n.link?;
            Some(NewsItem {
                uuid: n.uuid.unwrap_or_else(|| link.clone()),
                title,
                publisher: n.publisher.unwrap_or_default(),
                link,
                published_at: n
                    .provider_publish_time
                    .and_then(|ts| DateTime::from_timestamp(ts, 0)),
                thumbnail: n.thumbnail.as_ref().and_then(extract_thumbnail),
                related_symbols: {
                    let mut tickers = n.related_tickers.unwrap_or_default();
                    if !tickers.iter().any(|t| t == symbol) {
                        tickers.push(symbol.to_string());
                    }
                    tickers
                },
            })
        })
        .collect();

    Ok(items)
}

/// Pick the first resolution URL out of Yahoo's thumbnail object.
fn extract_thumbnail(value: &serde_json::Value) -> Option<String> {
    value
        .get("resolutions")
        .and_then(|r| r.as_array())
        .and_then(|arr| arr.first())
        .and_then(|res| res.get("url"))
        .and_then(|u| u.as_str())
        .map(String::from)
}

/// Fetch quoteSummary modules for a symbol as raw JSON.
///
/// `modules` is a comma-separated list, e.g. `"summaryDetail,calendarEvents"`.
pub async fn fetch_quote_summary(
    client: &reqwest::Client,
    symbol: &str,
    modules: &str,
) -> Result<serde_json::Value> {
    let url = format!(
        "{}/{}?modules={}",
        SUMMARY_URL,
        urlencoding::encode(symbol),
        modules
    );
    log::debug!("Fetching Yahoo quoteSummary for {} ({})", symbol, modules);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| anyhow!("Request failed for {}: {}", symbol, e))?;

    if !response.status().is_success() {
        return Err(anyhow!("Yahoo quoteSummary error for {}: {}", symbol, response.status()));
    }

    let data: serde_json::Value = response
        .json()
        .await
        .map_err(|e| anyhow!("Failed to parse JSON for {}: {}", symbol, e))?;

    data.get("quoteSummary")
        .and_then(|q| q.get("result"))
        .and_then(|r| r.get(0))
        .cloned()
        .ok_or_else(|| anyhow!("Empty quoteSummary for {}", symbol))
}

/// Unwrap Yahoo's `{ "raw": 1.23, "fmt": "1.23" }` number wrapper.
pub fn raw_value(value: &serde_json::Value) -> Option<f64> {
    value.get("raw").and_then(|r| r.as_f64()).or_else(|| value.as_f64())
}
