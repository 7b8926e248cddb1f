//! Market data service.
//!
//! Wraps the Yahoo Finance provider with per-endpoint TTL caches and
//! aggregates raw series into the shapes the API serves: quotes with
//! lookback changes, weight-normalized portfolio charts, news, calendar
//! events, movers, the Fear & Greed index and country allocations.

pub mod cache;
pub mod yahoo;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::InstrumentType;
use cache::TtlCache;
use yahoo::ChartData;

const DAY_SECS: i64 = 86_400;

/// Broad watchlist scanned for the movers endpoint.
const MOVERS_WATCHLIST: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "NVDA", "META", "TSLA", "BRK-B", "JPM", "V", "UNH", "XOM",
    "JNJ", "WMT", "PG", "MA", "HD", "CVX", "MRK", "ABBV", "KO", "PEP", "COST", "AVGO", "TMO",
    "MCD", "CSCO", "ACN", "ABT", "DHR", "NKE", "TXN", "NEE", "PM", "LIN", "UNP", "AMD", "INTC",
    "CRM", "ORCL", "ADBE", "NFLX", "QCOM", "BA", "CAT", "GS", "MS", "UBER", "ABNB", "SQ", "SHOP",
    "COIN", "PLTR", "SNOW", "CRWD", "ZS", "NET", "DDOG", "MELI", "SE", "BTC-USD", "ETH-USD",
    "SOL-USD", "XRP-USD", "ADA-USD", "DOGE-USD", "SPY", "QQQ", "IWM", "VTI", "ARKK",
];

const FEAR_GREED_URL: &str = "https://production.dataviz.cnn.io/index/fearandgreed/graphdata";

/// Chart lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePeriod {
    Day,
    Week,
    Month,
    Year,
    FiveYears,
    YearToDate,
}

impl TimePeriod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1d" => Some(Self::Day),
            "1w" => Some(Self::Week),
            "1mo" => Some(Self::Month),
            "1y" => Some(Self::Year),
            "5y" => Some(Self::FiveYears),
            "ytd" => Some(Self::YearToDate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "1d",
            Self::Week => "1w",
            Self::Month => "1mo",
            Self::Year => "1y",
            Self::FiveYears => "5y",
            Self::YearToDate => "ytd",
        }
    }

    /// Window start (Unix seconds) and sampling interval for a period.
    fn window(&self, now: i64) -> (i64, &'static str) {
        match self {
            Self::Day => (now - DAY_SECS, "5m"),
            Self::Week => (now - 7 * DAY_SECS, "15m"),
            Self::Month => (now - 30 * DAY_SECS, "1d"),
            Self::Year => (now - 365 * DAY_SECS, "1wk"),
            Self::FiveYears => (now - 5 * 365 * DAY_SECS, "1mo"),
            Self::YearToDate => (start_of_year(now), "1d"),
        }
    }
}

/// Unix seconds of January 1st of the year containing `now`.
fn start_of_year(now: i64) -> i64 {
    let year = DateTime::from_timestamp(now, 0)
        .map(|dt| dt.year())
        .unwrap_or(1970);
    NaiveDate::from_ymd_opt(year, 1, 1)
        .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap_or_default()).timestamp())
        .unwrap_or(now)
}

/// Quote with percentage changes over standard lookback windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub currency: String,
    pub change24h: f64,
    pub change1w: f64,
    pub change1m: f64,
    pub change1y: f64,
    pub change_ytd: f64,
}

/// One point of an aggregated performance chart. Timestamps are in
/// milliseconds, values indexed to 100 at window start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartPoint {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    pub uuid: String,
    pub title: String,
    pub summary: String,
    pub thumbnail_url: Option<String>,
    pub link: String,
    pub publisher: String,
    pub published_at: DateTime<Utc>,
    pub related_symbols: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CalendarEventType {
    Earnings,
    Dividend,
    Split,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: CalendarEventType,
    pub date: NaiveDate,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub symbol: String,
    pub name: String,
    #[serde(rename = "type")]
    pub instrument_type: InstrumentType,
    pub exchange: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mover {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub market_cap: Option<f64>,
    pub market_cap_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movers {
    pub gainers: Vec<Mover>,
    pub losers: Vec<Mover>,
}

/// Sort mode for movers: by percent change or by market-cap change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoversMode {
    Percent,
    Value,
}

impl MoversMode {
    pub fn parse(s: &str) -> Self {
        if s == "value" {
            Self::Value
        } else {
            Self::Percent
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreedCurrent {
    pub value: i64,
    pub rating: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreedPoint {
    pub x: i64,
    pub y: i64,
    pub rating: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FearGreed {
    pub current: FearGreedCurrent,
    pub history: Vec<FearGreedPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryAllocation {
    pub country: String,
    pub country_code: String,
    pub percentage: f64,
}

/// Shared market data service. Cheap to clone behind an `Arc` in app state.
pub struct MarketService {
    client: reqwest::Client,
    quote_cache: TtlCache<Quote>,
    chart_cache: TtlCache<Vec<ChartPoint>>,
    news_cache: TtlCache<Vec<NewsArticle>>,
    calendar_cache: TtlCache<Vec<CalendarEvent>>,
    search_cache: TtlCache<Vec<SearchResult>>,
    movers_cache: TtlCache<Movers>,
    fear_greed_cache: TtlCache<FearGreed>,
    country_cache: TtlCache<Vec<CountryAllocation>>,
}

impl MarketService {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: yahoo::create_client()?,
            quote_cache: TtlCache::new(Duration::from_secs(60)),
            chart_cache: TtlCache::new(Duration::from_secs(5 * 60)),
            news_cache: TtlCache::new(Duration::from_secs(15 * 60)),
            calendar_cache: TtlCache::new(Duration::from_secs(30 * 60)),
            search_cache: TtlCache::new(Duration::from_secs(10 * 60)),
            movers_cache: TtlCache::new(Duration::from_secs(5 * 60)),
            fear_greed_cache: TtlCache::new(Duration::from_secs(30 * 60)),
            country_cache: TtlCache::new(Duration::from_secs(60 * 60)),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Quotes for a set of symbols. Failed symbols are skipped.
    pub async fn quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let mut results: Vec<Quote> = Vec::with_capacity(symbols.len());
        let mut missing: Vec<String> = Vec::new();

        for symbol in symbols {
            match self.quote_cache.get(symbol) {
                Some(quote) => results.push(quote),
                None => missing.push(symbol.clone()),
            }
        }

        if missing.is_empty() {
            return results;
        }

        let snapshots = match yahoo::fetch_quotes_batch(&self.client, &missing).await {
            Ok(snapshots) => snapshots
                .into_iter()
                .map(|q| (q.symbol.clone(), q))
                .collect::<HashMap<_, _>>(),
            Err(e) => {
                log::error!("Batch quote fetch failed: {}", e);
                HashMap::new()
            }
        };

        let now = Utc::now().timestamp();
        let fetched = join_all(missing.iter().map(|symbol| {
            let snapshot = snapshots.get(symbol).cloned();
            async move { self.build_quote(symbol, snapshot, now).await }
        }))
        .await;

        for quote in fetched.into_iter().flatten() {
            self.quote_cache.insert(quote.symbol.clone(), quote.clone());
            results.push(quote);
        }

        results
    }

    async fn build_quote(
        &self,
        symbol: &str,
        snapshot: Option<yahoo::BatchQuote>,
        now: i64,
    ) -> Option<Quote> {
        let history = yahoo::fetch_chart(&self.client, symbol, now - 365 * DAY_SECS, now, "1d")
            .await
            .map_err(|e| log::warn!("Quote history failed for {}: {}", symbol, e))
            .ok();

        let (price, name, currency, change24h) = match &snapshot {
            Some(q) => (
                q.regular_market_price,
                Some(q.display_name()),
                q.currency.clone(),
                q.regular_market_change_percent,
            ),
            None => {
                // Snapshot endpoint failed; fall back to chart metadata
                let h = history.as_ref()?;
                let price = h.last_close();
                let change = price.and_then(|p| {
                    let n = h.closes.len();
                    if n >= 2 && h.closes[n - 2] > 0.0 {
                        Some((p - h.closes[n - 2]) / h.closes[n - 2] * 100.0)
                    } else {
                        None
                    }
                });
                (price, h.name.clone(), h.currency.clone(), change)
            }
        };

        let price = price?;

        let lookback = |target: i64| -> f64 {
            history
                .as_ref()
                .and_then(|h| closest_close(h, target))
                .filter(|p| *p > 0.0)
                .map(|p| (price - p) / p * 100.0)
                .unwrap_or(0.0)
        };

        Some(Quote {
            symbol: symbol.to_string(),
            name: name.unwrap_or_else(|| symbol.to_string()),
            price,
            currency: currency.unwrap_or_else(|| "USD".to_string()),
            change24h: change24h.unwrap_or(0.0),
            change1w: lookback(now - 7 * DAY_SECS),
            change1m: lookback(now - 30 * DAY_SECS),
            change1y: lookback(now - 365 * DAY_SECS),
            change_ytd: lookback(start_of_year(now)),
        })
    }

    /// Aggregated, weight-normalized performance chart for a symbol set.
    pub async fn chart(
        &self,
        symbols: &[String],
        period: TimePeriod,
        weights: Option<&[f64]>,
    ) -> Result<Vec<ChartPoint>> {
        let key = format!(
            "{}:{}:{}",
            symbols.join(","),
            period.as_str(),
            weights
                .map(|w| w.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
                .unwrap_or_default()
        );
        if let Some(cached) = self.chart_cache.get(&key) {
            return Ok(cached);
        }

        let now = Utc::now().timestamp();
        let (period1, interval) = period.window(now);

        let charts = join_all(symbols.iter().map(|symbol| {
            yahoo::fetch_chart(&self.client, symbol, period1, now, interval)
        }))
        .await;

        let mut series: Vec<Vec<ChartPoint>> = Vec::new();
        for (symbol, chart) in symbols.iter().zip(charts) {
            match chart {
                Ok(chart) => {
                    let normalized = normalize_series(&chart);
                    if !normalized.is_empty() {
                        series.push(normalized);
                    }
                }
                Err(e) => log::warn!("Chart fetch failed for {}: {}", symbol, e),
            }
        }

        let result = aggregate_chart(&series, weights);
        self.chart_cache.insert(key, result.clone());
        Ok(result)
    }

    /// News for the first 10 symbols, deduplicated and capped at 20.
    pub async fn news(&self, symbols: &[String]) -> Vec<NewsArticle> {
        let key = symbols.join(",");
        if let Some(cached) = self.news_cache.get(&key) {
            return cached;
        }

        let fetched = join_all(
            symbols
                .iter()
                .take(10)
                .map(|symbol| yahoo::fetch_news(&self.client, symbol, 5)),
        )
        .await;

        let mut by_uuid: HashMap<String, NewsArticle> = HashMap::new();
        for (symbol, items) in symbols.iter().zip(fetched) {
            let items = match items {
                Ok(items) => items,
                Err(e) => {
                    log::warn!("News fetch failed for {}: {}", symbol, e);
                    continue;
                }
            };
            for item in items {
                match by_uuid.get_mut(&item.uuid) {
                    Some(existing) => {
                        for related in item.related_symbols {
                            if !existing.related_symbols.contains(&related) {
                                existing.related_symbols.push(related);
                            }
                        }
                    }
                    None => {
                        by_uuid.insert(
                            item.uuid.clone(),
                            NewsArticle {
                                uuid: item.uuid,
                                title: item.title,
                                summary: String::new(),
                                thumbnail_url: item.thumbnail,
                                link: item.link,
                                publisher: item.publisher,
                                published_at: item.published_at.unwrap_or_else(Utc::now),
                                related_symbols: item.related_symbols,
                            },
                        );
                    }
                }
            }
        }

        let mut articles: Vec<NewsArticle> = by_uuid.into_values().collect();
        articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        articles.truncate(20);

        self.news_cache.insert(key, articles.clone());
        articles
    }

    /// Upcoming earnings and dividend dates, sorted ascending.
    pub async fn calendar(&self, symbols: &[String]) -> Vec<CalendarEvent> {
        let key = symbols.join(",");
        if let Some(cached) = self.calendar_cache.get(&key) {
            return cached;
        }

        let fetched = join_all(symbols.iter().map(|symbol| {
            yahoo::fetch_quote_summary(&self.client, symbol, "calendarEvents,quoteType")
        }))
        .await;

        let mut events: Vec<CalendarEvent> = Vec::new();
        for (symbol, summary) in symbols.iter().zip(fetched) {
            match summary {
                Ok(summary) => events.extend(parse_calendar_events(symbol, &summary)),
                Err(e) => log::warn!("Calendar fetch failed for {}: {}", symbol, e),
            }
        }

        events.sort_by_key(|e| e.date);
        self.calendar_cache.insert(key, events.clone());
        events
    }

    /// Instrument search.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        if let Some(cached) = self.search_cache.get(query) {
            return Ok(cached);
        }

        let matches = yahoo::search(&self.client, query).await?;
        let results: Vec<SearchResult> = matches
            .into_iter()
            .map(|m| SearchResult {
                symbol: m.symbol,
                name: m.name,
                instrument_type: InstrumentType::from_quote_type(&m.quote_type),
                exchange: m.exchange,
                sector: m.sector,
            })
            .collect();

        self.search_cache.insert(query, results.clone());
        Ok(results)
    }

    /// Top gainers and losers across the watchlist. Serves stale data if
    /// the upstream is down and a previous scan exists.
    pub async fn movers(&self, mode: MoversMode) -> Result<Movers> {
        if let Some(cached) = self.movers_cache.get("movers") {
            return Ok(sort_movers(cached, mode));
        }

        let watchlist: Vec<String> = MOVERS_WATCHLIST.iter().map(|s| s.to_string()).collect();
        let mut all: Vec<Mover> = Vec::new();

        // Batches of 20 to keep request URLs short
        for batch in watchlist.chunks(20) {
            match yahoo::fetch_quotes_batch(&self.client, batch).await {
                Ok(quotes) => {
                    for q in quotes {
                        if let Some(mover) = build_mover(&q) {
                            all.push(mover);
                        }
                    }
                }
                Err(e) => log::warn!("Movers batch failed: {}", e),
            }
        }

        if all.is_empty() {
            if let Some(stale) = self.movers_cache.peek_stale("movers") {
                log::warn!("Serving stale movers data");
                return Ok(sort_movers(stale, mode));
            }
            return Err(anyhow!("Failed to fetch market movers"));
        }

        let mut gainers: Vec<Mover> = all.iter().filter(|m| m.change_percent > 0.0).cloned().collect();
        let mut losers: Vec<Mover> = all.iter().filter(|m| m.change_percent < 0.0).cloned().collect();
        gainers.sort_by(|a, b| b.change_percent.total_cmp(&a.change_percent));
        losers.sort_by(|a, b| a.change_percent.total_cmp(&b.change_percent));

        let movers = Movers { gainers, losers };
        self.movers_cache.insert("movers", movers.clone());
        Ok(sort_movers(movers, mode))
    }

    /// CNN Fear & Greed index, current value plus history.
    pub async fn fear_greed(&self) -> Result<FearGreed> {
        if let Some(cached) = self.fear_greed_cache.get("fear-greed") {
            return Ok(cached);
        }

        match self.fetch_fear_greed().await {
            Ok(data) => {
                self.fear_greed_cache.insert("fear-greed", data.clone());
                Ok(data)
            }
            Err(e) => {
                if let Some(stale) = self.fear_greed_cache.peek_stale("fear-greed") {
                    log::warn!("Serving stale Fear & Greed data: {}", e);
                    return Ok(stale);
                }
                Err(e)
            }
        }
    }

    async fn fetch_fear_greed(&self) -> Result<FearGreed> {
        let response = self
            .client
            .get(FEAR_GREED_URL)
            .send()
            .await
            .map_err(|e| anyhow!("Fear & Greed request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("CNN API returned {}", response.status()));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Fear & Greed response: {}", e))?;

        let fg = raw.get("fear_and_greed");
        let current = FearGreedCurrent {
            value: fg
                .and_then(|f| f.get("score"))
                .and_then(|s| s.as_f64())
                .map(|s| s.round() as i64)
                .unwrap_or(50),
            rating: fg
                .and_then(|f| f.get("rating"))
                .and_then(|r| r.as_str())
                .unwrap_or("Neutral")
                .to_string(),
            timestamp: fg
                .and_then(|f| f.get("timestamp"))
                .and_then(|t| t.as_str())
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.timestamp_millis())
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
        };

        let history = raw
            .get("fear_and_greed_historical")
            .and_then(|h| h.get("data"))
            .and_then(|d| d.as_array())
            .map(|points| {
                points
                    .iter()
                    .filter_map(|p| {
                        Some(FearGreedPoint {
                            x: p.get("x").and_then(|x| x.as_f64())? as i64,
                            y: p.get("y").and_then(|y| y.as_f64())?.round() as i64,
                            rating: p
                                .get("rating")
                                .and_then(|r| r.as_str())
                                .unwrap_or("")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(FearGreed { current, history })
    }

    /// Weight-aggregated country allocation for a symbol set.
    ///
    /// `types` aligns with `symbols`; ETFs resolve through the static index
    /// allocation table, everything else through the company profile.
    pub async fn countries(
        &self,
        symbols: &[String],
        weights: &[f64],
        types: &[String],
    ) -> Vec<CountryAllocation> {
        let key = format!(
            "{}:{}:{}",
            symbols.join(","),
            weights.iter().map(|w| w.to_string()).collect::<Vec<_>>().join(","),
            types.join(",")
        );
        if let Some(cached) = self.country_cache.get(&key) {
            return cached;
        }

        let per_symbol = join_all(symbols.iter().enumerate().map(|(i, symbol)| {
            let instrument_type = types.get(i).map(String::as_str).unwrap_or("stock");
            async move { self.symbol_countries(symbol, instrument_type).await }
        }))
        .await;

        let mut totals: HashMap<String, f64> = HashMap::new();
        for (i, allocation) in per_symbol.into_iter().enumerate() {
            let weight = weights.get(i).copied().unwrap_or(0.0);
            for (country, pct) in allocation {
                *totals.entry(country).or_insert(0.0) += weight * pct / 100.0;
            }
        }

        let grand_total: f64 = totals.values().sum();
        let mut result: Vec<CountryAllocation> = totals
            .into_iter()
            .filter(|(_, pct)| *pct > 0.0)
            .map(|(country, pct)| CountryAllocation {
                country_code: country_code(&country).to_string(),
                percentage: if grand_total > 0.0 {
                    pct / grand_total * 100.0
                } else {
                    0.0
                },
                country,
            })
            .collect();
        result.sort_by(|a, b| b.percentage.total_cmp(&a.percentage));

        self.country_cache.insert(key, result.clone());
        result
    }

    /// Country percentages for a single symbol, summing to 100.
    async fn symbol_countries(&self, symbol: &str, instrument_type: &str) -> Vec<(String, f64)> {
        if let Some(allocation) = index_allocation(symbol) {
            return allocation
                .iter()
                .map(|(country, pct)| (country.to_string(), *pct))
                .collect();
        }

        if instrument_type == "crypto" {
            return vec![("Global".to_string(), 100.0)];
        }

        match yahoo::fetch_quote_summary(&self.client, symbol, "assetProfile").await {
            Ok(summary) => summary
                .get("assetProfile")
                .and_then(|p| p.get("country"))
                .and_then(|c| c.as_str())
                .map(|c| vec![(c.to_string(), 100.0)])
                .unwrap_or_else(|| vec![("Unknown".to_string(), 100.0)]),
            Err(e) => {
                log::warn!("Profile fetch failed for {}: {}", symbol, e);
                vec![("Unknown".to_string(), 100.0)]
            }
        }
    }
}

/// Normalize a chart series to 100 at its first close. Timestamps in ms.
fn normalize_series(chart: &ChartData) -> Vec<ChartPoint> {
    let base = match chart.closes.first().copied().filter(|c| *c > 0.0) {
        Some(base) => base,
        None => return vec![],
    };

    chart
        .timestamps
        .iter()
        .zip(chart.closes.iter())
        .map(|(ts, close)| ChartPoint {
            timestamp: ts * 1000,
            value: close / base * 100.0,
        })
        .collect()
}

/// Weighted average of normalized series. The longest series sets the time
/// axis; shorter series hold their last value once exhausted.
fn aggregate_chart(series: &[Vec<ChartPoint>], weights: Option<&[f64]>) -> Vec<ChartPoint> {
    if series.is_empty() {
        return vec![];
    }

    let base = series
        .iter()
        .max_by_key(|s| s.len())
        .map(Vec::as_slice)
        .unwrap_or_default();
    let equal = 100.0 / series.len() as f64;

    base.iter()
        .enumerate()
        .map(|(idx, point)| {
            let mut weighted_sum = 0.0;
            let mut total_weight = 0.0;

            for (i, s) in series.iter().enumerate() {
                let clamped = s[idx.min(s.len() - 1)];
                let w = weights.and_then(|w| w.get(i).copied()).unwrap_or(equal);
                weighted_sum += clamped.value * w;
                total_weight += w;
            }

            ChartPoint {
                timestamp: point.timestamp,
                value: if total_weight > 0.0 {
                    weighted_sum / total_weight
                } else {
                    0.0
                },
            }
        })
        .collect()
}

/// Close at the timestamp chronologically closest to `target`.
fn closest_close(chart: &ChartData, target: i64) -> Option<f64> {
    chart
        .timestamps
        .iter()
        .zip(chart.closes.iter())
        .min_by_key(|(ts, _)| (**ts - target).abs())
        .map(|(_, close)| *close)
}

fn build_mover(q: &yahoo::BatchQuote) -> Option<Mover> {
    let price = q.regular_market_price?;
    let prev_close = q.regular_market_previous_close.unwrap_or(price);
    let change = price - prev_close;
    let market_cap_change = q.market_cap.and_then(|cap| {
        if prev_close > 0.0 {
            Some((cap * change / prev_close).round())
        } else {
            None
        }
    });

    Some(Mover {
        symbol: q.symbol.clone(),
        name: q.display_name(),
        price,
        change,
        change_percent: q.regular_market_change_percent.unwrap_or(0.0),
        market_cap: q.market_cap,
        market_cap_change,
    })
}

fn sort_movers(movers: Movers, mode: MoversMode) -> Movers {
    match mode {
        MoversMode::Value => {
            let mut gainers: Vec<Mover> = movers
                .gainers
                .into_iter()
                .filter(|m| m.market_cap_change.is_some())
                .collect();
            let mut losers: Vec<Mover> = movers
                .losers
                .into_iter()
                .filter(|m| m.market_cap_change.is_some())
                .collect();
            gainers.sort_by(|a, b| {
                b.market_cap_change
                    .unwrap_or(0.0)
                    .total_cmp(&a.market_cap_change.unwrap_or(0.0))
            });
            losers.sort_by(|a, b| {
                a.market_cap_change
                    .unwrap_or(0.0)
                    .total_cmp(&b.market_cap_change.unwrap_or(0.0))
            });
            gainers.truncate(10);
            losers.truncate(10);
            Movers { gainers, losers }
        }
        MoversMode::Percent => {
            let mut gainers = movers.gainers;
            let mut losers = movers.losers;
            gainers.truncate(10);
            losers.truncate(10);
            Movers { gainers, losers }
        }
    }
}

/// Calendar events out of a quoteSummary payload.
fn parse_calendar_events(symbol: &str, summary: &serde_json::Value) -> Vec<CalendarEvent> {
    let name = summary
        .get("quoteType")
        .and_then(|q| q.get("shortName"))
        .and_then(|n| n.as_str())
        .unwrap_or(symbol)
        .to_string();

    let calendar = match summary.get("calendarEvents") {
        Some(calendar) => calendar,
        None => return vec![],
    };

    let mut events = Vec::new();

    if let Some(dates) = calendar
        .get("earnings")
        .and_then(|e| e.get("earningsDate"))
        .and_then(|d| d.as_array())
    {
        // Yahoo reports a window; the first entry is the expected date
        if let Some(date) = dates.first().and_then(yahoo::raw_value).and_then(ts_to_date) {
            events.push(CalendarEvent {
                symbol: symbol.to_string(),
                name: name.clone(),
                event_type: CalendarEventType::Earnings,
                date,
                title: format!("{} earnings", symbol),
                detail: None,
            });
        }
    }

    if let Some(date) = calendar
        .get("exDividendDate")
        .and_then(yahoo::raw_value)
        .and_then(ts_to_date)
    {
        events.push(CalendarEvent {
            symbol: symbol.to_string(),
            name: name.clone(),
            event_type: CalendarEventType::Dividend,
            date,
            title: format!("{} ex-dividend", symbol),
            detail: Some("Ex-dividend date".to_string()),
        });
    }

    if let Some(date) = calendar
        .get("dividendDate")
        .and_then(yahoo::raw_value)
        .and_then(ts_to_date)
    {
        events.push(CalendarEvent {
            symbol: symbol.to_string(),
            name,
            event_type: CalendarEventType::Dividend,
            date,
            title: format!("{} dividend payment", symbol),
            detail: Some("Dividend payment date".to_string()),
        });
    }

    events
}

fn ts_to_date(ts: f64) -> Option<NaiveDate> {
    DateTime::from_timestamp(ts as i64, 0).map(|dt| dt.date_naive())
}

/// Approximate country breakdowns for widely held index ETFs.
fn index_allocation(symbol: &str) -> Option<&'static [(&'static str, f64)]> {
    match symbol {
        "SPY" | "VOO" | "IVV" | "QQQ" | "VTI" | "IWM" | "ARKK" => {
            Some(&[("United States", 100.0)])
        }
        "URTH" => Some(&[
            ("United States", 70.0),
            ("Japan", 6.0),
            ("United Kingdom", 4.0),
            ("France", 3.0),
            ("Canada", 3.0),
            ("Switzerland", 2.5),
            ("Germany", 2.5),
            ("Australia", 2.0),
            ("Netherlands", 1.5),
            ("Denmark", 1.0),
        ]),
        "ACWI" => Some(&[
            ("United States", 63.0),
            ("Japan", 5.5),
            ("United Kingdom", 3.5),
            ("China", 3.0),
            ("France", 2.5),
            ("Canada", 2.5),
            ("Switzerland", 2.0),
            ("Germany", 2.0),
            ("India", 2.0),
            ("Taiwan", 2.0),
        ]),
        "EEM" | "VWO" => Some(&[
            ("China", 25.0),
            ("India", 20.0),
            ("Taiwan", 18.0),
            ("South Korea", 12.0),
            ("Brazil", 5.0),
            ("Saudi Arabia", 4.0),
            ("South Africa", 3.0),
            ("Mexico", 2.5),
        ]),
        _ => None,
    }
}

fn country_code(country: &str) -> &'static str {
    match country {
        "United States" => "US",
        "United Kingdom" => "GB",
        "Japan" => "JP",
        "China" => "CN",
        "Germany" => "DE",
        "France" => "FR",
        "Canada" => "CA",
        "Switzerland" => "CH",
        "Australia" => "AU",
        "Netherlands" => "NL",
        "Denmark" => "DK",
        "India" => "IN",
        "Taiwan" => "TW",
        "South Korea" => "KR",
        "Brazil" => "BR",
        "Saudi Arabia" => "SA",
        "South Africa" => "ZA",
        "Mexico" => "MX",
        "Ireland" => "IE",
        "Sweden" => "SE",
        "Spain" => "ES",
        "Italy" => "IT",
        "Israel" => "IL",
        "Hong Kong" => "HK",
        "Singapore" => "SG",
        "Global" => "GLOBAL",
        _ => "XX",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chart(symbol: &str, timestamps: Vec<i64>, closes: Vec<f64>) -> ChartData {
        ChartData {
            symbol: symbol.to_string(),
            name: None,
            currency: None,
            regular_market_price: None,
            previous_close: None,
            timestamps,
            closes,
        }
    }

    #[test]
    fn normalize_indexes_first_close_to_100() {
        let c = chart("AAPL", vec![1, 2, 3], vec![10.0, 11.0, 12.0]);
        let series = normalize_series(&c);
        assert_eq!(series[0].value, 100.0);
        assert!((series[1].value - 110.0).abs() < 1e-9);
        assert!((series[2].value - 120.0).abs() < 1e-9);
        assert_eq!(series[0].timestamp, 1000);
    }

    #[test]
    fn normalize_is_scale_invariant() {
        let a = normalize_series(&chart("A", vec![1, 2], vec![10.0, 12.0]));
        let b = normalize_series(&chart("B", vec![1, 2], vec![50.0, 60.0]));
        assert!((a[1].value - b[1].value).abs() < 1e-9);
    }

    #[test]
    fn aggregate_equal_weights_is_mean_of_series() {
        let up = vec![
            ChartPoint { timestamp: 1000, value: 100.0 },
            ChartPoint { timestamp: 2000, value: 110.0 },
        ];
        let down = vec![
            ChartPoint { timestamp: 1000, value: 100.0 },
            ChartPoint { timestamp: 2000, value: 90.0 },
        ];
        let result = aggregate_chart(&[up, down], None);
        assert_eq!(result.len(), 2);
        assert!((result[0].value - 100.0).abs() < 1e-9);
        assert!((result[1].value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_clamps_shorter_series_at_last_point() {
        let long = vec![
            ChartPoint { timestamp: 1000, value: 100.0 },
            ChartPoint { timestamp: 2000, value: 110.0 },
            ChartPoint { timestamp: 3000, value: 120.0 },
        ];
        let short = vec![ChartPoint { timestamp: 1000, value: 100.0 }];
        let result = aggregate_chart(&[long, short], None);
        assert_eq!(result.len(), 3);
        // Short series stays at 100 for every index
        assert!((result[2].value - 110.0).abs() < 1e-9);
    }

    #[test]
    fn aggregate_respects_custom_weights() {
        let up = vec![ChartPoint { timestamp: 1000, value: 120.0 }];
        let flat = vec![ChartPoint { timestamp: 1000, value: 100.0 }];
        let result = aggregate_chart(&[up, flat], Some(&[75.0, 25.0]));
        assert!((result[0].value - 115.0).abs() < 1e-9);
    }

    #[test]
    fn closest_close_prefers_nearest_timestamp() {
        let c = chart("AAPL", vec![100, 200, 300], vec![1.0, 2.0, 3.0]);
        assert_eq!(closest_close(&c, 190), Some(2.0));
        assert_eq!(closest_close(&c, 1000), Some(3.0));
        assert_eq!(closest_close(&c, 0), Some(1.0));
    }

    #[test]
    fn movers_value_mode_sorts_by_market_cap_change() {
        let mover = |symbol: &str, pct: f64, cap_change: Option<f64>| Mover {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            price: 100.0,
            change: 1.0,
            change_percent: pct,
            market_cap: cap_change.map(|_| 1e9),
            market_cap_change: cap_change,
        };
        let movers = Movers {
            gainers: vec![
                mover("A", 5.0, Some(1e6)),
                mover("B", 3.0, Some(9e6)),
                mover("C", 8.0, None),
            ],
            losers: vec![],
        };
        let sorted = sort_movers(movers, MoversMode::Value);
        assert_eq!(sorted.gainers.len(), 2);
        assert_eq!(sorted.gainers[0].symbol, "B");
    }

    #[tokio::test]
    async fn countries_cache_distinguishes_weights() {
        // SPY resolves through the static index table and crypto
        // short-circuits, so no upstream requests happen here
        let service = MarketService::new().unwrap();
        let symbols = vec!["SPY".to_string(), "BTC-USD".to_string()];
        let types = vec!["etf".to_string(), "crypto".to_string()];

        let first = service.countries(&symbols, &[80.0, 20.0], &types).await;
        let us = first.iter().find(|c| c.country_code == "US").unwrap();
        assert!((us.percentage - 80.0).abs() < 1e-9);

        let second = service.countries(&symbols, &[20.0, 80.0], &types).await;
        let us = second.iter().find(|c| c.country_code == "US").unwrap();
        assert!((us.percentage - 20.0).abs() < 1e-9);
        let global = second.iter().find(|c| c.country_code == "GLOBAL").unwrap();
        assert!((global.percentage - 80.0).abs() < 1e-9);
    }

    #[test]
    fn period_parsing_round_trips() {
        for s in ["1d", "1w", "1mo", "1y", "5y", "ytd"] {
            assert_eq!(TimePeriod::parse(s).map(|p| p.as_str()), Some(s));
        }
        assert!(TimePeriod::parse("2h").is_none());
    }
}
