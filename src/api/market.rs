//! Market data endpoints. All of these are public reads parameterized by
//! query strings; `symbols` is a comma-separated list.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::ApiError;
use crate::market::{
    CalendarEvent, ChartPoint, CountryAllocation, FearGreed, Movers, MoversMode, NewsArticle,
    Quote, SearchResult, TimePeriod,
};
use crate::metrics::PortfolioMetrics;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct SymbolsQuery {
    symbols: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    symbols: Option<String>,
    range: Option<String>,
    weights: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    symbols: Option<String>,
    weights: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MoversQuery {
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CountriesQuery {
    symbols: Option<String>,
    weights: Option<String>,
    types: Option<String>,
}

/// Split a required `symbols` parameter, rejecting its absence.
fn require_symbols(param: &Option<String>) -> Result<Vec<String>, ApiError> {
    let raw = param
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("symbols parameter required".to_string()))?;
    Ok(split_csv(raw))
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_weights(param: &Option<String>) -> Option<Vec<f64>> {
    param.as_deref().map(|raw| {
        raw.split(',')
            .filter_map(|w| w.trim().parse::<f64>().ok())
            .filter(|w| w.is_finite())
            .collect()
    })
}

pub async fn quotes(
    State(state): State<AppState>,
    Query(query): Query<SymbolsQuery>,
) -> Result<Json<Vec<Quote>>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    if symbols.is_empty() {
        return Ok(Json(vec![]));
    }
    Ok(Json(state.market.quotes(&symbols).await))
}

pub async fn chart(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Vec<ChartPoint>>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    let period = query
        .range
        .as_deref()
        .and_then(TimePeriod::parse)
        .ok_or_else(|| ApiError::BadRequest("Invalid range parameter".to_string()))?;
    if symbols.is_empty() {
        return Ok(Json(vec![]));
    }
    let weights = parse_weights(&query.weights);

    let points = state
        .market
        .chart(&symbols, period, weights.as_deref())
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(points))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<SearchResult>>, ApiError> {
    let q = query.q.as_deref().map(str::trim).unwrap_or_default();
    if q.is_empty() {
        return Ok(Json(vec![]));
    }
    let results = state.market.search(q).await.map_err(ApiError::Upstream)?;
    Ok(Json(results))
}

pub async fn news(
    State(state): State<AppState>,
    Query(query): Query<SymbolsQuery>,
) -> Result<Json<Vec<NewsArticle>>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    if symbols.is_empty() {
        return Ok(Json(vec![]));
    }
    Ok(Json(state.market.news(&symbols).await))
}

pub async fn calendar(
    State(state): State<AppState>,
    Query(query): Query<SymbolsQuery>,
) -> Result<Json<Vec<CalendarEvent>>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    if symbols.is_empty() {
        return Ok(Json(vec![]));
    }
    Ok(Json(state.market.calendar(&symbols).await))
}

pub async fn metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<PortfolioMetrics>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    if symbols.is_empty() {
        return Err(ApiError::BadRequest("symbols parameter required".to_string()));
    }
    let weights = parse_weights(&query.weights)
        .filter(|w| w.len() == symbols.len())
        .unwrap_or_else(|| vec![100.0 / symbols.len() as f64; symbols.len()]);

    let metrics = state
        .metrics
        .portfolio_metrics(&state.market, &symbols, &weights)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(metrics))
}

pub async fn movers(
    State(state): State<AppState>,
    Query(query): Query<MoversQuery>,
) -> Result<Json<Movers>, ApiError> {
    let mode = MoversMode::parse(query.mode.as_deref().unwrap_or("percent"));
    let movers = state.market.movers(mode).await.map_err(ApiError::Upstream)?;
    Ok(Json(movers))
}

pub async fn fear_greed(State(state): State<AppState>) -> Result<Json<FearGreed>, ApiError> {
    let data = state.market.fear_greed().await.map_err(ApiError::Upstream)?;
    Ok(Json(data))
}

pub async fn countries(
    State(state): State<AppState>,
    Query(query): Query<CountriesQuery>,
) -> Result<Json<Vec<CountryAllocation>>, ApiError> {
    let symbols = require_symbols(&query.symbols)?;
    if symbols.is_empty() {
        return Ok(Json(vec![]));
    }
    let weights = parse_weights(&query.weights)
        .filter(|w| w.len() == symbols.len())
        .unwrap_or_else(|| vec![100.0 / symbols.len() as f64; symbols.len()]);
    let types = query
        .types
        .as_deref()
        .map(split_csv)
        .unwrap_or_default();

    Ok(Json(state.market.countries(&symbols, &weights, &types).await))
}
