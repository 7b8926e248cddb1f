//! Portfolio risk metrics engine.
//!
//! Builds a weighted daily return series from one year of closes per
//! instrument, aligns it with the benchmark by date intersection, and
//! derives the risk statistics served by the metrics endpoint.

pub mod risk;

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::market::cache::TtlCache;
use crate::market::{yahoo, MarketService};

const BENCHMARK_SYMBOL: &str = "^GSPC";
const DAY_SECS: i64 = 86_400;

/// Risk statistics for a weighted symbol set. Every field is optional;
/// a metric is omitted when the data cannot support it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioMetrics {
    pub pe_ratio: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    pub beta: Option<f64>,
    pub alpha: Option<f64>,
    pub sortino_ratio: Option<f64>,
    pub treynor_ratio: Option<f64>,
    pub calmar_ratio: Option<f64>,
}

pub struct MetricsEngine {
    risk_free_rate: f64,
    cache: TtlCache<PortfolioMetrics>,
}

impl MetricsEngine {
    pub fn new(risk_free_rate: f64) -> Self {
        Self {
            risk_free_rate,
            cache: TtlCache::new(Duration::from_secs(10 * 60)),
        }
    }

    /// Compute metrics for a weighted symbol set. Weights are percentages
    /// aligned with `symbols`; symbols whose history cannot be fetched are
    /// dropped and the remaining weights re-based.
    pub async fn portfolio_metrics(
        &self,
        market: &MarketService,
        symbols: &[String],
        weights: &[f64],
    ) -> Result<PortfolioMetrics> {
        let key = format!(
            "{}:{}",
            symbols.join(","),
            weights.iter().map(|w| w.to_string()).collect::<Vec<_>>().join(",")
        );
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let now = Utc::now().timestamp();
        let period1 = now - 365 * DAY_SECS;

        let benchmark_fut = yahoo::fetch_chart(market.client(), BENCHMARK_SYMBOL, period1, now, "1d");
        let charts_fut = join_all(
            symbols
                .iter()
                .map(|s| yahoo::fetch_chart(market.client(), s, period1, now, "1d")),
        );
        let (benchmark, charts) = tokio::join!(benchmark_fut, charts_fut);

        let benchmark = close_map(&benchmark?);

        let mut series: Vec<BTreeMap<NaiveDate, f64>> = Vec::new();
        let mut kept_weights: Vec<f64> = Vec::new();
        for (i, chart) in charts.into_iter().enumerate() {
            match chart {
                Ok(chart) => {
                    let closes = close_map(&chart);
                    if !closes.is_empty() {
                        series.push(closes);
                        kept_weights.push(weights.get(i).copied().unwrap_or(0.0));
                    }
                }
                Err(e) => log::warn!("Metrics history failed for {}: {}", symbols[i], e),
            }
        }

        if series.is_empty() {
            return Err(anyhow!("No price history available for any symbol"));
        }

        let mut all = series.clone();
        all.push(benchmark.clone());
        let dates = common_dates(&all);
        if dates.len() < 3 {
            return Err(anyhow!("Insufficient overlapping history"));
        }

        let aligned: Vec<Vec<f64>> = series
            .iter()
            .map(|s| dates.iter().map(|d| s[d]).collect())
            .collect();
        let benchmark_closes: Vec<f64> = dates.iter().map(|d| benchmark[d]).collect();

        let portfolio = portfolio_returns(&aligned, &kept_weights);
        let benchmark_ret = risk::daily_returns(&benchmark_closes);

        let beta = risk::beta(&portfolio, &benchmark_ret);
        let metrics = PortfolioMetrics {
            pe_ratio: self.weighted_pe(market, symbols, weights).await,
            sharpe_ratio: risk::sharpe_ratio(&portfolio, self.risk_free_rate),
            beta,
            alpha: beta
                .and_then(|b| risk::alpha(&portfolio, &benchmark_ret, b, self.risk_free_rate)),
            sortino_ratio: risk::sortino_ratio(&portfolio, self.risk_free_rate),
            treynor_ratio: beta
                .and_then(|b| risk::treynor_ratio(&portfolio, b, self.risk_free_rate)),
            calmar_ratio: risk::calmar_ratio(&portfolio),
        };

        self.cache.insert(key, metrics.clone());
        Ok(metrics)
    }

    /// Weight-averaged trailing P/E over the symbols that report one.
    async fn weighted_pe(
        &self,
        market: &MarketService,
        symbols: &[String],
        weights: &[f64],
    ) -> Option<f64> {
        let summaries = join_all(
            symbols
                .iter()
                .map(|s| yahoo::fetch_quote_summary(market.client(), s, "summaryDetail")),
        )
        .await;

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (i, summary) in summaries.into_iter().enumerate() {
            let pe = summary.ok().as_ref().and_then(|s| {
                s.get("summaryDetail")
                    .and_then(|d| d.get("trailingPE"))
                    .and_then(yahoo::raw_value)
            });
            if let Some(pe) = pe.filter(|pe| *pe > 0.0) {
                let w = weights.get(i).copied().unwrap_or(0.0);
                weighted_sum += pe * w;
                total_weight += w;
            }
        }

        if total_weight > 0.0 {
            Some(weighted_sum / total_weight)
        } else {
            None
        }
    }
}

/// Date-indexed closes from a chart series.
fn close_map(chart: &yahoo::ChartData) -> BTreeMap<NaiveDate, f64> {
    chart
        .timestamps
        .iter()
        .zip(chart.closes.iter())
        .filter_map(|(ts, close)| {
            chrono::DateTime::from_timestamp(*ts, 0).map(|dt| (dt.date_naive(), *close))
        })
        .collect()
}

/// Dates present in every series, ascending.
fn common_dates(series: &[BTreeMap<NaiveDate, f64>]) -> Vec<NaiveDate> {
    let first = match series.first() {
        Some(first) => first,
        None => return vec![],
    };
    first
        .keys()
        .filter(|d| series.iter().all(|s| s.contains_key(*d)))
        .copied()
        .collect()
}

/// Weighted daily return series from aligned per-instrument closes.
fn portfolio_returns(aligned_closes: &[Vec<f64>], weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || aligned_closes.is_empty() {
        return vec![];
    }

    let per_instrument: Vec<Vec<f64>> = aligned_closes
        .iter()
        .map(|closes| risk::daily_returns(closes))
        .collect();
    let len = per_instrument.iter().map(Vec::len).min().unwrap_or(0);

    (0..len)
        .map(|t| {
            per_instrument
                .iter()
                .zip(weights.iter())
                .map(|(returns, w)| returns[t] * w / total)
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn common_dates_is_intersection() {
        let a: BTreeMap<_, _> = [(date(1), 1.0), (date(2), 2.0), (date(3), 3.0)].into();
        let b: BTreeMap<_, _> = [(date(2), 1.0), (date(3), 2.0), (date(4), 3.0)].into();
        assert_eq!(common_dates(&[a, b]), vec![date(2), date(3)]);
    }

    #[test]
    fn mirror_returns_cancel_under_equal_weights() {
        // One instrument up 10%, the other down by the same return
        let up = vec![100.0, 110.0];
        let down = vec![100.0, 90.0];
        let returns = portfolio_returns(&[up, down], &[50.0, 50.0]);
        assert_eq!(returns.len(), 1);
        assert!(returns[0].abs() < 1e-12);
    }

    #[test]
    fn weights_scale_contribution() {
        let up = vec![100.0, 110.0];
        let flat = vec![100.0, 100.0];
        let returns = portfolio_returns(&[up, flat], &[75.0, 25.0]);
        assert!((returns[0] - 0.075).abs() < 1e-12);
    }

    #[test]
    fn zero_total_weight_yields_empty_series() {
        let up = vec![100.0, 110.0];
        assert!(portfolio_returns(&[up], &[0.0]).is_empty());
    }
}
