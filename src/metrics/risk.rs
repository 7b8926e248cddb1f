//! Risk and risk-adjusted return statistics.
//!
//! All functions operate on daily return series and annualize on 252
//! trading days. Results are `None` when the inputs cannot support the
//! statistic (fewer than two observations, zero variance, zero beta).

pub const TRADING_DAYS: f64 = 252.0;

/// Daily returns from a close series: r_t = p_t / p_{t-1} - 1.
///
/// Always yields exactly `closes.len() - 1` entries so that series built
/// from date-aligned closes stay aligned with each other; a pair with a
/// non-positive previous close maps to a 0 return instead of being
/// dropped.
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance.
fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    if values.len() < 2 {
        return None;
    }
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Annualized return from daily returns.
pub fn annualized_return(returns: &[f64]) -> Option<f64> {
    mean(returns).map(|m| m * TRADING_DAYS)
}

/// Sharpe ratio: (R_p - R_f) / sigma_p, annualized.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    let annual_return = annualized_return(returns)?;
    let annual_vol = std_dev(returns)? * TRADING_DAYS.sqrt();
    if annual_vol == 0.0 {
        return None;
    }
    Some((annual_return - risk_free_rate) / annual_vol)
}

/// Sortino ratio: like Sharpe but penalizing only downside deviation
/// against a 0% daily target.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let annual_return = annualized_return(returns)?;
    let downside_sq: f64 = returns.iter().map(|r| r.min(0.0).powi(2)).sum();
    let downside_dev = (downside_sq / returns.len() as f64).sqrt() * TRADING_DAYS.sqrt();
    if downside_dev == 0.0 {
        return None;
    }
    Some((annual_return - risk_free_rate) / downside_dev)
}

/// Beta of the portfolio against a benchmark: cov(r_p, r_m) / var(r_m).
/// Series must be aligned to the same dates.
pub fn beta(portfolio: &[f64], benchmark: &[f64]) -> Option<f64> {
    let n = portfolio.len().min(benchmark.len());
    if n < 2 {
        return None;
    }
    let p = &portfolio[..n];
    let m = &benchmark[..n];

    let mean_p = mean(p)?;
    let mean_m = mean(m)?;

    let cov: f64 = p
        .iter()
        .zip(m.iter())
        .map(|(rp, rm)| (rp - mean_p) * (rm - mean_m))
        .sum::<f64>()
        / n as f64;
    let var_m = variance(m)?;

    if var_m == 0.0 {
        return None;
    }
    Some(cov / var_m)
}

/// Jensen's alpha in percent: R_p - (R_f + beta * (R_m - R_f)).
pub fn alpha(
    portfolio_returns: &[f64],
    benchmark_returns: &[f64],
    beta: f64,
    risk_free_rate: f64,
) -> Option<f64> {
    let rp = annualized_return(portfolio_returns)?;
    let rm = annualized_return(benchmark_returns)?;
    Some((rp - (risk_free_rate + beta * (rm - risk_free_rate))) * 100.0)
}

/// Treynor ratio: (R_p - R_f) / beta.
pub fn treynor_ratio(returns: &[f64], beta: f64, risk_free_rate: f64) -> Option<f64> {
    if beta == 0.0 {
        return None;
    }
    let annual_return = annualized_return(returns)?;
    Some((annual_return - risk_free_rate) / beta)
}

/// Maximum drawdown of the cumulative growth-of-1 curve, as a positive
/// fraction (0.25 = 25% peak-to-trough loss).
pub fn max_drawdown(returns: &[f64]) -> Option<f64> {
    if returns.is_empty() {
        return None;
    }

    let mut value = 1.0;
    let mut peak = 1.0;
    let mut max_dd = 0.0;

    for r in returns {
        value *= 1.0 + r;
        if value > peak {
            peak = value;
        }
        let dd = (peak - value) / peak;
        if dd > max_dd {
            max_dd = dd;
        }
    }

    Some(max_dd)
}

/// Calmar ratio: annualized return over maximum drawdown.
pub fn calmar_ratio(returns: &[f64]) -> Option<f64> {
    let annual_return = annualized_return(returns)?;
    let dd = max_drawdown(returns)?;
    if dd == 0.0 {
        return None;
    }
    Some(annual_return / dd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_returns_basic() {
        let returns = daily_returns(&[100.0, 110.0, 99.0]);
        assert!((returns[0] - 0.1).abs() < 1e-12);
        assert!((returns[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn daily_returns_length_is_stable_with_bad_closes() {
        // A non-positive close must not shorten the series, otherwise
        // two series aligned by date would drift against each other
        let returns = daily_returns(&[100.0, 0.0, 110.0, 121.0]);
        assert_eq!(returns.len(), 3);
        assert!((returns[0] + 1.0).abs() < 1e-12);
        assert_eq!(returns[1], 0.0);
        assert!((returns[2] - 0.1).abs() < 1e-12);

        let clean = daily_returns(&[100.0, 110.0, 121.0]);
        assert_eq!(clean.len(), 2);
    }

    #[test]
    fn constant_returns_have_no_sharpe() {
        // Zero variance, the ratio is undefined
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.04), None);
    }

    #[test]
    fn sharpe_matches_hand_computation() {
        let returns = [0.01, -0.01];
        // mean 0, std 0.01, annualized: (0 - 0.04) / (0.01 * sqrt(252))
        let expected = -0.04 / (0.01 * TRADING_DAYS.sqrt());
        let sharpe = sharpe_ratio(&returns, 0.04).unwrap();
        assert!((sharpe - expected).abs() < 1e-12);
    }

    #[test]
    fn all_positive_returns_have_no_sortino() {
        assert_eq!(sortino_ratio(&[0.01, 0.02, 0.03], 0.04), None);
    }

    #[test]
    fn sortino_counts_only_downside() {
        let returns = [0.02, -0.01, 0.0, -0.01];
        let downside_dev = (0.0002f64 / 4.0).sqrt() * TRADING_DAYS.sqrt();
        let expected = (0.0 * TRADING_DAYS - 0.04) / downside_dev;
        let sortino = sortino_ratio(&returns, 0.04).unwrap();
        assert!((sortino - expected).abs() < 1e-9);
    }

    #[test]
    fn doubled_benchmark_returns_give_beta_two() {
        let benchmark = [0.01, -0.02, 0.015, 0.005];
        let portfolio: Vec<f64> = benchmark.iter().map(|r| r * 2.0).collect();
        let b = beta(&portfolio, &benchmark).unwrap();
        assert!((b - 2.0).abs() < 1e-12);
    }

    #[test]
    fn flat_benchmark_has_no_beta() {
        assert_eq!(beta(&[0.01, -0.01], &[0.0, 0.0]), None);
    }

    #[test]
    fn matching_benchmark_with_unit_beta_gives_zero_alpha() {
        let returns = [0.01, -0.005, 0.002];
        let a = alpha(&returns, &returns, 1.0, 0.04).unwrap();
        assert!(a.abs() < 1e-9);
    }

    #[test]
    fn max_drawdown_tracks_peak_to_trough() {
        // Curve: 1.1, 0.55, 0.66; peak 1.1, trough 0.55
        let dd = max_drawdown(&[0.1, -0.5, 0.2]).unwrap();
        assert!((dd - 0.5).abs() < 1e-12);
    }

    #[test]
    fn monotonic_growth_has_zero_drawdown_and_no_calmar() {
        let returns = [0.01, 0.02, 0.01];
        assert_eq!(max_drawdown(&returns), Some(0.0));
        assert_eq!(calmar_ratio(&returns), None);
    }

    #[test]
    fn treynor_requires_nonzero_beta() {
        assert_eq!(treynor_ratio(&[0.01, 0.02], 0.0, 0.04), None);
        let t = treynor_ratio(&[0.01, -0.01], 0.5, 0.04).unwrap();
        assert!((t - (0.0 - 0.04) / 0.5).abs() < 1e-12);
    }
}
