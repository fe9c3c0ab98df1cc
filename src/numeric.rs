//! Shared numeric kit: percentiles, moments, correlation, and tail
//! probabilities.
//!
//! Every engine computes through these helpers so that conventions are
//! fixed in one place: percentiles interpolate linearly on the sorted
//! values at position `(n - 1) * fraction`, standard deviations default to
//! the sample convention (ddof = 1), and higher moments use the
//! bias-adjusted estimators (Fisher-Pearson G1, excess kurtosis G2).

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, StudentsT};

use crate::error::{PipelineError, Result};

/// Two-sided 95% normal critical value used for confidence intervals.
pub const Z_95: f64 = 1.96;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Linear-interpolation percentile at `fraction` in `[0, 1]`.
///
/// Sorts a working copy, so callers pass values in any order.
pub fn percentile(values: &[f64], fraction: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&fraction) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = (sorted.len() - 1) as f64 * fraction;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    if below == above {
        return Some(sorted[below]);
    }
    let weight = position - below as f64;
    Some(sorted[below] + weight * (sorted[above] - sorted[below]))
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 0.5)
}

/// Sample variance (ddof = 1); `None` below two observations.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some(sum_sq / (n - 1) as f64)
}

pub fn sample_std(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Population standard deviation (ddof = 0); `None` when empty.
pub fn population_std(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = mean(values)?;
    let sum_sq = values.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    Some((sum_sq / values.len() as f64).sqrt())
}

fn central_moment(values: &[f64], m: f64, order: i32) -> f64 {
    values.iter().map(|v| (v - m).powi(order)).sum::<f64>() / values.len() as f64
}

/// Bias-adjusted sample skewness (G1); `None` below three observations.
pub fn skewness(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 3 {
        return None;
    }
    let m = mean(values)?;
    let m2 = central_moment(values, m, 2);
    if m2 == 0.0 {
        return Some(0.0);
    }
    let m3 = central_moment(values, m, 3);
    let g1 = m3 / m2.powf(1.5);
    let nf = n as f64;
    Some(g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0))
}

/// Bias-adjusted excess kurtosis (G2); `None` below four observations.
pub fn excess_kurtosis(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 4 {
        return None;
    }
    let m = mean(values)?;
    let m2 = central_moment(values, m, 2);
    if m2 == 0.0 {
        return Some(0.0);
    }
    let m4 = central_moment(values, m, 4);
    let g2 = m4 / (m2 * m2) - 3.0;
    let nf = n as f64;
    Some(((nf + 1.0) * g2 + 6.0) * (nf - 1.0) / ((nf - 2.0) * (nf - 3.0)))
}

/// Pearson correlation over aligned pairs; `None` when either side has
/// zero variance or fewer than two pairs remain.
pub fn pearson_r(pairs: &[(f64, f64)]) -> Option<f64> {
    let n = pairs.len();
    if n < 2 {
        return None;
    }
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x * var_y).sqrt())
}

/// Two-sided p-value for a t statistic with `dof` degrees of freedom.
pub fn t_pvalue_two_sided(statistic: f64, dof: f64) -> Result<f64> {
    let dist = StudentsT::new(0.0, 1.0, dof).map_err(|e| {
        PipelineError::InsufficientData(format!("t distribution with dof {dof}: {e}"))
    })?;
    Ok((2.0 * (1.0 - dist.cdf(statistic.abs()))).clamp(0.0, 1.0))
}

/// Upper-tail p-value for a chi-squared statistic.
pub fn chi_squared_pvalue(statistic: f64, dof: f64) -> Result<f64> {
    let dist = ChiSquared::new(dof).map_err(|e| {
        PipelineError::InsufficientData(format!("chi-squared distribution with dof {dof}: {e}"))
    })?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

/// Upper-tail p-value for an F statistic with `d1`/`d2` degrees of freedom.
pub fn f_pvalue(statistic: f64, d1: f64, d2: f64) -> Result<f64> {
    let dist = FisherSnedecor::new(d1, d2).map_err(|e| {
        PipelineError::InsufficientData(format!("F distribution with dof ({d1}, {d2}): {e}"))
    })?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

/// Rounds to `places` decimal places for reported payloads.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
