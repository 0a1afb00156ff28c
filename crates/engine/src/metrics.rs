//! Shared statistics helpers and trend classifications

use serde::{Deserialize, Serialize};

/// Direction of an accuracy series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceTrend {
    Improving,
    Declining,
    Stable,
}

/// Price direction over a window of bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Bullish,
    Bearish,
    Sideways,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityTrend {
    Increasing,
    Decreasing,
    Stable,
}

/// Arithmetic mean, 0 for an empty input
pub fn mean<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Population variance, 0 for an empty input
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values.iter().copied());
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Means of the first and second half of `values` (split at len / 2).
pub fn half_means(values: &[f64]) -> (f64, f64) {
    let mid = values.len() / 2;
    (
        mean(values[..mid].iter().copied()),
        mean(values[mid..].iter().copied()),
    )
}

/// Classify `delta` against a symmetric threshold
pub fn classify_delta(delta: f64, threshold: f64) -> PerformanceTrend {
    if delta > threshold {
        PerformanceTrend::Improving
    } else if delta < -threshold {
        PerformanceTrend::Declining
    } else {
        PerformanceTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        assert_eq!(mean(Vec::<f64>::new()), 0.0);
        assert_eq!(mean(vec![1.0, 2.0, 3.0]), 2.0);
        assert_eq!(variance(&[]), 0.0);
        assert!((variance(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_half_means() {
        let (first, second) = half_means(&[1.0, 1.0, 3.0, 3.0]);
        assert_eq!(first, 1.0);
        assert_eq!(second, 3.0);
    }

    #[test]
    fn test_classify_delta() {
        assert_eq!(classify_delta(0.06, 0.05), PerformanceTrend::Improving);
        assert_eq!(classify_delta(-0.06, 0.05), PerformanceTrend::Declining);
        assert_eq!(classify_delta(0.05, 0.05), PerformanceTrend::Stable);
    }
}
