//! Bar feature extraction for the online learner

use std::f64::consts::TAU;

use crate::types::Bar;

pub const FEATURE_COUNT: usize = 15;

const DAY_MS: f64 = 86_400_000.0;
const WEEK_MS: f64 = 604_800_000.0;
const NOISE_AMPLITUDE: f64 = 0.05;

/// Ratio that degrades to 0 instead of producing inf/NaN
fn ratio(numerator: f64, denominator: f64) -> f64 {
    let r = numerator / denominator;
    if r.is_finite() {
        r
    } else {
        0.0
    }
}

/// Extract the fixed-length feature vector for `bar`.
///
/// `noise` is a uniform sample in [0, 1) supplied by the caller's RNG and
/// scaled into a small regularising term.
pub fn extract(bar: &Bar, noise: f64) -> [f64; FEATURE_COUNT] {
    let body = (bar.close - bar.open).abs();
    let range = bar.high - bar.low;
    let upper_shadow = bar.high - bar.open.max(bar.close);
    let lower_shadow = bar.open.min(bar.close) - bar.low;
    let ts = bar.timestamp as f64;

    [
        ratio(body, range),
        ratio(upper_shadow, range),
        ratio(lower_shadow, range),
        bar.volume / 10_000.0,
        ratio(bar.close, bar.open),
        ratio(range, bar.open),
        (bar.volume.max(0.0) + 1.0).ln(),
        (TAU * ts / DAY_MS).sin(),
        (TAU * ts / DAY_MS).cos(),
        (TAU * ts / WEEK_MS).sin(),
        (TAU * ts / WEEK_MS).cos(),
        bar.open / 1000.0,
        ratio(bar.high, bar.low),
        ratio(body, bar.volume) * 10_000.0,
        noise * NOISE_AMPLITUDE,
    ]
}

pub fn all_finite(features: &[f64]) -> bool {
    features.iter().all(|f| f.is_finite())
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadow_ratios() {
        let bar = Bar::new(0, 100.0, 110.0, 90.0, 105.0, 5000.0);
        let f = extract(&bar, 0.0);
        assert!((f[0] - 0.25).abs() < 1e-12);
        assert!((f[1] - 0.25).abs() < 1e-12);
        assert!((f[2] - 0.5).abs() < 1e-12);
        assert!((f[3] - 0.5).abs() < 1e-12);
        assert_eq!(f[14], 0.0);
    }

    #[test]
    fn test_degenerate_bar_stays_finite() {
        let bar = Bar::new(0, 100.0, 100.0, 100.0, 100.0, 0.0);
        let f = extract(&bar, 0.5);
        assert!(all_finite(&f));
        assert_eq!(f[0], 0.0);
        assert_eq!(f[13], 0.0);
    }

    #[test]
    fn test_sigmoid_bounds() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(50.0) > 0.99);
        assert!(sigmoid(-50.0) < 0.01);
    }
}
