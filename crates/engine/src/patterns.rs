//! Rule-based candlestick pattern scanner
//!
//! Four fixed detectors score each bar in [0, 1]. Scores above 0.3 become
//! `PatternMatch` values carrying market context and a prior hit rate, which
//! the validator uses as the pattern side of conflict arbitration.

use crate::metrics::{mean, variance};
use crate::types::{Bar, MarketCondition, PatternContext, PatternKind, PatternMatch};

/// Minimum detector score for a match to be reported
pub const MIN_PATTERN_SCORE: f64 = 0.3;

/// Bars before the match considered for market context
pub const CONTEXT_LOOKBACK: usize = 20;
const TREND_BARS: usize = 10;
const VOLUME_CONFIRMATION: f64 = 1.2;
const TREND_ALIGNMENT_SLOPE: f64 = 0.001;
const TRENDING_SLOPE: f64 = 0.002;
const VOLATILE_RETURN_STD: f64 = 0.03;
const DEFAULT_ACCURACY: f64 = 0.6;

// ============================================================================
// Rules
// ============================================================================

struct PatternRule {
    name: &'static str,
    kind: PatternKind,
    min_bars: usize,
    historical_accuracy: f64,
    detector: fn(&[Bar], usize) -> f64,
}

static RULES: [PatternRule; 4] = [
    PatternRule {
        name: "Strong Bullish Reversal",
        kind: PatternKind::Bullish,
        min_bars: 3,
        historical_accuracy: 0.72,
        detector: bullish_reversal,
    },
    PatternRule {
        name: "Momentum Breakout",
        kind: PatternKind::Bullish,
        min_bars: 5,
        historical_accuracy: 0.68,
        detector: momentum_breakout,
    },
    PatternRule {
        name: "Consolidation End",
        kind: PatternKind::Neutral,
        min_bars: 10,
        historical_accuracy: 0.55,
        detector: consolidation_end,
    },
    PatternRule {
        name: "Strong Bearish Reversal",
        kind: PatternKind::Bearish,
        min_bars: 3,
        historical_accuracy: 0.71,
        detector: bearish_reversal,
    },
];

/// Prior hit rate for a pattern name (0.6 for unknown names)
pub fn historical_accuracy(name: &str) -> f64 {
    RULES
        .iter()
        .find(|r| r.name == name)
        .map_or(DEFAULT_ACCURACY, |r| r.historical_accuracy)
}

fn range(bar: &Bar) -> f64 {
    bar.high - bar.low
}

fn body(bar: &Bar) -> f64 {
    (bar.close - bar.open).abs()
}

/// Large red bar, small indecision bar, then a green bar closing above the first open
fn bullish_reversal(bars: &[Bar], index: usize) -> f64 {
    let (first, middle, last) = (&bars[index - 2], &bars[index - 1], &bars[index]);

    let big_red = first.is_bearish() && first.open - first.close > range(first) * 0.6;
    let small = body(middle) < range(middle) * 0.3;
    let green = last.is_bullish() && last.close > first.open;

    if big_red && small && green {
        let reversal = (last.close - first.close) / first.close * 10.0;
        let volume = last.volume / first.volume;
        reversal.min(volume).min(1.0)
    } else {
        0.0
    }
}

/// Large green bar, small indecision bar, then a red bar closing below the first open
fn bearish_reversal(bars: &[Bar], index: usize) -> f64 {
    let (first, middle, last) = (&bars[index - 2], &bars[index - 1], &bars[index]);

    let big_green = first.is_bullish() && first.close - first.open > range(first) * 0.6;
    let small = body(middle) < range(middle) * 0.3;
    let red = last.is_bearish() && last.close < first.open;

    if big_green && small && red {
        let reversal = (first.close - last.close) / first.close * 10.0;
        let volume = last.volume / first.volume;
        reversal.min(volume).min(1.0)
    } else {
        0.0
    }
}

/// Close above the prior four highs on 1.5× average volume
fn momentum_breakout(bars: &[Bar], index: usize) -> f64 {
    let recent = &bars[index - 4..=index];
    let avg_volume = mean(recent.iter().map(|b| b.volume));
    let current = &recent[4];

    let prior_high = recent[..4]
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);

    if current.close > prior_high && current.volume > avg_volume * 1.5 {
        (current.volume / avg_volume * 0.3).min(0.9)
    } else {
        0.0
    }
}

/// Ten bars inside a 2% close range, with the last bar's volume 1.3× the earlier average
fn consolidation_end(bars: &[Bar], index: usize) -> f64 {
    let recent = &bars[index - 9..=index];
    let closes: Vec<f64> = recent.iter().map(|b| b.close).collect();
    let max = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = closes.iter().copied().fold(f64::INFINITY, f64::min);
    let avg_price = mean(closes.iter().copied());

    let consolidating = (max - min) / avg_price < 0.02;
    let avg_volume = mean(recent[..8].iter().map(|b| b.volume));
    let volume_increase = recent[9].volume > avg_volume * 1.3;

    if consolidating && volume_increase {
        0.7
    } else {
        0.0
    }
}

// ============================================================================
// Scanner
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct PatternScanner;

impl PatternScanner {
    pub fn new() -> Self {
        Self
    }

    /// Every match across the whole series, strongest first
    pub fn scan(&self, bars: &[Bar]) -> Vec<PatternMatch> {
        let mut matches: Vec<PatternMatch> =
            (0..bars.len()).flat_map(|i| self.matches_at(bars, i)).collect();
        sort_by_strength(&mut matches);
        matches
    }

    /// Matches completing on the bar at `index`, strongest first
    pub fn scan_at(&self, bars: &[Bar], index: usize) -> Vec<PatternMatch> {
        let mut matches = self.matches_at(bars, index);
        sort_by_strength(&mut matches);
        matches
    }

    fn matches_at(&self, bars: &[Bar], index: usize) -> Vec<PatternMatch> {
        if index >= bars.len() {
            return Vec::new();
        }

        RULES
            .iter()
            .filter(|rule| index + 1 >= rule.min_bars)
            .filter_map(|rule| {
                let score = (rule.detector)(bars, index);
                if !score.is_finite() || score <= MIN_PATTERN_SCORE {
                    return None;
                }
                Some(PatternMatch {
                    name: rule.name.to_string(),
                    kind: rule.kind,
                    strength: score,
                    historical_accuracy: rule.historical_accuracy,
                    position: index,
                    context: analyze_context(bars, index),
                })
            })
            .collect()
    }
}

fn sort_by_strength(matches: &mut [PatternMatch]) {
    matches.sort_by(|a, b| b.strength.total_cmp(&a.strength));
}

/// Relative close change per bar between the first and last bar
fn trend_slope(bars: &[Bar]) -> f64 {
    if bars.len() < 2 {
        return 0.0;
    }
    let first = bars[0].close;
    let last = bars[bars.len() - 1].close;
    let slope = (last - first) / first / bars.len() as f64;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

fn return_std(bars: &[Bar]) -> f64 {
    let returns: Vec<f64> = bars
        .windows(2)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .filter(|r| r.is_finite())
        .collect();
    variance(&returns).sqrt()
}

fn analyze_context(bars: &[Bar], index: usize) -> PatternContext {
    let window = &bars[index.saturating_sub(CONTEXT_LOOKBACK)..=index];
    let avg_volume = mean(window.iter().map(|b| b.volume));
    let slope = trend_slope(&window[window.len().saturating_sub(TREND_BARS)..]);

    let market_condition = if return_std(window) > VOLATILE_RETURN_STD {
        MarketCondition::Volatile
    } else if slope.abs() > TRENDING_SLOPE {
        MarketCondition::Trending
    } else {
        MarketCondition::Stable
    };

    PatternContext {
        volume_confirmation: bars[index].volume > avg_volume * VOLUME_CONFIRMATION,
        trend_alignment: slope.abs() > TREND_ALIGNMENT_SLOPE,
        market_condition,
    }
}
