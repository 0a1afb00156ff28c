//! Core value types shared by the validator, learner and buffer

use serde::{Deserialize, Serialize};

/// A single OHLCV bar. The unit of time in the engine is one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time in milliseconds since the epoch
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// All price fields finite and open/close strictly positive.
    ///
    /// Bars failing this check are treated as not yet available by the validator.
    pub fn has_valid_prices(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
            && self.open > 0.0
            && self.close > 0.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// (high - low) / open, or 0 when open is not positive
    pub fn volatility(&self) -> f64 {
        if self.open > 0.0 {
            (self.high - self.low).abs() / self.open
        } else {
            0.0
        }
    }

    /// |close - open| / open, or 0 when open is not positive
    pub fn body_move(&self) -> f64 {
        if self.open > 0.0 {
            (self.close - self.open).abs() / self.open
        } else {
            0.0
        }
    }
}

/// Directional signal emitted by a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Whether the signal called the direction of `bar` correctly. Hold always counts.
    pub fn matches_direction(&self, bar: &Bar) -> bool {
        match self {
            Signal::Buy => bar.is_bullish(),
            Signal::Sell => bar.is_bearish(),
            Signal::Hold => true,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Buy => write!(f, "buy"),
            Signal::Sell => write!(f, "sell"),
            Signal::Hold => write!(f, "hold"),
        }
    }
}

/// A forecast of the next bar produced by an external forecaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_open: f64,
    pub predicted_high: f64,
    pub predicted_low: f64,
    pub predicted_close: f64,
    pub signal: Signal,
    /// Producer confidence in [0, 1]
    pub confidence: f64,
    pub pattern_label: String,
}

impl Prediction {
    /// Zero-confidence hold that projects `bar` forward unchanged.
    /// Producers return this when they lack the data to forecast.
    pub fn neutral(bar: &Bar) -> Self {
        Self {
            predicted_open: bar.close,
            predicted_high: bar.close,
            predicted_low: bar.close,
            predicted_close: bar.close,
            signal: Signal::Hold,
            confidence: 0.0,
            pattern_label: "Insufficient Data".to_string(),
        }
    }
}

/// Direction implied by a candlestick pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    Bullish,
    Bearish,
    Neutral,
}

impl PatternKind {
    pub fn implied_signal(&self) -> Signal {
        match self {
            PatternKind::Bullish => Signal::Buy,
            PatternKind::Bearish => Signal::Sell,
            PatternKind::Neutral => Signal::Hold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketCondition {
    Volatile,
    Stable,
    Trending,
}

/// Market context around a detected pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternContext {
    pub volume_confirmation: bool,
    pub trend_alignment: bool,
    pub market_condition: MarketCondition,
}

/// A directional signal from a rule-based pattern matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub kind: PatternKind,
    /// Detector score in [0, 1]
    pub strength: f64,
    /// Prior hit rate of this pattern in [0, 1]
    pub historical_accuracy: f64,
    /// Index of the bar the pattern completed on
    pub position: usize,
    pub context: PatternContext,
}

impl PatternMatch {
    /// Arbitration weight of this pattern against a producer signal
    pub fn weight(&self) -> f64 {
        self.strength * self.historical_accuracy
    }
}
