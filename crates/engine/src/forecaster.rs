//! Reference next-bar forecaster
//!
//! Bar-by-bar SMA(5/10/20) + RSI(14) trend follower that emits a full
//! `Prediction` for the next bar. It stands in for an external producer and
//! makes no claim to predictive skill.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ta::indicators::{RelativeStrengthIndex, SimpleMovingAverage};
use ta::{Next, Reset};

use crate::error::{EngineError, EngineResult};
use crate::metrics::variance;
use crate::types::{Bar, Prediction, Signal};

/// Bars needed before the slowest average is meaningful
pub const WARMUP_BARS: usize = 20;

const FAST_PERIOD: usize = 5;
const MID_PERIOD: usize = 10;
const SLOW_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

const BASE_CONFIDENCE: f64 = 0.68;
const CONFIDENCE_SPREAD: f64 = 0.2;
const RANGE_FACTOR: f64 = 0.8;

/// Trait for bar-by-bar next-bar forecasting
pub trait Forecaster: Send {
    fn name(&self) -> &str;
    fn on_bar(&mut self, bar: &Bar) -> Prediction;
    fn reset(&mut self);
}

fn indicator_err(e: impl std::fmt::Debug) -> EngineError {
    EngineError::Indicator(format!("{:?}", e))
}

pub struct TechnicalForecaster {
    sma_fast: SimpleMovingAverage,
    sma_mid: SimpleMovingAverage,
    sma_slow: SimpleMovingAverage,
    rsi: RelativeStrengthIndex,
    window: VecDeque<f64>,
    rng: StdRng,
    seed: Option<u64>,
}

impl TechnicalForecaster {
    pub fn new(seed: Option<u64>) -> EngineResult<Self> {
        Ok(Self {
            sma_fast: SimpleMovingAverage::new(FAST_PERIOD).map_err(indicator_err)?,
            sma_mid: SimpleMovingAverage::new(MID_PERIOD).map_err(indicator_err)?,
            sma_slow: SimpleMovingAverage::new(SLOW_PERIOD).map_err(indicator_err)?,
            rsi: RelativeStrengthIndex::new(RSI_PERIOD).map_err(indicator_err)?,
            window: VecDeque::with_capacity(WARMUP_BARS),
            rng: Self::make_rng(seed),
            seed,
        })
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Standard deviation of close-to-close returns over the window, in price units
    fn volatility(&self) -> f64 {
        let returns: Vec<f64> = self
            .window
            .iter()
            .zip(self.window.iter().skip(1))
            .map(|(prev, next)| (next - prev) / prev)
            .filter(|r| r.is_finite())
            .collect();
        let last = self.window.back().copied().unwrap_or(0.0);
        variance(&returns).sqrt() * last
    }
}

impl Forecaster for TechnicalForecaster {
    fn name(&self) -> &str {
        "SMA/RSI Trend"
    }

    fn on_bar(&mut self, bar: &Bar) -> Prediction {
        let close = bar.close;
        let sma5 = self.sma_fast.next(close);
        let sma10 = self.sma_mid.next(close);
        let sma20 = self.sma_slow.next(close);
        let rsi = self.rsi.next(close);

        if self.window.len() == WARMUP_BARS {
            self.window.pop_front();
        }
        self.window.push_back(close);

        if self.window.len() < WARMUP_BARS {
            return Prediction::neutral(bar);
        }

        let (signal, label) = if sma5 > sma10 && sma10 > sma20 && rsi < RSI_OVERBOUGHT {
            (Signal::Buy, "Bullish Trend")
        } else if sma5 < sma10 && sma10 < sma20 && rsi > RSI_OVERSOLD {
            (Signal::Sell, "Bearish Trend")
        } else {
            (Signal::Hold, "Consolidation")
        };

        let volatility = self.volatility();
        let first = self.window.front().copied().unwrap_or(close);
        let trend = (close - first) / WARMUP_BARS as f64;

        let open = close;
        let predicted_close = open + trend + (self.rng.gen::<f64>() - 0.5) * volatility;
        let range = volatility * RANGE_FACTOR;
        let high = open.max(predicted_close) + range * self.rng.gen::<f64>();
        let low = open.min(predicted_close) - range * self.rng.gen::<f64>();

        Prediction {
            predicted_open: open,
            predicted_high: high,
            predicted_low: low,
            predicted_close,
            signal,
            confidence: BASE_CONFIDENCE + self.rng.gen::<f64>() * CONFIDENCE_SPREAD,
            pattern_label: label.to_string(),
        }
    }

    fn reset(&mut self) {
        self.sma_fast.reset();
        self.sma_mid.reset();
        self.sma_slow.reset();
        self.rsi.reset();
        self.window.clear();
        self.rng = Self::make_rng(self.seed);
    }
}
