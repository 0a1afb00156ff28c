//! Online learner
//!
//! Keeps a uniform reservoir sample of every bar seen (Algorithm R) and a
//! logistic weight vector updated in two ways:
//! - once per bar, against the bar's own bullish/bearish label
//! - once per resolved validation, against the signed price error, with L2 shrinkage
//!
//! The learning rate adapts to the trend of recent validation errors.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LearnerConfig;
use crate::features::{self, FEATURE_COUNT};
use crate::metrics::mean;
use crate::types::{Bar, Signal};
use crate::validator::ValidationResult;

/// Errors compared on each side of the learning-rate trend test
const RATE_WINDOW: usize = 10;
const RATE_GROWTH: f64 = 1.05;
const RATE_DECAY: f64 = 0.95;
const L2_SHRINK: f64 = 0.999;
const REINFORCE_SUCCESS: f64 = 0.1;
const REINFORCE_FAILURE: f64 = -0.05;
const TREND_LENGTH: usize = 20;

/// Serializable snapshot of the learner's mutable state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerState {
    pub weights: Vec<f64>,
    pub learning_rate: f64,
    pub error_history: Vec<f64>,
    pub reinforcement: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLearningMetrics {
    pub total_errors: usize,
    pub average_error: f64,
    /// Last 20 errors, oldest first
    pub error_trend: Vec<f64>,
    pub learning_rate: f64,
    pub adaptation_strength: f64,
    /// (older mean - recent mean) / older mean; positive when errors shrink
    pub convergence_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineLearningMetrics {
    pub samples_processed: u64,
    pub reservoir_size: usize,
    pub memory_usage_bytes: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub adaptation_rate: f64,
}

pub struct OnlineLearner {
    config: LearnerConfig,
    rng: StdRng,
    reservoir: Vec<Bar>,
    samples_seen: u64,
    weights: [f64; FEATURE_COUNT],
    learning_rate: f64,
    error_history: VecDeque<f64>,
    reinforcement: HashMap<String, f64>,
    last_update: Option<DateTime<Utc>>,
}

impl OnlineLearner {
    pub fn new(config: LearnerConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Xavier/Glorot uniform initialisation
        let scale = (2.0 / FEATURE_COUNT as f64).sqrt();
        let mut weights = [0.0; FEATURE_COUNT];
        for w in weights.iter_mut() {
            *w = rng.gen_range(-1.0..1.0) * scale;
        }

        Self {
            reservoir: Vec::with_capacity(config.reservoir_capacity.max(1)),
            error_history: VecDeque::with_capacity(config.error_window.max(1)),
            learning_rate: config.initial_learning_rate,
            config,
            rng,
            samples_seen: 0,
            weights,
            reinforcement: HashMap::new(),
            last_update: None,
        }
    }

    /// Observe one bar: reservoir sampling plus one incremental gradient step
    pub fn add_sample(&mut self, bar: Bar) {
        self.samples_seen += 1;

        let capacity = self.config.reservoir_capacity.max(1);
        if self.reservoir.len() < capacity {
            self.reservoir.push(bar);
        } else {
            let slot = self.rng.gen_range(0..self.samples_seen);
            if slot < capacity as u64 {
                self.reservoir[slot as usize] = bar;
            }
        }

        self.incremental_update(&bar);
        self.last_update = Some(Utc::now());
    }

    fn incremental_update(&mut self, bar: &Bar) {
        if !bar.has_valid_prices() {
            return;
        }
        let x = features::extract(bar, self.rng.gen());
        if !features::all_finite(&x) {
            return;
        }

        let label = if bar.is_bullish() { 1.0 } else { 0.0 };
        let error = label - self.predict_features(&x);

        for (w, f) in self.weights.iter_mut().zip(x.iter()) {
            *w += self.learning_rate * error * f;
        }
    }

    /// Error-driven update from a resolved validation.
    /// Results whose confirmation bar is unusable are ignored.
    pub fn learn_from_error(&mut self, validation: &ValidationResult) {
        let error = validation.error_magnitude();
        if !validation.actual_bar.has_valid_prices() || !error.is_finite() {
            debug!(id = %validation.id, "Skipping validation without usable ground truth");
            return;
        }

        if self.error_history.len() >= self.config.error_window.max(1) {
            self.error_history.pop_front();
        }
        self.error_history.push_back(error);

        self.adapt_learning_rate();
        self.reinforce(&validation.prediction.pattern_label, validation.pattern_success);
        self.update_from_error(validation, error);
        self.last_update = Some(Utc::now());

        debug!(
            id = %validation.id,
            error,
            learning_rate = self.learning_rate,
            "Learned from validation error"
        );
    }

    fn adapt_learning_rate(&mut self) {
        let n = self.error_history.len();
        if n <= RATE_WINDOW {
            return;
        }

        let older_start = n.saturating_sub(2 * RATE_WINDOW);
        let recent = mean(self.error_history.iter().skip(n - RATE_WINDOW).copied());
        let older = mean(
            self.error_history
                .iter()
                .skip(older_start)
                .take(n - RATE_WINDOW - older_start)
                .copied(),
        );

        self.learning_rate = if recent > older {
            (self.learning_rate * RATE_GROWTH).min(self.config.max_learning_rate)
        } else {
            (self.learning_rate * RATE_DECAY).max(self.config.min_learning_rate)
        };
    }

    fn reinforce(&mut self, label: &str, success: bool) {
        let delta = if success {
            REINFORCE_SUCCESS
        } else {
            REINFORCE_FAILURE
        };
        *self.reinforcement.entry(label.to_string()).or_insert(0.0) += delta;
    }

    fn update_from_error(&mut self, validation: &ValidationResult, error: f64) {
        let x = features::extract(&validation.actual_bar, self.rng.gen());
        if !features::all_finite(&x) {
            return;
        }

        let direction = if validation.prediction.signal == Signal::Buy {
            1.0
        } else {
            -1.0
        };
        let signed_error = error * direction;

        for (w, f) in self.weights.iter_mut().zip(x.iter()) {
            *w -= self.learning_rate * signed_error * f;
            *w *= L2_SHRINK;
        }
    }

    fn predict_features(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let z: f64 = self.weights.iter().zip(x.iter()).map(|(w, f)| w * f).sum();
        features::sigmoid(z)
    }

    /// Probability that the bar following `recent_bars` closes bullish.
    /// Returns 0.5 without data. Inference uses no noise term.
    pub fn predict_next(&self, recent_bars: &[Bar]) -> f64 {
        match recent_bars.last() {
            Some(bar) => {
                let x = features::extract(bar, 0.0);
                if features::all_finite(&x) {
                    self.predict_features(&x)
                } else {
                    0.5
                }
            }
            None => 0.5,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn samples_seen(&self) -> u64 {
        self.samples_seen
    }

    /// Copy of the current reservoir
    pub fn reservoir_sample(&self) -> Vec<Bar> {
        self.reservoir.clone()
    }

    pub fn reinforcement(&self, label: &str) -> Option<f64> {
        self.reinforcement.get(label).copied()
    }

    pub fn reinforcement_scores(&self) -> HashMap<String, f64> {
        self.reinforcement.clone()
    }

    pub fn state(&self) -> LearnerState {
        LearnerState {
            weights: self.weights.to_vec(),
            learning_rate: self.learning_rate,
            error_history: self.error_history.iter().copied().collect(),
            reinforcement: self.reinforcement.clone(),
        }
    }

    pub fn metrics(&self) -> OnlineLearningMetrics {
        OnlineLearningMetrics {
            samples_processed: self.samples_seen,
            reservoir_size: self.reservoir.len(),
            memory_usage_bytes: self.reservoir.len() * std::mem::size_of::<Bar>(),
            last_update: self.last_update,
            adaptation_rate: self.config.adaptation_rate,
        }
    }

    pub fn error_metrics(&self) -> ErrorLearningMetrics {
        let n = self.error_history.len();
        ErrorLearningMetrics {
            total_errors: n,
            average_error: mean(self.error_history.iter().copied()),
            error_trend: self
                .error_history
                .iter()
                .skip(n.saturating_sub(TREND_LENGTH))
                .copied()
                .collect(),
            learning_rate: self.learning_rate,
            adaptation_strength: self.config.adaptation_rate,
            convergence_rate: self.convergence_rate(),
        }
    }

    fn convergence_rate(&self) -> f64 {
        let n = self.error_history.len();
        if n < 2 * RATE_WINDOW {
            return 0.0;
        }
        let recent = mean(self.error_history.iter().skip(n - RATE_WINDOW).copied());
        let older = mean(
            self.error_history
                .iter()
                .skip(n - 2 * RATE_WINDOW)
                .take(RATE_WINDOW)
                .copied(),
        );
        if older > 0.0 {
            (older - recent) / older
        } else {
            0.0
        }
    }
}
