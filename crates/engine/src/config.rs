//! Configuration for the feedback loop components

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Prediction validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Bars a prediction waits before it is scored (default: 5)
    pub confirmation_delay: usize,
    /// Completed validations kept in history (default: 1000)
    pub history_capacity: usize,
    /// Pending entries older than this many bars are dropped (default: 50)
    pub stale_after_bars: usize,
    /// Pending entries older than this wall-clock age are dropped (default: disabled)
    pub stale_timeout_secs: Option<u64>,
    /// Combined accuracy above which a validation counts as successful (default: 0.6)
    pub success_threshold: f64,
    /// Relative price error is multiplied by this before being subtracted from 1 (default: 5)
    pub price_error_scale: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            confirmation_delay: 5,
            history_capacity: 1000,
            stale_after_bars: 50,
            stale_timeout_secs: None,
            success_threshold: 0.6,
            price_error_scale: 5.0,
        }
    }
}

/// Online learner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Reservoir sample size (default: 1000)
    pub reservoir_capacity: usize,
    pub initial_learning_rate: f64,
    pub min_learning_rate: f64,
    pub max_learning_rate: f64,
    /// Error history length (default: 100)
    pub error_window: usize,
    /// Reported adaptation strength (default: 0.1)
    pub adaptation_rate: f64,
    /// Fixed RNG seed; entropy-seeded when absent
    pub seed: Option<u64>,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            reservoir_capacity: 1000,
            initial_learning_rate: 0.01,
            min_learning_rate: 0.001,
            max_learning_rate: 0.1,
            error_window: 100,
            adaptation_rate: 0.1,
            seed: None,
        }
    }
}

/// Adaptive sliding buffer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Maximum bars held (default: 2000)
    pub capacity: usize,
    /// Maximum performance samples held (default: 100)
    pub performance_capacity: usize,
    /// Share of capacity evicted per cleanup (default: 0.1)
    pub eviction_fraction: f64,
    /// Wall-clock interval between maintenance passes (default: 5 min)
    pub maintenance_interval_secs: u64,
    /// Performance samples older than this are dropped during maintenance (default: 24h)
    pub performance_max_age_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 2000,
            performance_capacity: 100,
            eviction_fraction: 0.1,
            maintenance_interval_secs: 5 * 60,
            performance_max_age_secs: 24 * 60 * 60,
        }
    }
}

/// Full feedback loop configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub validator: ValidatorConfig,
    pub learner: LearnerConfig,
    pub buffer: BufferConfig,
}

impl FeedbackConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let config: FeedbackConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        let v = &self.validator;
        if v.history_capacity == 0 {
            return Err(EngineError::invalid("validator.history_capacity", "must be > 0"));
        }
        if v.stale_after_bars <= v.confirmation_delay {
            return Err(EngineError::invalid(
                "validator.stale_after_bars",
                format!("must exceed confirmation_delay ({})", v.confirmation_delay),
            ));
        }
        if v.stale_timeout_secs == Some(0) {
            return Err(EngineError::invalid(
                "validator.stale_timeout_secs",
                "must be > 0 when set",
            ));
        }
        if !(v.price_error_scale.is_finite() && v.price_error_scale > 0.0) {
            return Err(EngineError::invalid("validator.price_error_scale", "must be > 0"));
        }
        if !(0.0..=1.0).contains(&v.success_threshold) {
            return Err(EngineError::invalid(
                "validator.success_threshold",
                "must be within [0, 1]",
            ));
        }

        let l = &self.learner;
        if l.reservoir_capacity == 0 {
            return Err(EngineError::invalid("learner.reservoir_capacity", "must be > 0"));
        }
        if l.error_window == 0 {
            return Err(EngineError::invalid("learner.error_window", "must be > 0"));
        }
        if !(l.min_learning_rate > 0.0 && l.min_learning_rate <= l.max_learning_rate) {
            return Err(EngineError::invalid(
                "learner.min_learning_rate",
                "must be positive and not above max_learning_rate",
            ));
        }
        if !(l.min_learning_rate..=l.max_learning_rate).contains(&l.initial_learning_rate) {
            return Err(EngineError::invalid(
                "learner.initial_learning_rate",
                "must lie between min and max learning rate",
            ));
        }

        let b = &self.buffer;
        if b.capacity == 0 {
            return Err(EngineError::invalid("buffer.capacity", "must be > 0"));
        }
        if b.performance_capacity == 0 {
            return Err(EngineError::invalid("buffer.performance_capacity", "must be > 0"));
        }
        if !(b.eviction_fraction > 0.0 && b.eviction_fraction <= 1.0) {
            return Err(EngineError::invalid(
                "buffer.eviction_fraction",
                "must be within (0, 1]",
            ));
        }

        Ok(())
    }
}
