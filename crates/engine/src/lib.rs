//! Candle Feedback Engine: prediction validation and online learning
//!
//! Streaming core that scores next-bar forecasts after a confirmation delay
//! and feeds the resulting error back into an incrementally trained model.
//! Provides:
//! - Prediction validator with weighted producer/pattern conflict arbitration
//! - Online learner with reservoir sampling and an adaptive learning rate
//! - Adaptive sliding buffer with importance-weighted eviction
//! - Reference SMA/RSI forecaster, candlestick pattern scanner, and synthetic feed

pub mod buffer;
pub mod config;
pub mod error;
pub mod features;
pub mod feed;
pub mod forecaster;
pub mod learner;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod types;
pub mod validator;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use buffer::{
    AdaptiveBuffer, BufferMetrics, PerformanceSample, RecentPerformanceTrend, VolatilityMetrics,
};
pub use config::{BufferConfig, FeedbackConfig, LearnerConfig, ValidatorConfig};
pub use error::{EngineError, EngineResult};
pub use feed::{Market, SyntheticFeed};
pub use forecaster::{Forecaster, TechnicalForecaster};
pub use learner::{ErrorLearningMetrics, LearnerState, OnlineLearner, OnlineLearningMetrics};
pub use metrics::{MarketTrend, PerformanceTrend, VolatilityTrend};
pub use patterns::PatternScanner;
pub use pipeline::{FeedbackLoop, LoopSnapshot};
pub use types::*;
pub use validator::{
    AccuracyGrade, ConflictResolution, EnhancedValidationMetrics, PendingPrediction,
    PredictionId, PredictionValidator, ValidationResult, ValidationStatus,
};
