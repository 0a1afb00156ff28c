//! Feedback loop orchestration
//!
//! Wires one validator, learner and buffer together. Per bar, data flows in a
//! single direction: validator (resolve due predictions) → learner (learn from
//! each resolved error) → buffer (performance sample) → learner and buffer
//! (store the bar).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::buffer::{AdaptiveBuffer, BufferMetrics, RecentPerformanceTrend, VolatilityMetrics};
use crate::config::FeedbackConfig;
use crate::error::EngineResult;
use crate::learner::{ErrorLearningMetrics, LearnerState, OnlineLearner, OnlineLearningMetrics};
use crate::metrics::MarketTrend;
use crate::patterns::CONTEXT_LOOKBACK;
use crate::types::{Bar, PatternMatch, Prediction};
use crate::validator::{
    EnhancedValidationMetrics, PredictionId, PredictionValidator, ValidationResult,
    REACTION_LOOKBACK,
};

/// Recent bars kept for scoring and pattern context. Older bars are dropped
/// once twice this many have accumulated.
pub const RETAINED_BARS: usize = 64;

/// Point-in-time view of every metric family, suitable for export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub bars_processed: usize,
    pub validation: EnhancedValidationMetrics,
    pub error_learning: ErrorLearningMetrics,
    pub online_learning: OnlineLearningMetrics,
    pub buffer: BufferMetrics,
    pub market_trend: MarketTrend,
    pub volatility: VolatilityMetrics,
    pub performance: RecentPerformanceTrend,
    pub learner: LearnerState,
}

pub struct FeedbackLoop {
    validator: PredictionValidator,
    learner: OnlineLearner,
    buffer: AdaptiveBuffer,
    bars: Vec<Bar>,
    /// Absolute index of `bars[0]`
    first_index: usize,
    bars_seen: usize,
    out_of_order: u64,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            validator: PredictionValidator::new(config.validator),
            learner: OnlineLearner::new(config.learner),
            buffer: AdaptiveBuffer::new(config.buffer),
            bars: Vec::with_capacity(2 * RETAINED_BARS),
            first_index: 0,
            bars_seen: 0,
            out_of_order: 0,
        })
    }

    /// Index of the most recent bar (0 before any bar arrives)
    pub fn current_index(&self) -> usize {
        self.bars_seen.saturating_sub(1)
    }

    /// Register a forecast made at the current bar
    pub fn register_prediction(
        &mut self,
        prediction: Prediction,
        pattern_context: Option<Vec<PatternMatch>>,
    ) -> PredictionId {
        let index = self.current_index();
        self.validator
            .register_prediction(prediction, index, pattern_context)
    }

    /// Feed the next bar through the loop and return the validations it resolved.
    ///
    /// Bars are expected in non-decreasing timestamp order. A regression is
    /// logged and the bar is still processed in arrival order.
    pub fn on_bar(&mut self, bar: Bar) -> Vec<ValidationResult> {
        if let Some(last) = self.bars.last() {
            if bar.timestamp < last.timestamp {
                self.out_of_order += 1;
                warn!(
                    timestamp = bar.timestamp,
                    previous = last.timestamp,
                    "Out-of-order bar"
                );
            }
        }

        self.bars.push(bar);
        self.bars_seen += 1;
        let index = self.bars_seen - 1;

        let results = self
            .validator
            .process_window(&self.bars, self.first_index, index);
        for result in &results {
            self.learner.learn_from_error(result);
            self.buffer
                .add_performance_data(result, self.learner.learning_rate());
        }

        self.learner.add_sample(bar);
        self.buffer.add_sample(bar);

        self.trim_bars();

        if !results.is_empty() {
            debug!(bar = index, resolved = results.len(), "Bar processed");
        }
        results
    }

    fn trim_bars(&mut self) {
        if self.bars.len() < 2 * RETAINED_BARS {
            return;
        }
        let excess = self.bars.len() - RETAINED_BARS;
        self.bars.drain(..excess);
        self.first_index += excess;
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            bars_processed: self.bars_seen,
            validation: self.validator.metrics(),
            error_learning: self.learner.error_metrics(),
            online_learning: self.learner.metrics(),
            buffer: self.buffer.metrics(Utc::now()),
            market_trend: self.buffer.current_trend(),
            volatility: self.buffer.volatility_metrics(),
            performance: self.buffer.recent_performance_trend(),
            learner: self.learner.state(),
        }
    }

    pub fn validator(&self) -> &PredictionValidator {
        &self.validator
    }

    pub fn learner(&self) -> &OnlineLearner {
        &self.learner
    }

    pub fn buffer(&self) -> &AdaptiveBuffer {
        &self.buffer
    }

    /// Most recent bars, oldest first; the last one is the current bar
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Absolute index of the first bar in `bars()`
    pub fn first_bar_index(&self) -> usize {
        self.first_index
    }

    pub fn out_of_order_bars(&self) -> u64 {
        self.out_of_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnerConfig;
    use crate::error::EngineError;
    use crate::test_support::{bar, prediction};
    use crate::types::Signal;

    fn feedback_loop() -> FeedbackLoop {
        FeedbackLoop::new(FeedbackConfig {
            learner: LearnerConfig {
                seed: Some(42),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_resolved_error_reaches_learner_and_buffer() {
        let mut fl = feedback_loop();
        assert!(fl.on_bar(bar(0, 100.0)).is_empty());
        let id = fl.register_prediction(prediction(105.0, Signal::Buy, 0.7), None);

        let mut resolved = Vec::new();
        for (i, close) in [102.0, 103.0, 104.0, 105.0, 106.0].into_iter().enumerate() {
            resolved.extend(fl.on_bar(bar(i + 1, close)));
        }

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, id);
        assert_eq!(resolved[0].bar_index, 5);
        assert_eq!(fl.learner().error_metrics().total_errors, 1);
        assert_eq!(fl.buffer().performance_len(), 1);
        assert_eq!(fl.buffer().len(), 6);
        assert_eq!(fl.learner().samples_seen(), 6);
        assert_eq!(fl.validator().pending_count(), 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut fl = feedback_loop();
        for i in 0..30 {
            fl.on_bar(bar(i, 100.0 + i as f64));
            if i % 3 == 0 {
                fl.register_prediction(prediction(101.0 + i as f64, Signal::Buy, 0.8), None);
            }
        }

        let snapshot = fl.snapshot();
        assert_eq!(snapshot.bars_processed, 30);
        assert!(snapshot.validation.total_validations > 0);
        assert_eq!(snapshot.market_trend, MarketTrend::Bullish);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"bars_processed\":30"));
        assert!(json.contains("\"market_trend\":\"bullish\""));
    }

    #[test]
    fn test_out_of_order_bar_is_still_processed() {
        let mut fl = feedback_loop();
        fl.on_bar(bar(5, 100.0));
        fl.on_bar(bar(3, 100.0));
        assert_eq!(fl.out_of_order_bars(), 1);
        assert_eq!(fl.bars().len(), 2);
        assert_eq!(fl.buffer().len(), 2);
    }

    #[test]
    fn test_bar_window_stays_bounded() {
        assert!(RETAINED_BARS > REACTION_LOOKBACK);
        assert!(RETAINED_BARS > CONTEXT_LOOKBACK);

        let mut fl = feedback_loop();
        let mut validated = 0;
        for i in 0..10_000 {
            if i % 7 == 0 {
                fl.register_prediction(prediction(100.0, Signal::Hold, 0.6), None);
            }
            validated += fl.on_bar(bar(i, 100.0)).len();
            assert!(fl.bars().len() < 2 * RETAINED_BARS);
        }

        assert_eq!(fl.current_index(), 9_999);
        assert_eq!(fl.snapshot().bars_processed, 10_000);
        assert_eq!(fl.first_bar_index() + fl.bars().len(), 10_000);
        assert_eq!(fl.bars().last().map(|b| b.timestamp), Some(bar(9_999, 100.0).timestamp));
        assert!(fl.bars().len() >= RETAINED_BARS);
        // 1429 registered; the last one is not yet due
        assert_eq!(validated, 1428);
    }

    #[test]
    fn test_validation_after_trim_uses_absolute_index() {
        let mut fl = feedback_loop();
        for i in 0..(3 * RETAINED_BARS) {
            fl.on_bar(bar(i, 100.0));
        }
        assert!(fl.first_bar_index() > 0);

        let registered_at = fl.current_index();
        fl.register_prediction(prediction(101.0, Signal::Buy, 0.8), None);
        let mut resolved = Vec::new();
        for i in 0..5 {
            resolved.extend(fl.on_bar(bar(3 * RETAINED_BARS + i, 101.0)));
        }

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].bar_index, registered_at + 5);
        assert_eq!(resolved[0].delay_in_bars, 5);
        assert_eq!(resolved[0].actual_bar.close, 101.0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = FeedbackConfig::default();
        config.buffer.capacity = 0;
        assert!(matches!(
            FeedbackLoop::new(config),
            Err(EngineError::InvalidConfig { .. })
        ));
    }
}
