//! Prediction validator
//!
//! Holds forecasts until their confirmation delay (in bars) has elapsed, then
//! scores each one against the bar observed at expiry: price accuracy,
//! directional accuracy, pattern success, and weighted arbitration between the
//! forecaster's signal and the strongest concurrent pattern signal.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ValidatorConfig;
use crate::metrics::{classify_delta, half_means, mean, variance, PerformanceTrend};
use crate::types::{Bar, PatternMatch, Prediction, Signal};

/// Width of the confidence band around the predicted close (±2%)
const CONFIDENCE_BAND: f64 = 0.02;
/// Maximum relative open/close move for a hold to count as successful
const HOLD_MOVE_LIMIT: f64 = 0.005;
/// Bars looked back when describing the market reaction
pub(crate) const REACTION_LOOKBACK: usize = 5;
/// Validations considered by the recent-performance trend
const RECENT_WINDOW: usize = 10;

// ============================================================================
// Types
// ============================================================================

/// Identifier handed out by [`PredictionValidator::register_prediction`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PredictionId(u64);

impl PredictionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for PredictionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pred_{:06}", self.0)
    }
}

/// A registered prediction awaiting its confirmation bar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPrediction {
    pub id: PredictionId,
    pub prediction: Prediction,
    pub registered_at_bar: usize,
    pub registered_at: DateTime<Utc>,
    pub pattern_context: Option<Vec<PatternMatch>>,
}

/// Outcome of arbitrating the producer signal against pattern signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub has_conflict: bool,
    pub producer_signal: Signal,
    pub pattern_signal: Signal,
    pub resolved_signal: Signal,
    pub resolved_confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Validated,
    Failed,
}

/// Generic accuracy/error summary shared with the learner and buffer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Mean of price and signal accuracy
    pub accuracy: f64,
    /// Relative price error |predicted - actual| / actual
    pub error_magnitude: f64,
    pub status: ValidationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl AccuracyGrade {
    fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            AccuracyGrade::Excellent
        } else if score >= 0.75 {
            AccuracyGrade::Good
        } else if score >= 0.6 {
            AccuracyGrade::Fair
        } else {
            AccuracyGrade::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
    pub actual_within_range: bool,
}

/// How the market behaved around the confirmation bar
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketReaction {
    /// Std-dev of closes divided by their mean
    pub volatility: f64,
    /// Relative close change across the window
    pub momentum: f64,
    pub volume_spike: bool,
    pub price_shock: bool,
}

/// Human-facing grade attached to every validation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReview {
    pub was_accurate: bool,
    pub confidence_interval: ConfidenceInterval,
    pub market_reaction: MarketReaction,
    pub accuracy_grade: AccuracyGrade,
    /// 0-100
    pub feedback_score: u8,
}

/// Immutable record of a scored prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub id: PredictionId,
    pub prediction: Prediction,
    pub actual_bar: Bar,
    pub bar_index: usize,
    pub price_accuracy: f64,
    /// 1.0 when the direction was called correctly (or the signal was hold), else 0.0
    pub signal_accuracy: f64,
    pub pattern_success: bool,
    pub delay_in_bars: usize,
    pub conflict: ConflictResolution,
    /// Whether the resolved signal matched the actual bar direction
    pub resolution_correct: bool,
    pub outcome: ValidationOutcome,
    pub review: OutcomeReview,
    pub validated_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn status(&self) -> ValidationStatus {
        self.outcome.status
    }

    pub fn combined_accuracy(&self) -> f64 {
        self.outcome.accuracy
    }

    pub fn error_magnitude(&self) -> f64 {
        self.outcome.error_magnitude
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictStats {
    pub total_conflicts: usize,
    pub correct_resolutions: usize,
    pub resolution_accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPerformance {
    pub last10_accuracy: f64,
    pub trend: PerformanceTrend,
}

/// Aggregate summary over the validation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnhancedValidationMetrics {
    pub total_validations: usize,
    pub price_accuracy: f64,
    pub signal_accuracy: f64,
    pub pattern_success_rate: f64,
    pub average_delay: f64,
    pub conflicts: ConflictStats,
    pub recent: RecentPerformance,
    pub pending: usize,
    pub stale_evictions: u64,
}

// ============================================================================
// Validator
// ============================================================================

pub struct PredictionValidator {
    config: ValidatorConfig,
    pending: BTreeMap<PredictionId, PendingPrediction>,
    history: VecDeque<ValidationResult>,
    next_id: u64,
    stale_evictions: u64,
}

impl PredictionValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            config,
            pending: BTreeMap::new(),
            history: VecDeque::with_capacity(capacity),
            next_id: 1,
            stale_evictions: 0,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Register a prediction made at `current_bar_index`. Nothing is scored yet.
    pub fn register_prediction(
        &mut self,
        prediction: Prediction,
        current_bar_index: usize,
        pattern_context: Option<Vec<PatternMatch>>,
    ) -> PredictionId {
        self.register_prediction_at(prediction, current_bar_index, pattern_context, Utc::now())
    }

    pub fn register_prediction_at(
        &mut self,
        prediction: Prediction,
        current_bar_index: usize,
        pattern_context: Option<Vec<PatternMatch>>,
        now: DateTime<Utc>,
    ) -> PredictionId {
        let id = PredictionId::new(self.next_id);
        self.next_id += 1;

        debug!(
            id = %id,
            bar = current_bar_index,
            signal = %prediction.signal,
            patterns = pattern_context.as_ref().map_or(0, |p| p.len()),
            "Prediction registered"
        );

        self.pending.insert(
            id,
            PendingPrediction {
                id,
                prediction,
                registered_at_bar: current_bar_index,
                registered_at: now,
                pattern_context,
            },
        );
        id
    }

    /// Score every pending prediction whose confirmation delay has elapsed at
    /// `current_bar_index`. An empty result means nothing was due.
    pub fn process_bar(&mut self, bars: &[Bar], current_bar_index: usize) -> Vec<ValidationResult> {
        self.process_bar_at(bars, current_bar_index, Utc::now())
    }

    pub fn process_bar_at(
        &mut self,
        bars: &[Bar],
        current_bar_index: usize,
        now: DateTime<Utc>,
    ) -> Vec<ValidationResult> {
        self.process_window_at(bars, 0, current_bar_index, now)
    }

    /// Like `process_bar`, but `window` holds only the most recent bars and
    /// `window[0]` is the bar at absolute index `window_start`.
    pub fn process_window(
        &mut self,
        window: &[Bar],
        window_start: usize,
        current_bar_index: usize,
    ) -> Vec<ValidationResult> {
        self.process_window_at(window, window_start, current_bar_index, Utc::now())
    }

    pub fn process_window_at(
        &mut self,
        window: &[Bar],
        window_start: usize,
        current_bar_index: usize,
        now: DateTime<Utc>,
    ) -> Vec<ValidationResult> {
        let delay = self.config.confirmation_delay;
        let due: Vec<PredictionId> = self
            .pending
            .values()
            .filter(|p| current_bar_index.saturating_sub(p.registered_at_bar) >= delay)
            .filter(|p| current_bar_index >= p.registered_at_bar)
            .map(|p| p.id)
            .collect();

        let mut results = Vec::with_capacity(due.len());

        let confirmation = current_bar_index
            .checked_sub(window_start)
            .and_then(|i| window.get(i).map(|bar| (i, bar)))
            .filter(|(_, bar)| bar.has_valid_prices());

        match confirmation {
            Some((local_index, actual)) => {
                for id in due {
                    let Some(pending) = self.pending.remove(&id) else {
                        continue;
                    };
                    let result = self.score(
                        pending,
                        actual,
                        &window[..=local_index],
                        current_bar_index,
                        now,
                    );

                    debug!(
                        id = %result.id,
                        delay = result.delay_in_bars,
                        price_accuracy = result.price_accuracy,
                        signal_accuracy = result.signal_accuracy,
                        grade = ?result.review.accuracy_grade,
                        "Prediction validated"
                    );

                    if self.history.len() >= self.config.history_capacity.max(1) {
                        self.history.pop_front();
                    }
                    self.history.push_back(result.clone());
                    results.push(result);
                }
            }
            None if !due.is_empty() => {
                warn!(
                    bar = current_bar_index,
                    due = due.len(),
                    "Confirmation bar missing or malformed, deferring validation"
                );
            }
            None => {}
        }

        self.evict_stale(current_bar_index, now);
        results
    }

    fn evict_stale(&mut self, current_bar_index: usize, now: DateTime<Utc>) {
        let max_bars = self.config.stale_after_bars;
        let max_age = self
            .config
            .stale_timeout_secs
            .map(|secs| Duration::seconds(secs as i64));

        let before = self.pending.len();
        self.pending.retain(|id, p| {
            let bars_waited = current_bar_index.saturating_sub(p.registered_at_bar);
            let expired = max_age.map_or(false, |age| now - p.registered_at > age);
            let stale = bars_waited > max_bars || expired;
            if stale {
                warn!(id = %id, bars_waited, "Evicting stale pending prediction");
            }
            !stale
        });
        self.stale_evictions += (before - self.pending.len()) as u64;
    }

    fn score(
        &self,
        pending: PendingPrediction,
        actual: &Bar,
        history: &[Bar],
        current_bar_index: usize,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let prediction = pending.prediction;

        let mut price_error = (prediction.predicted_close - actual.close).abs() / actual.close;
        if !price_error.is_finite() {
            price_error = 1.0;
        }
        let price_accuracy = (1.0 - price_error * self.config.price_error_scale).max(0.0);

        let signal_accuracy = if prediction.signal.matches_direction(actual) {
            1.0
        } else {
            0.0
        };
        let pattern_success = pattern_succeeded(prediction.signal, actual);

        let conflict = resolve_conflict(
            &prediction,
            pending.pattern_context.as_deref().unwrap_or_default(),
        );
        let resolution_correct = conflict.resolved_signal.matches_direction(actual);

        let accuracy = (price_accuracy + signal_accuracy) / 2.0;
        let status = if accuracy > self.config.success_threshold {
            ValidationStatus::Validated
        } else {
            ValidationStatus::Failed
        };

        let review = review_outcome(
            &prediction,
            actual,
            market_reaction(history),
            price_accuracy,
            signal_accuracy,
            pattern_success,
        );

        ValidationResult {
            id: pending.id,
            prediction,
            actual_bar: *actual,
            bar_index: current_bar_index,
            price_accuracy,
            signal_accuracy,
            pattern_success,
            delay_in_bars: current_bar_index - pending.registered_at_bar,
            conflict,
            resolution_correct,
            outcome: ValidationOutcome {
                accuracy,
                error_magnitude: price_error,
                status,
            },
            review,
            validated_at: now,
        }
    }

    pub fn metrics(&self) -> EnhancedValidationMetrics {
        let history = &self.history;
        if history.is_empty() {
            return EnhancedValidationMetrics {
                total_validations: 0,
                price_accuracy: 0.0,
                signal_accuracy: 0.0,
                pattern_success_rate: 0.0,
                average_delay: self.config.confirmation_delay as f64,
                conflicts: ConflictStats {
                    total_conflicts: 0,
                    correct_resolutions: 0,
                    resolution_accuracy: 0.0,
                },
                recent: RecentPerformance {
                    last10_accuracy: 0.0,
                    trend: PerformanceTrend::Stable,
                },
                pending: self.pending.len(),
                stale_evictions: self.stale_evictions,
            };
        }

        let total = history.len();
        let pattern_hits = history.iter().filter(|v| v.pattern_success).count();

        let total_conflicts = history.iter().filter(|v| v.conflict.has_conflict).count();
        let correct_resolutions = history
            .iter()
            .filter(|v| v.conflict.has_conflict && v.resolution_correct)
            .count();

        let recent: Vec<f64> = history
            .iter()
            .skip(total.saturating_sub(RECENT_WINDOW))
            .map(|v| v.price_accuracy)
            .collect();
        let trend = if recent.len() >= 4 {
            let (first, second) = half_means(&recent);
            classify_delta(second - first, 0.05)
        } else {
            PerformanceTrend::Stable
        };

        EnhancedValidationMetrics {
            total_validations: total,
            price_accuracy: mean(history.iter().map(|v| v.price_accuracy)),
            signal_accuracy: mean(history.iter().map(|v| v.signal_accuracy)),
            pattern_success_rate: pattern_hits as f64 / total as f64,
            average_delay: mean(history.iter().map(|v| v.delay_in_bars as f64)),
            conflicts: ConflictStats {
                total_conflicts,
                correct_resolutions,
                resolution_accuracy: if total_conflicts > 0 {
                    correct_resolutions as f64 / total_conflicts as f64
                } else {
                    0.0
                },
            },
            recent: RecentPerformance {
                last10_accuracy: mean(recent.iter().copied()),
                trend,
            },
            pending: self.pending.len(),
            stale_evictions: self.stale_evictions,
        }
    }

    /// The last `limit` validations, oldest first
    pub fn recent_validations(&self, limit: usize) -> Vec<ValidationResult> {
        self.history
            .iter()
            .skip(self.history.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    pub fn validations_by_status(&self, status: ValidationStatus) -> Vec<ValidationResult> {
        self.history
            .iter()
            .filter(|v| v.status() == status)
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of pending predictions in registration order
    pub fn pending(&self) -> Vec<PendingPrediction> {
        self.pending.values().cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

// ============================================================================
// Scoring rules
// ============================================================================

/// Direction-specific success rule; buy/sell also require traded volume
pub fn pattern_succeeded(signal: Signal, actual: &Bar) -> bool {
    match signal {
        Signal::Buy => actual.is_bullish() && actual.volume > 0.0,
        Signal::Sell => actual.is_bearish() && actual.volume > 0.0,
        Signal::Hold => actual.body_move() < HOLD_MOVE_LIMIT,
    }
}

/// Arbitrate the producer's signal against the strongest pattern.
///
/// Producer weight is its confidence, pattern weight is
/// strength × historical accuracy. The pattern only wins when its weight is
/// strictly greater.
pub fn resolve_conflict(prediction: &Prediction, patterns: &[PatternMatch]) -> ConflictResolution {
    let producer_signal = prediction.signal;

    let Some(strongest) = patterns
        .iter()
        .reduce(|best, m| if m.strength > best.strength { m } else { best })
    else {
        return ConflictResolution {
            has_conflict: false,
            producer_signal,
            pattern_signal: producer_signal,
            resolved_signal: producer_signal,
            resolved_confidence: prediction.confidence,
        };
    };

    let pattern_signal = strongest.kind.implied_signal();
    let has_conflict = pattern_signal != producer_signal;

    let mut resolved_signal = producer_signal;
    let mut resolved_confidence = prediction.confidence;

    if has_conflict {
        let pattern_weight = strongest.weight();
        if pattern_weight > prediction.confidence {
            resolved_signal = pattern_signal;
            resolved_confidence = pattern_weight;
        }
        debug!(
            producer = %producer_signal,
            pattern = %pattern_signal,
            pattern_name = %strongest.name,
            resolved = %resolved_signal,
            "Signal conflict resolved"
        );
    }

    ConflictResolution {
        has_conflict,
        producer_signal,
        pattern_signal,
        resolved_signal,
        resolved_confidence,
    }
}

/// `history` ends with the confirmation bar
fn market_reaction(history: &[Bar]) -> MarketReaction {
    let start = history.len().saturating_sub(REACTION_LOOKBACK + 1);
    let window = &history[start..];
    if window.len() < 2 {
        return MarketReaction::default();
    }

    let current = &window[window.len() - 1];
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    let avg_close = mean(closes.iter().copied());
    let volatility = if avg_close > 0.0 {
        variance(&closes).sqrt() / avg_close
    } else {
        0.0
    };

    let first = closes[0];
    let momentum = if first > 0.0 {
        (closes[closes.len() - 1] - first) / first
    } else {
        0.0
    };

    let avg_volume = mean(window[..window.len() - 1].iter().map(|b| b.volume));

    MarketReaction {
        volatility,
        momentum,
        volume_spike: current.volume > avg_volume * 1.5,
        price_shock: current.body_move() > 0.02,
    }
}

fn review_outcome(
    prediction: &Prediction,
    actual: &Bar,
    market_reaction: MarketReaction,
    price_accuracy: f64,
    signal_accuracy: f64,
    pattern_success: bool,
) -> OutcomeReview {
    let band = prediction.predicted_close * CONFIDENCE_BAND;
    let lower = prediction.predicted_close - band;
    let upper = prediction.predicted_close + band;
    let actual_within_range = actual.close >= lower && actual.close <= upper;

    let combined = (price_accuracy + signal_accuracy) / 2.0;
    let score = price_accuracy * 40.0
        + signal_accuracy * 30.0
        + if actual_within_range { 20.0 } else { 0.0 }
        + if pattern_success { 10.0 } else { 0.0 };

    OutcomeReview {
        was_accurate: price_accuracy > 0.7 && signal_accuracy > 0.0 && actual_within_range,
        confidence_interval: ConfidenceInterval {
            lower,
            upper,
            actual_within_range,
        },
        market_reaction,
        accuracy_grade: AccuracyGrade::from_score(combined),
        feedback_score: score.round().clamp(0.0, 100.0) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{make_bars, prediction};
    use crate::types::{MarketCondition, PatternContext, PatternKind};

    fn pattern(kind: PatternKind, strength: f64, historical_accuracy: f64) -> PatternMatch {
        PatternMatch {
            name: format!("{:?} {}", kind, strength),
            kind,
            strength,
            historical_accuracy,
            position: 0,
            context: PatternContext {
                volume_confirmation: false,
                trend_alignment: false,
                market_condition: MarketCondition::Stable,
            },
        }
    }

    #[test]
    fn test_registration_tracks_pending() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        assert_eq!(validator.pending_count(), 0);

        let a = validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);
        let b = validator.register_prediction(prediction(110.0, Signal::Sell, 0.8), 1, None);
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("pred_"));
        assert_eq!(validator.pending_count(), 2);
    }

    #[test]
    fn test_validates_after_confirmation_delay() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);

        let bars = make_bars(&[100.0, 102.0, 103.0, 104.0, 105.0, 106.0]);

        assert!(validator.process_bar(&bars, 4).is_empty());
        assert_eq!(validator.pending_count(), 1);

        let results = validator.process_bar(&bars, 5);
        assert_eq!(results.len(), 1);
        let r = &results[0];
        let expected = 1.0 - 5.0 * (1.0 / 106.0);
        assert!((r.price_accuracy - expected).abs() < 1e-12);
        assert_eq!(r.signal_accuracy, 1.0);
        assert!(r.pattern_success);
        assert_eq!(r.delay_in_bars, 5);
        assert_eq!(r.status(), ValidationStatus::Validated);
        assert_eq!(validator.pending_count(), 0);
    }

    #[test]
    fn test_close_prediction_scores_high() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);
        let bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 104.0]);

        let results = validator.process_bar(&bars, 5);
        assert_eq!(results.len(), 1);
        assert!(results[0].price_accuracy > 0.9);
    }

    #[test]
    fn test_each_prediction_validated_at_most_once() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&closes);

        let mut seen = std::collections::HashSet::new();
        for i in 0..bars.len() {
            if i % 3 == 0 && i < 30 {
                validator.register_prediction(prediction(bars[i].close, Signal::Buy, 0.7), i, None);
            }
            for r in validator.process_bar(&bars, i) {
                assert!(seen.insert(r.id), "{} validated twice", r.id);
                assert!(r.delay_in_bars >= validator.config().confirmation_delay);
            }
            // Re-processing the same bar must not yield anything new
            assert!(validator.process_bar(&bars, i).is_empty());
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(validator.pending_count(), 0);
    }

    #[test]
    fn test_malformed_bar_defers_validation() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);

        let mut bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0, 106.0]);
        bars[5].close = f64::NAN;

        assert!(validator.process_bar(&bars, 5).is_empty());
        assert_eq!(validator.pending_count(), 1);

        let results = validator.process_bar(&bars, 6);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].delay_in_bars, 6);
        assert!(results[0].price_accuracy.is_finite());
    }

    #[test]
    fn test_missing_bar_keeps_pending() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);
        let bars = make_bars(&[100.0, 101.0]);

        assert!(validator.process_bar(&bars, 5).is_empty());
        assert_eq!(validator.pending_count(), 1);
    }

    #[test]
    fn test_stale_pending_evicted_by_bar_count() {
        let config = ValidatorConfig {
            stale_after_bars: 8,
            ..Default::default()
        };
        let mut validator = PredictionValidator::new(config);
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);
        let bars = make_bars(&[100.0, 101.0, 102.0]);

        assert!(validator.process_bar(&bars, 8).is_empty());
        assert_eq!(validator.pending_count(), 1);

        assert!(validator.process_bar(&bars, 9).is_empty());
        assert_eq!(validator.pending_count(), 0);
        assert_eq!(validator.metrics().stale_evictions, 1);
        assert_eq!(validator.metrics().total_validations, 0);
    }

    #[test]
    fn test_stale_pending_evicted_by_wall_clock() {
        let config = ValidatorConfig {
            stale_timeout_secs: Some(30 * 60),
            ..Default::default()
        };
        let mut validator = PredictionValidator::new(config);
        let now = Utc::now();
        validator.register_prediction_at(
            prediction(105.0, Signal::Buy, 0.8),
            0,
            None,
            now - Duration::minutes(31),
        );
        validator.register_prediction_at(prediction(105.0, Signal::Buy, 0.8), 0, None, now);

        let bars = make_bars(&[100.0, 101.0]);
        assert!(validator.process_bar_at(&bars, 1, now).is_empty());
        assert_eq!(validator.pending_count(), 1);
    }

    #[test]
    fn test_slow_feed_still_validates_by_default() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        validator.register_prediction_at(prediction(105.0, Signal::Buy, 0.8), 0, None, t0);

        let bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let mut results = Vec::new();
        for i in 1..=5 {
            let now = t0 + Duration::minutes(15 * i as i64);
            results.extend(validator.process_bar_at(&bars, i, now));
        }

        assert_eq!(results.len(), 1);
        assert_eq!(validator.metrics().stale_evictions, 0);
        assert_eq!(validator.metrics().total_validations, 1);
    }

    #[test]
    fn test_window_resolves_absolute_indices() {
        let closes: Vec<f64> = (0..120).map(|i| 100.0 + i as f64 * 0.1).collect();
        let bars = make_bars(&closes);

        let mut full = PredictionValidator::new(ValidatorConfig::default());
        let mut windowed = PredictionValidator::new(ValidatorConfig::default());
        full.register_prediction(prediction(110.0, Signal::Buy, 0.8), 100, None);
        windowed.register_prediction(prediction(110.0, Signal::Buy, 0.8), 100, None);

        let expected = full.process_bar(&bars, 105);
        let got = windowed.process_window(&bars[95..106], 95, 105);

        assert_eq!(expected.len(), 1);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bar_index, 105);
        assert_eq!(got[0].delay_in_bars, 5);
        assert_eq!(got[0].actual_bar, bars[105]);
        assert_eq!(got[0].review, expected[0].review);
    }

    #[test]
    fn test_window_missing_current_bar_defers() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.8), 0, None);
        let bars = make_bars(&[100.0, 101.0, 102.0]);

        assert!(validator.process_window(&bars, 10, 5).is_empty());
        assert_eq!(validator.pending_count(), 1);
    }

    #[test]
    fn test_strongest_pattern_wins_conflict() {
        let pred = prediction(100.0, Signal::Buy, 0.6);
        let patterns = vec![
            pattern(PatternKind::Bearish, 0.3, 0.5),
            pattern(PatternKind::Bearish, 0.9, 0.8),
        ];

        let resolution = resolve_conflict(&pred, &patterns);
        assert!(resolution.has_conflict);
        assert_eq!(resolution.pattern_signal, Signal::Sell);
        assert_eq!(resolution.resolved_signal, Signal::Sell);
        assert!((resolution.resolved_confidence - 0.72).abs() < 1e-12);
    }

    #[test]
    fn test_conflict_tie_keeps_producer() {
        let pred = prediction(100.0, Signal::Buy, 0.6);
        let patterns = vec![pattern(PatternKind::Bearish, 1.0, 0.6)];

        for _ in 0..3 {
            let resolution = resolve_conflict(&pred, &patterns);
            assert!(resolution.has_conflict);
            assert_eq!(resolution.resolved_signal, Signal::Buy);
            assert_eq!(resolution.resolved_confidence, 0.6);
        }
    }

    #[test]
    fn test_no_pattern_context_means_no_conflict() {
        let pred = prediction(100.0, Signal::Sell, 0.7);
        let resolution = resolve_conflict(&pred, &[]);
        assert!(!resolution.has_conflict);
        assert_eq!(resolution.resolved_signal, Signal::Sell);
        assert_eq!(resolution.pattern_signal, Signal::Sell);
        assert_eq!(resolution.resolved_confidence, 0.7);
    }

    #[test]
    fn test_agreeing_pattern_is_not_a_conflict() {
        let pred = prediction(100.0, Signal::Hold, 0.4);
        let patterns = vec![pattern(PatternKind::Neutral, 0.7, 0.55)];
        let resolution = resolve_conflict(&pred, &patterns);
        assert!(!resolution.has_conflict);
        assert_eq!(resolution.resolved_signal, Signal::Hold);
        assert_eq!(resolution.resolved_confidence, 0.4);
    }

    #[test]
    fn test_pattern_success_rules() {
        let flat = Bar::new(0, 100.0, 100.5, 99.5, 100.2, 10.0);
        assert!(pattern_succeeded(Signal::Hold, &flat));
        assert!(pattern_succeeded(Signal::Buy, &flat));

        let big_move = Bar::new(0, 100.0, 102.0, 99.0, 101.0, 10.0);
        assert!(!pattern_succeeded(Signal::Hold, &big_move));

        let no_volume = Bar::new(0, 100.0, 102.0, 99.0, 101.0, 0.0);
        assert!(!pattern_succeeded(Signal::Buy, &no_volume));
        assert!(!pattern_succeeded(Signal::Sell, &no_volume));
    }

    #[test]
    fn test_conflict_resolution_metrics() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        let patterns = vec![pattern(PatternKind::Bearish, 0.9, 0.8)];
        validator.register_prediction(prediction(105.0, Signal::Buy, 0.6), 0, Some(patterns));

        // Bullish confirmation bar: the resolved sell signal was wrong
        let bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let results = validator.process_bar(&bars, 5);
        assert_eq!(results.len(), 1);
        assert!(results[0].conflict.has_conflict);
        assert!(!results[0].resolution_correct);

        let metrics = validator.metrics();
        assert_eq!(metrics.conflicts.total_conflicts, 1);
        assert_eq!(metrics.conflicts.correct_resolutions, 0);
        assert_eq!(metrics.conflicts.resolution_accuracy, 0.0);
    }

    #[test]
    fn test_metrics_trend_improving() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        let bars = make_bars(&[100.0; 20]);

        for i in 0..10 {
            let predicted = if i < 5 { 110.0 } else { 100.0 };
            validator.register_prediction(prediction(predicted, Signal::Hold, 0.5), i, None);
        }
        for i in 5..15 {
            assert_eq!(validator.process_bar(&bars, i).len(), 1);
        }

        let metrics = validator.metrics();
        assert_eq!(metrics.total_validations, 10);
        assert_eq!(metrics.recent.trend, PerformanceTrend::Improving);
        assert!((metrics.average_delay - 5.0).abs() < 1e-12);
        assert_eq!(metrics.signal_accuracy, 1.0);
    }

    #[test]
    fn test_empty_metrics() {
        let validator = PredictionValidator::new(ValidatorConfig::default());
        let metrics = validator.metrics();
        assert_eq!(metrics.total_validations, 0);
        assert_eq!(metrics.average_delay, 5.0);
        assert_eq!(metrics.recent.trend, PerformanceTrend::Stable);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = ValidatorConfig {
            history_capacity: 3,
            ..Default::default()
        };
        let mut validator = PredictionValidator::new(config);
        let bars = make_bars(&[100.0; 12]);

        for i in 0..5 {
            validator.register_prediction(prediction(100.0, Signal::Hold, 0.5), i, None);
        }
        for i in 5..10 {
            validator.process_bar(&bars, i);
        }

        assert_eq!(validator.history_len(), 3);
        let recent = validator.recent_validations(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].bar_index, 7);
        assert_eq!(recent[2].bar_index, 9);
    }

    #[test]
    fn test_failed_status_and_grading() {
        let mut validator = PredictionValidator::new(ValidatorConfig::default());
        validator.register_prediction(prediction(100.0, Signal::Buy, 0.8), 0, None);
        validator.register_prediction(prediction(150.0, Signal::Sell, 0.8), 0, None);

        let bars = make_bars(&[100.0; 6]);
        let results = validator.process_bar(&bars, 5);
        assert_eq!(results.len(), 2);

        let exact = &results[0];
        assert_eq!(exact.price_accuracy, 1.0);
        assert_eq!(exact.review.accuracy_grade, AccuracyGrade::Excellent);
        assert!(exact.review.was_accurate);
        assert_eq!(exact.review.feedback_score, 100);

        let miss = &results[1];
        assert_eq!(miss.price_accuracy, 0.0);
        assert_eq!(miss.signal_accuracy, 0.0);
        assert_eq!(miss.status(), ValidationStatus::Failed);
        assert_eq!(miss.review.accuracy_grade, AccuracyGrade::Poor);
        assert_eq!(miss.review.feedback_score, 0);

        assert_eq!(validator.validations_by_status(ValidationStatus::Failed).len(), 1);
        assert_eq!(validator.validations_by_status(ValidationStatus::Validated).len(), 1);
    }
}
