//! Builders shared by unit tests

use chrono::Utc;

use crate::types::{Bar, Prediction, Signal};
use crate::validator::{
    resolve_conflict, AccuracyGrade, ConfidenceInterval, MarketReaction, OutcomeReview,
    PredictionId, ValidationOutcome, ValidationResult, ValidationStatus,
};

/// Bullish bar (open = close - 1) one minute after the previous index
pub fn bar(i: usize, close: f64) -> Bar {
    Bar::new(
        (i as i64) * 60_000,
        close - 1.0,
        close + 2.0,
        close - 2.0,
        close,
        1000.0,
    )
}

pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    closes.iter().enumerate().map(|(i, &c)| bar(i, c)).collect()
}

pub fn prediction(close: f64, signal: Signal, confidence: f64) -> Prediction {
    Prediction {
        predicted_open: close,
        predicted_high: close + 1.0,
        predicted_low: close - 1.0,
        predicted_close: close,
        signal,
        confidence,
        pattern_label: "Test Pattern".to_string(),
    }
}

/// Hand-built validation result with the given relative error
pub fn validation_result(error: f64, signal: Signal, pattern_success: bool) -> ValidationResult {
    let actual = bar(10, 100.0);
    let prediction = prediction(100.0 * (1.0 + error), signal, 0.7);
    let conflict = resolve_conflict(&prediction, &[]);
    let price_accuracy = (1.0 - error * 5.0).max(0.0);
    let signal_accuracy = if signal.matches_direction(&actual) { 1.0 } else { 0.0 };
    let accuracy = (price_accuracy + signal_accuracy) / 2.0;

    ValidationResult {
        id: PredictionId::new(1),
        prediction,
        actual_bar: actual,
        bar_index: 10,
        price_accuracy,
        signal_accuracy,
        pattern_success,
        delay_in_bars: 5,
        conflict,
        resolution_correct: signal_accuracy > 0.0,
        outcome: ValidationOutcome {
            accuracy,
            error_magnitude: error,
            status: if accuracy > 0.6 {
                ValidationStatus::Validated
            } else {
                ValidationStatus::Failed
            },
        },
        review: OutcomeReview {
            was_accurate: false,
            confidence_interval: ConfidenceInterval {
                lower: 98.0,
                upper: 102.0,
                actual_within_range: true,
            },
            market_reaction: MarketReaction::default(),
            accuracy_grade: AccuracyGrade::Fair,
            feedback_score: 50,
        },
        validated_at: Utc::now(),
    }
}
