//! Adaptive sliding buffer
//!
//! Capacity-bounded store of observed bars with importance-weighted
//! eviction, plus a separate FIFO window of performance samples taken from
//! resolved validations. Callers only ever receive copies.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BufferConfig;
use crate::metrics::{half_means, mean, variance, MarketTrend, PerformanceTrend, VolatilityTrend};
use crate::types::Bar;
use crate::validator::ValidationResult;

const DAY_MS: f64 = 86_400_000.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Bars examined by the trend and volatility queries
const TREND_WINDOW: usize = 20;
const TREND_THRESHOLD: f64 = 0.02;
const VOLATILITY_TREND_THRESHOLD: f64 = 0.1;

/// Performance samples examined by the recent performance query
const PERFORMANCE_WINDOW: usize = 10;
const PERFORMANCE_TREND_THRESHOLD: f64 = 0.05;
const DEFAULT_LEARNING_RATE: f64 = 0.01;

const DEFAULT_SAMPLE_SIZE: usize = 200;
/// Strided share of a stratified sample, in tenths; the rest is recent
const REPRESENTATIVE_TENTHS: usize = 3;

const MIN_AGE_FACTOR: f64 = 0.1;
const MAX_VOLATILITY_FACTOR: f64 = 2.0;
const MAX_VOLUME_FACTOR: f64 = 1.5;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Unix millis at which the validation resolved
    pub timestamp: i64,
    pub accuracy: f64,
    pub pattern_success: bool,
    pub error_magnitude: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityMetrics {
    pub current: f64,
    pub average: f64,
    pub trend: VolatilityTrend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentPerformanceTrend {
    pub accuracy: f64,
    pub trend: PerformanceTrend,
    pub learning_rate: f64,
    /// 1 - 10·variance of recent error magnitudes, floored at 0
    pub convergence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferMetrics {
    /// Bars ever added since construction or the last clear
    pub total_samples: u64,
    pub utilization: f64,
    /// 1 for bars stamped now, 0 once the mean age reaches a day
    pub data_freshness: f64,
    /// Fraction of added bars still retained
    pub sampling_rate: f64,
    pub memory_mb: f64,
}

// ============================================================================
// Buffer
// ============================================================================

pub struct AdaptiveBuffer {
    config: BufferConfig,
    entries: Vec<Bar>,
    performance: VecDeque<PerformanceSample>,
    samples_added: u64,
    last_maintenance: DateTime<Utc>,
}

impl AdaptiveBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            entries: Vec::with_capacity(config.capacity.max(1) + 1),
            performance: VecDeque::with_capacity(config.performance_capacity.max(1)),
            config,
            samples_added: 0,
            last_maintenance: Utc::now(),
        }
    }

    pub fn add_sample(&mut self, bar: Bar) {
        self.samples_added += 1;
        self.entries.push(bar);

        if self.entries.len() > self.config.capacity {
            self.evict_least_important();
        }

        let now = Utc::now();
        let interval = Duration::seconds(self.config.maintenance_interval_secs as i64);
        if now - self.last_maintenance > interval {
            self.run_maintenance(now);
        }
    }

    /// Drop the least important `capacity · eviction_fraction` entries (at least one).
    /// Ties go to the older entry, so the outcome depends only on the stored bars.
    fn evict_least_important(&mut self) {
        let remove_count =
            ((self.config.capacity as f64 * self.config.eviction_fraction).floor() as usize).max(1);
        let scores = self.importance_scores();

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let mut doomed = vec![false; self.entries.len()];
        for &(index, _) in ranked.iter().take(remove_count) {
            doomed[index] = true;
        }

        let mut index = 0;
        self.entries.retain(|_| {
            let keep = !doomed[index];
            index += 1;
            keep
        });

        debug!(
            removed = remove_count,
            remaining = self.entries.len(),
            "Adaptive buffer eviction"
        );
    }

    /// Importance = age factor × volatility factor × relative volume factor
    fn importance_scores(&self) -> Vec<f64> {
        let len = self.entries.len() as f64;
        let avg_volume = mean(self.entries.iter().map(|b| b.volume));

        self.entries
            .iter()
            .enumerate()
            .map(|(index, bar)| {
                let age = (index as f64 / len).max(MIN_AGE_FACTOR);
                let volatility = (1.0 + ((bar.high - bar.low) / bar.open).abs())
                    .min(MAX_VOLATILITY_FACTOR);
                let volume = if avg_volume > 0.0 {
                    (bar.volume / avg_volume).min(MAX_VOLUME_FACTOR)
                } else {
                    1.0
                };

                let score = age * volatility * volume;
                if score.is_finite() {
                    score
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn add_performance_data(&mut self, validation: &ValidationResult, learning_rate: f64) {
        if self.performance.len() >= self.config.performance_capacity.max(1) {
            self.performance.pop_front();
        }
        self.performance.push_back(PerformanceSample {
            timestamp: validation.validated_at.timestamp_millis(),
            accuracy: validation.combined_accuracy(),
            pattern_success: validation.pattern_success,
            error_magnitude: validation.error_magnitude(),
            learning_rate,
        });
    }

    /// Age out performance samples and compact an under-used buffer.
    ///
    /// Runs automatically from `add_sample` once per maintenance interval.
    pub fn run_maintenance(&mut self, now: DateTime<Utc>) {
        self.last_maintenance = now;

        let cutoff = now.timestamp_millis() - (self.config.performance_max_age_secs as i64) * 1000;
        let before = self.performance.len();
        self.performance.retain(|p| p.timestamp > cutoff);
        let expired = before - self.performance.len();

        let mut duplicates = 0;
        if (self.entries.len() as f64) < self.config.capacity as f64 * 0.5 {
            let len = self.entries.len();
            self.entries.sort_by_key(|b| b.timestamp);
            self.entries.dedup_by_key(|b| b.timestamp);
            duplicates = len - self.entries.len();
        }

        if expired > 0 || duplicates > 0 {
            info!(expired, duplicates, "Buffer maintenance");
        }
    }

    /// Stratified copy: an evenly strided pass over the whole buffer
    /// followed by the most recent entries (30% / 70% of `size`). The recent
    /// part absorbs rounding, so exactly `size` entries come back.
    pub fn sample(&self, size: usize) -> Vec<Bar> {
        if self.entries.len() <= size {
            return self.entries.clone();
        }

        let representative_count = size * REPRESENTATIVE_TENTHS / 10;
        let recent_count = size - representative_count;

        let mut out = self.representative(representative_count);
        out.extend_from_slice(&self.entries[self.entries.len() - recent_count..]);
        out
    }

    pub fn default_sample(&self) -> Vec<Bar> {
        self.sample(DEFAULT_SAMPLE_SIZE.min(self.entries.len()))
    }

    fn representative(&self, size: usize) -> Vec<Bar> {
        if size == 0 {
            return Vec::new();
        }
        if self.entries.len() <= size {
            return self.entries.clone();
        }
        let step = self.entries.len() / size;
        self.entries.iter().step_by(step).take(size).copied().collect()
    }

    pub fn current_trend(&self) -> MarketTrend {
        if self.entries.len() < TREND_WINDOW {
            return MarketTrend::Sideways;
        }
        let recent = &self.entries[self.entries.len() - TREND_WINDOW..];
        let first = recent[0].close;
        let last = recent[TREND_WINDOW - 1].close;
        let change = (last - first) / first;
        if !change.is_finite() {
            return MarketTrend::Sideways;
        }

        if change > TREND_THRESHOLD {
            MarketTrend::Bullish
        } else if change < -TREND_THRESHOLD {
            MarketTrend::Bearish
        } else {
            MarketTrend::Sideways
        }
    }

    pub fn volatility_metrics(&self) -> VolatilityMetrics {
        if self.entries.len() < TREND_WINDOW {
            return VolatilityMetrics {
                current: 0.0,
                average: 0.0,
                trend: VolatilityTrend::Stable,
            };
        }

        let vols: Vec<f64> = self.entries[self.entries.len() - TREND_WINDOW..]
            .iter()
            .map(Bar::volatility)
            .collect();
        let (first, second) = half_means(&vols);
        let change = if first > 0.0 { (second - first) / first } else { 0.0 };

        let trend = if change > VOLATILITY_TREND_THRESHOLD {
            VolatilityTrend::Increasing
        } else if change < -VOLATILITY_TREND_THRESHOLD {
            VolatilityTrend::Decreasing
        } else {
            VolatilityTrend::Stable
        };

        VolatilityMetrics {
            current: vols[vols.len() - 1],
            average: mean(vols.iter().copied()),
            trend,
        }
    }

    pub fn recent_performance_trend(&self) -> RecentPerformanceTrend {
        let n = self.performance.len();
        if n < PERFORMANCE_WINDOW {
            return RecentPerformanceTrend {
                accuracy: 0.0,
                trend: PerformanceTrend::Stable,
                learning_rate: DEFAULT_LEARNING_RATE,
                convergence: 0.0,
            };
        }

        let recent: Vec<&PerformanceSample> =
            self.performance.iter().skip(n - PERFORMANCE_WINDOW).collect();
        let accuracies: Vec<f64> = recent.iter().map(|p| p.accuracy).collect();
        let errors: Vec<f64> = recent.iter().map(|p| p.error_magnitude).collect();

        let (first, second) = half_means(&accuracies);
        let improvement = (second - first) / first.max(0.01);
        let trend = if improvement > PERFORMANCE_TREND_THRESHOLD {
            PerformanceTrend::Improving
        } else if improvement < -PERFORMANCE_TREND_THRESHOLD {
            PerformanceTrend::Declining
        } else {
            PerformanceTrend::Stable
        };

        RecentPerformanceTrend {
            accuracy: mean(accuracies.iter().copied()),
            trend,
            learning_rate: recent[PERFORMANCE_WINDOW - 1].learning_rate,
            convergence: (1.0 - variance(&errors) * 10.0).max(0.0),
        }
    }

    pub fn metrics(&self, now: DateTime<Utc>) -> BufferMetrics {
        let len = self.entries.len();
        let now_ms = now.timestamp_millis();
        let avg_age = mean(self.entries.iter().map(|b| (now_ms - b.timestamp) as f64));

        BufferMetrics {
            total_samples: self.samples_added,
            utilization: len as f64 / self.config.capacity.max(1) as f64,
            data_freshness: (1.0 - avg_age / DAY_MS).max(0.0),
            sampling_rate: if self.samples_added > 0 {
                len as f64 / self.samples_added as f64
            } else {
                0.0
            },
            memory_mb: (len * std::mem::size_of::<Bar>()) as f64 / BYTES_PER_MB,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.performance.clear();
        self.samples_added = 0;
        self.last_maintenance = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn performance_len(&self) -> usize {
        self.performance.len()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }
}
