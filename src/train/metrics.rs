use std::time::{Duration, Instant};

use serde::{Serialize, Deserialize};

use crate::detector::DebugCounters;

/// Averages over the steps accumulated since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntervalAverages {
    pub mean_loss: f64,
    /// Steps per second.
    pub throughput: f64,
    /// `tp / fg`; `None` when the interval saw no foreground samples.
    pub tp_rate: Option<f64>,
    /// `tn / bg`; `None` when the interval saw no background samples.
    pub tn_rate: Option<f64>,
    pub fg_per_step: f64,
    pub bg_per_step: f64,
}

/// Running loss and accuracy counters between display intervals.
///
/// The trainer calls `reset()` right after reporting, so consecutive reports
/// cover disjoint step ranges.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    loss_sum: f64,
    counters: DebugCounters,
    steps_since_reset: u64,
    started: Instant,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        MetricsAggregator::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        MetricsAggregator {
            loss_sum: 0.0,
            counters: DebugCounters::default(),
            steps_since_reset: 0,
            started: Instant::now(),
        }
    }

    pub fn accumulate(&mut self, loss: f64, counters: &DebugCounters) {
        self.loss_sum += loss;
        self.counters.true_positive += counters.true_positive;
        self.counters.true_negative += counters.true_negative;
        self.counters.foreground += counters.foreground;
        self.counters.background += counters.background;
        self.steps_since_reset += 1;
    }

    pub fn loss_sum(&self) -> f64 {
        self.loss_sum
    }

    pub fn counters(&self) -> DebugCounters {
        self.counters
    }

    pub fn steps_since_reset(&self) -> u64 {
        self.steps_since_reset
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Mean of the accumulated loss over accumulated steps (0 when empty).
    pub fn mean_loss(&self) -> f64 {
        if self.steps_since_reset == 0 {
            0.0
        } else {
            self.loss_sum / self.steps_since_reset as f64
        }
    }

    pub fn interval_averages(&self) -> IntervalAverages {
        self.interval_averages_over(self.elapsed())
    }

    /// Same as `interval_averages` with an explicit wall-clock span.
    pub fn interval_averages_over(&self, elapsed: Duration) -> IntervalAverages {
        let steps = self.steps_since_reset as f64;
        let secs = elapsed.as_secs_f64().max(1e-9);
        let per_step = |x: f64| if steps > 0.0 { x / steps } else { 0.0 };

        IntervalAverages {
            mean_loss: self.mean_loss(),
            throughput: steps / secs,
            tp_rate: ratio(self.counters.true_positive, self.counters.foreground),
            tn_rate: ratio(self.counters.true_negative, self.counters.background),
            fg_per_step: per_step(self.counters.foreground),
            bg_per_step: per_step(self.counters.background),
        }
    }

    /// Zeroes the sums and restarts the interval timer.
    pub fn reset(&mut self) {
        self.loss_sum = 0.0;
        self.counters = DebugCounters::default();
        self.steps_since_reset = 0;
        self.started = Instant::now();
    }
}

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}
