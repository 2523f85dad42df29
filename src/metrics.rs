use metrics::{Counter, Gauge, Histogram};
use std::time::Duration;

pub struct Metrics {
    pub screenshots_taken: Counter,
    pub screenshots_failed: Counter,
    pub capture_duration: Histogram,
    pub batches_committed: Counter,
    pub egress_rotations: Counter,
    pub egress_failures: Counter,
    pub remaining_targets: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            screenshots_taken: Counter::noop(),
            screenshots_failed: Counter::noop(),
            capture_duration: Histogram::noop(),
            batches_committed: Counter::noop(),
            egress_rotations: Counter::noop(),
            egress_failures: Counter::noop(),
            remaining_targets: Gauge::noop(),
        }
    }

    pub fn record_capture(&self, duration: Duration, success: bool) {
        if success {
            self.screenshots_taken.increment(1);
        } else {
            self.screenshots_failed.increment(1);
        }
        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_batch_committed(&self, remaining: usize) {
        self.batches_committed.increment(1);
        self.remaining_targets.set(remaining as f64);
    }

    pub fn record_rotation(&self, success: bool) {
        if success {
            self.egress_rotations.increment(1);
        } else {
            self.egress_failures.increment(1);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
