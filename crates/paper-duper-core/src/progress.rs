use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::grouping::DuplicateGroup;

/// Trait for reporting scan progress.
///
/// The CLI implements it with an indicatif bar; tests record the calls. All
/// methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, _current: usize, _total: usize, _path: &str) {}
    fn on_status(&self, _message: &str) {}
    fn on_complete(&self, _groups: &[DuplicateGroup]) {}
    fn on_error(&self, _message: &str) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Rate limiter for `on_progress`: forwards the first and last update and at
/// most one per `interval` in between.
pub struct ProgressThrottle {
    interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: Mutex::new(None),
        }
    }

    pub fn should_emit(&self, current: usize, total: usize) -> bool {
        let now = Instant::now();
        let mut last_sent = match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let due = match *last_sent {
            None => true,
            Some(previous) => current >= total || now.duration_since(previous) >= self.interval,
        };
        if due {
            *last_sent = Some(now);
        }
        due
    }

    pub fn report(
        &self,
        reporter: &dyn ProgressReporter,
        current: usize,
        total: usize,
        path: &str,
    ) {
        if self.should_emit(current, total) {
            reporter.on_progress(current, total, path);
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
