//! Auto-stop failure policy.
//!
//! A stateful predicate over the stream of completed outcomes. When enabled
//! it stops the run on a burst of consecutive failures, or once the overall
//! failure rate crosses the configured limit after enough samples. The
//! verdict is monotone: once STOP, always STOP.

use parr_types::{Config, TaskStatus};
use tracing::error;

/// Verdict after observing one completed outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Continue,
    Stop,
}

/// Stateful auto-stop predicate.
///
/// FAILED, TIMEOUT, and LAUNCH_ERROR count as failures. SUCCESS resets the
/// consecutive counter. CANCELLED counts as neither and leaves every counter
/// untouched.
#[derive(Debug)]
pub struct FailurePolicy {
    enabled: bool,
    max_consecutive_failures: u32,
    max_failure_rate: f64,
    min_tasks_for_rate_check: u32,

    consecutive_failures: u32,
    failures: u32,
    completed: u32,
    stopped: bool,
}

impl FailurePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.stop_limits_enabled,
            max_consecutive_failures: config.max_consecutive_failures,
            max_failure_rate: config.max_failure_rate,
            min_tasks_for_rate_check: config.min_tasks_for_rate_check,
            consecutive_failures: 0,
            failures: 0,
            completed: 0,
            stopped: false,
        }
    }

    /// Observe one completed outcome and decide whether to keep going.
    pub fn observe(&mut self, status: TaskStatus) -> Verdict {
        if !self.enabled {
            return Verdict::Continue;
        }
        if self.stopped {
            return Verdict::Stop;
        }

        match status {
            TaskStatus::Cancelled => return Verdict::Continue,
            TaskStatus::Success => {
                self.completed += 1;
                self.consecutive_failures = 0;
            }
            _ => {
                self.completed += 1;
                self.failures += 1;
                self.consecutive_failures += 1;
            }
        }

        if self.consecutive_failures >= self.max_consecutive_failures {
            error!(
                consecutive = self.consecutive_failures,
                limit = self.max_consecutive_failures,
                "auto-stop: consecutive failure limit reached"
            );
            self.stopped = true;
            return Verdict::Stop;
        }

        if self.completed >= self.min_tasks_for_rate_check {
            let rate = f64::from(self.failures) / f64::from(self.completed);
            if rate > self.max_failure_rate {
                error!(
                    rate = format!("{:.1}%", rate * 100.0),
                    limit = format!("{:.0}%", self.max_failure_rate * 100.0),
                    "auto-stop: failure rate exceeds limit"
                );
                self.stopped = true;
                return Verdict::Stop;
            }
        }

        Verdict::Continue
    }
}
