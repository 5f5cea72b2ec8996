//! Poll pacing for the job state machine.
//!
//! A successful poll waits the base interval. A poll that failed with a
//! transient error waits twice the base interval before retrying, however
//! many failures came before it. The overall job deadline is applied on
//! top by the caller, so backoff can never extend a job past its timeout.

use std::time::Duration;

/// Default per-job deadline.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default wait between successful polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Factor applied to the poll interval after a failed poll.
pub const FAILURE_BACKOFF_FACTOR: u32 = 2;

/// Tunable timing for [`crate::job::JobClient::await_completion`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Give up on the job after this long.
    pub timeout: Duration,
    /// Wait between polls while the engine answers normally.
    pub poll_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_JOB_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollSettings {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Wait before the next poll, given how many polls in a row have failed.
    ///
    /// Any failure doubles the base interval for that iteration only.
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            self.poll_interval
        } else {
            self.poll_interval.saturating_mul(FAILURE_BACKOFF_FACTOR)
        }
    }

    /// [`delay_after`](Self::delay_after) clamped to the time left before
    /// the deadline.
    pub fn delay_within(&self, consecutive_failures: u32, remaining: Duration) -> Duration {
        self.delay_after(consecutive_failures).min(remaining)
    }
}
