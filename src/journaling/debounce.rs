use std::time::{Duration, Instant};

/// Trailing-edge debounce with a single pending-deadline slot.
///
/// Every qualifying event calls `rearm`, which cancels and restarts the
/// deadline; `fire` consumes the deadline once the quiet period has elapsed
/// with no further events.
#[derive(Debug)]
pub struct DebounceTimer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    /// Restart the quiet period from `now`, cancelling any pending deadline.
    pub fn rearm(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consume the deadline if it has expired. Returns false while the
    /// timer is unarmed or still inside the quiet period.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
