//! Access-token refresh scheduling.
//!
//! DESIGN
//! ======
//! `refresh_delay` is pure: time left until expiry minus the refresh lead,
//! clamped at zero so an already-expired token refreshes immediately.
//!
//! `RefreshTimer` is a single slot. Scheduling aborts whatever was pending,
//! so at most one refresh is ever waiting. The timer task only sleeps and
//! then hands the refresh off to its own task; the refresh is free to
//! schedule the next timer without aborting itself. Dropping the timer
//! cancels the pending sleep. A closed timer ignores further scheduling.

use std::future::Future;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Refresh this long before the token expires.
pub const DEFAULT_REFRESH_LEAD: Duration = Duration::from_secs(crate::config::DEFAULT_REFRESH_LEAD_SECS);

/// Delay before refreshing a token that expires at `expires_at`.
#[must_use]
pub fn refresh_delay(expires_at: OffsetDateTime, now: OffsetDateTime, lead: Duration) -> Duration {
    let remaining_ms = (expires_at - now).whole_milliseconds();
    let delay_ms = remaining_ms - i128::try_from(lead.as_millis()).unwrap_or(i128::MAX);
    if delay_ms <= 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(u64::try_from(delay_ms).unwrap_or(u64::MAX))
}

#[derive(Default)]
pub struct RefreshTimer {
    handle: Option<JoinHandle<()>>,
    closed: bool,
}

impl RefreshTimer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling any previously scheduled task.
    ///
    /// Returns `false` without scheduling once the timer is closed.
    pub fn schedule<F, Fut>(&mut self, delay: Duration, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        if self.closed {
            return false;
        }
        self.handle = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tokio::spawn(task());
        }));
        true
    }

    /// Cancel the pending task and refuse all later scheduling.
    /// Returns `true` if a task was still waiting.
    pub fn close(&mut self) -> bool {
        self.closed = true;
        self.cancel()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel the pending task. Returns `true` if one was still waiting.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let waiting = !handle.is_finished();
                handle.abort();
                waiting
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
