//! Cancellable waiting for content rendered after the load event
//!
//! The result page is a SPA: rows and the inbound screen appear some time
//! after navigation completes, so callers poll with exponential backoff.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

const INITIAL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Exponential backoff bounded by an overall deadline
///
/// - Starts at 100ms intervals
/// - Doubles each retry
/// - Caps at 1 second, and never sleeps past the deadline
#[derive(Debug)]
pub struct Backoff {
    deadline: Instant,
    interval: Duration,
}

impl Backoff {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            interval: INITIAL_INTERVAL,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Sleep until the next probe. Returns false when cancelled.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        let step = self.interval.min(remaining);
        self.interval = (self.interval * 2).min(MAX_INTERVAL);
        sleep_or_cancel(step, cancel).await
    }
}

/// Sleep for `duration` unless cancelled first. Returns false when cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
