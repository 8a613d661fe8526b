//! Outbound request spacing.
//!
//! Callers queue on an async mutex in arrival order. The holder waits until
//! `min_interval` has passed since the last request went out, then records
//! its own send time. Nothing is booked ahead, so a caller cancelled while
//! queued or sleeping leaves no trace for the ones behind it.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};

/// Spaces requests at least `min_interval` apart.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Create a throttle. A zero interval disables spacing.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: Mutex::new(None),
        }
    }

    /// Wait until a request may be sent.
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last_sent = self.last_sent.lock().await;
        if let Some(last) = *last_sent {
            time::sleep_until(last + self.min_interval).await;
        }
        *last_sent = Some(Instant::now());
    }
}
