//! Process-wide throttle for outbound model calls.
//!
//! Two limits hold at once: at most `burst` calls in flight, and at most
//! `requests_per_minute` calls started in any trailing minute. Callers wait
//! rather than fail; the per-user rate limiter is what turns users away.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use chunk_core::config::ThrottleConfig;

use crate::error::LlmError;

const MINUTE: Duration = Duration::from_secs(60);

/// Shared call throttle. Clone-free: wrap in `Arc` to share.
#[derive(Debug)]
pub struct ApiThrottle {
    in_flight: Arc<Semaphore>,
    started: Mutex<VecDeque<Instant>>,
    per_minute: usize,
}

/// Slot for one in-flight call. Dropping it frees the slot.
#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl ApiThrottle {
    /// Create a throttle. `requests_per_minute = 0` disables the minute limit;
    /// `burst` is at least 1.
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            in_flight: Arc::new(Semaphore::new(config.burst.max(1) as usize)),
            started: Mutex::new(VecDeque::new()),
            per_minute: config.requests_per_minute as usize,
        }
    }

    /// Wait until a call may start.
    ///
    /// # Errors
    /// Returns [`LlmError::Unavailable`] if the throttle was shut down.
    pub async fn acquire(&self) -> Result<ThrottlePermit, LlmError> {
        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| LlmError::Unavailable("API throttle closed".into()))?;

        if self.per_minute > 0 {
            loop {
                let wait_until = {
                    let mut started = self.started.lock();
                    let now = Instant::now();
                    while started.front().is_some_and(|&t| now.duration_since(t) >= MINUTE) {
                        started.pop_front();
                    }
                    if started.len() < self.per_minute {
                        started.push_back(now);
                        None
                    } else {
                        started.front().map(|&oldest| oldest + MINUTE)
                    }
                };

                match wait_until {
                    None => break,
                    Some(deadline) => {
                        debug!(
                            wait_ms = deadline.saturating_duration_since(Instant::now()).as_millis(),
                            "API throttle full, waiting"
                        );
                        tokio::time::sleep_until(deadline).await;
                    }
                }
            }
        }

        Ok(ThrottlePermit { _permit: permit })
    }

    /// Calls currently allowed to start without waiting on the burst limit.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.in_flight.available_permits()
    }

    /// Stop admitting calls. Waiters get an error.
    pub fn close(&self) {
        self.in_flight.close();
    }
}
