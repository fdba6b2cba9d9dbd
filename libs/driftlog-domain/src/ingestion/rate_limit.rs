//! Admission control for ingestion calls
//!
//! Two limits apply to every admission:
//! - at most `max_concurrent_requests` admitted calls in flight
//! - successive admissions at least `min_interval` apart
//!
//! Concurrency is a tokio semaphore handing out slots in FIFO order. Spacing
//! uses the `governor` crate with a burst of one cell per interval. Both waits
//! share one deadline derived from `acquire_timeout`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Upper bound on admitted calls in flight
    pub max_concurrent_requests: usize,
    /// Minimum spacing between two admissions (zero disables spacing)
    pub min_interval: Duration,
    /// How long a caller may wait for admission
    pub acquire_timeout: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 64,
            min_interval: Duration::ZERO,
            acquire_timeout: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    /// Derive the spacing from a requests-per-second budget (0 means unlimited)
    pub fn per_second(requests_per_second: u32) -> Self {
        let min_interval = if requests_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / requests_per_second
        };

        Self {
            min_interval,
            ..Default::default()
        }
    }
}

/// Admission was not granted within the wait window
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no admission within {}ms", .waited.as_millis())]
pub struct RateLimitExceeded {
    pub waited: Duration,
}

/// Capacity granted by the [`RateLimiter`]
///
/// The slot returns to the limiter when the permit is dropped, whichever way
/// the guarded operation ends.
#[derive(Debug)]
pub struct RatePermit {
    _slot: OwnedSemaphorePermit,
}

/// Concurrency and spacing limiter owned by one service instance
pub struct RateLimiter {
    config: RateLimitConfig,
    slots: Arc<Semaphore>,
    /// `None` when `min_interval` is zero
    pacer: Option<DefaultDirectRateLimiter>,
}

impl RateLimiter {
    /// Create a new RateLimiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        let pacer = Quota::with_period(config.min_interval).map(governor::RateLimiter::direct);
        Self {
            config,
            slots,
            pacer,
        }
    }

    /// Wait for admission, up to the configured timeout
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` if either limit could not be satisfied
    /// before the timeout. No capacity is held on error.
    pub async fn admit(&self) -> Result<RatePermit, RateLimitExceeded> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let exceeded = || RateLimitExceeded {
            waited: started.elapsed(),
        };

        let slot = match timeout_at(deadline, self.slots.clone().acquire_owned()).await {
            Ok(Ok(slot)) => slot,
            // The semaphore is never closed; treat it like a timeout regardless.
            Ok(Err(_)) | Err(_) => return Err(exceeded()),
        };

        // A cell is only consumed once it is granted, so a timed out wait
        // leaves the pacer untouched.
        if let Some(pacer) = &self.pacer {
            if timeout_at(deadline, pacer.until_ready()).await.is_err() {
                return Err(exceeded());
            }
        }

        debug!(
            waited_ms = started.elapsed().as_millis() as u64,
            available = self.slots.available_permits(),
            "Admission granted"
        );

        Ok(RatePermit { _slot: slot })
    }

    /// Number of free concurrency slots
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Get the limiter configuration
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}
