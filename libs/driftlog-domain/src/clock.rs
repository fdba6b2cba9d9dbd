//! Wall-clock port
//!
//! Event timestamps default to ingestion time and are checked against a future
//! skew bound, so the services read "now" through this trait instead of calling
//! `Utc::now()` directly.

use chrono::{DateTime, Utc};

/// Source of wall-clock time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
