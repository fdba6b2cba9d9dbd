//! Ingestion domain module
//!
//! This module contains the producer-facing side of the pipeline: admission
//! control and the service that validates, identifies and publishes events.

mod error;
mod rate_limit;
mod service;

pub use error::{IngestionError, Result};
pub use rate_limit::{RateLimitConfig, RateLimitExceeded, RateLimiter, RatePermit};
pub use service::{IngestionConfig, IngestionService};
