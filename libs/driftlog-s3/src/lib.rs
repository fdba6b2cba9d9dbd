//! # Driftlog S3 Adapter
//!
//! Implements the domain's `DocumentStore` port on top of AWS S3 (or any
//! S3-compatible service such as MinIO).
//!
//! Documents are stored one object per event under
//! `{namespace}/{collection}/{event_id}.json`. `PutObject` overwrites, so
//! writing the same event twice leaves a single document.

pub mod infrastructure;

pub use infrastructure::S3DocumentStore;
