//! Error types for the channel library

use thiserror::Error;

/// Result type alias for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Errors that can occur while subscribing to the broker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The broker has been shut down
    #[error("Broker is closed")]
    Closed,

    /// The subscription filter cannot match anything
    #[error("Invalid subscription filter: {0}")]
    InvalidFilter(String),
}

impl ChannelError {
    /// Create an invalid filter error
    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        Self::InvalidFilter(msg.into())
    }
}
