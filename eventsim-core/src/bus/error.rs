//! Error types for message bus operations

use thiserror::Error;

/// Message bus specific errors
#[derive(Debug, Error)]
pub enum BusError {
    /// Payload could not be encoded for the wire
    #[error("Bus serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid channel name
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    /// Every sender has been dropped
    #[error("Bus channel closed: {0}")]
    Closed(String),
}
