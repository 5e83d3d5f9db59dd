//! Error types for simulator operations

use crate::bus::BusError;
use crate::transport::ReadyState;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimulatorError>;

/// Error types for the event simulator
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    /// Invalid configuration (fails closed at construction time)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection-level failure of an event stream
    #[error("{0}")]
    Transport(TransportFailure),

    /// Persistence of captured events failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unknown message type or malformed frame
    #[error("Protocol warning: {0}")]
    Protocol(String),

    /// Interception context is not running or became redundant
    #[error("Worker error: {0}")]
    Worker(String),

    /// Message bus error
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl SimulatorError {
    /// Whether this error is a transport failure
    pub fn is_transport(&self) -> bool {
        matches!(self, SimulatorError::Transport(_))
    }

    /// Whether this error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, SimulatorError::Configuration(_))
    }
}

/// Diagnostic attached to a transport failure.
///
/// Rendered as `EventSource failed: {"readyState":..,"url":..,"timestamp":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportFailure {
    pub ready_state: ReadyState,
    pub url: String,
    pub timestamp: String,
    #[serde(skip)]
    pub detail: String,
}

impl TransportFailure {
    /// Create a failure stamped with the current time
    pub fn new(url: impl Into<String>, ready_state: ReadyState, detail: impl Into<String>) -> Self {
        Self::at(url, ready_state, detail, Utc::now())
    }

    /// Create a failure stamped with an explicit time
    pub fn at(
        url: impl Into<String>,
        ready_state: ReadyState,
        detail: impl Into<String>,
        when: DateTime<Utc>,
    ) -> Self {
        Self {
            ready_state,
            url: url.into(),
            timestamp: when.to_rfc3339_opts(SecondsFormat::Millis, true),
            detail: detail.into(),
        }
    }

    /// JSON rendering of the diagnostic fields
    pub fn details_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"url\":\"{}\"}}", self.url))
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventSource failed: {}", self.details_json())
    }
}

impl From<TransportFailure> for SimulatorError {
    fn from(failure: TransportFailure) -> Self {
        SimulatorError::Transport(failure)
    }
}

impl From<String> for SimulatorError {
    fn from(s: String) -> Self {
        SimulatorError::Other(s)
    }
}

impl From<&str> for SimulatorError {
    fn from(s: &str) -> Self {
        SimulatorError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for SimulatorError {
    fn from(err: anyhow::Error) -> Self {
        SimulatorError::Other(err.to_string())
    }
}
