//! Error handling for Stagekit
//!
//! A single closed taxonomy covering everything a stage operation can report:
//! session misuse (`NotConnected`, `AlreadyConnected`, `Busy`), transport
//! faults, device-reported failures, timeouts, and aborts by disconnect.
//!
//! All error types use `thiserror` for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Stage client error type
///
/// Every public operation of the stage client resolves with exactly one of
/// these variants or success. The enum is deliberately closed: callers can
/// match exhaustively to decide on retry or surfacing policy (the client
/// itself never retries).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Operation requires an open connection
    #[error("Stage not connected")]
    NotConnected,

    /// Connect was called while a connection already exists
    #[error("Stage already connected")]
    AlreadyConnected,

    /// A command is already awaiting its completion marker
    #[error("A command is already in flight")]
    Busy,

    /// The transport failed (open, write, or asynchronous fault)
    #[error("Transport error: {detail}")]
    Transport {
        /// Description of the underlying transport failure.
        detail: String,
    },

    /// The device answered with an error marker line
    #[error("Device reported error: {message}")]
    DeviceReported {
        /// The message text following the error marker, trimmed.
        message: String,
    },

    /// No completion or error marker arrived within the allotted time
    #[error("Command '{command}' timed out after {timeout:?}")]
    Timeout {
        /// The command text that went unanswered.
        command: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The pending command was aborted by an explicit disconnect
    #[error("Command aborted by disconnect")]
    Disconnected,
}

impl StageError {
    /// Create a transport error from any displayable detail
    pub fn transport(detail: impl Into<String>) -> Self {
        StageError::Transport {
            detail: detail.into(),
        }
    }

    /// Create a device-reported error
    pub fn device(message: impl Into<String>) -> Self {
        StageError::DeviceReported {
            message: message.into(),
        }
    }

    /// Check if this is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, StageError::Timeout { .. })
    }

    /// Check if this error came from the device rather than the client
    pub fn is_device_reported(&self) -> bool {
        matches!(self, StageError::DeviceReported { .. })
    }

    /// Check if this error ended the connection
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            StageError::Transport { .. } | StageError::Disconnected
        )
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        StageError::transport(err.to_string())
    }
}

/// Result type using StageError
pub type Result<T> = std::result::Result<T, StageError>;
