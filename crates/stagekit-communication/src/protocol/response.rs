//! Device response classification
//!
//! The wire protocol is a stream of unframed lines. Only three shapes matter
//! to correlation: the completion marker, the error marker, and everything
//! else. Markers carry no command identifier; correlation relies purely on
//! their order relative to command issuance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The single token acknowledging successful completion of a command
pub const COMPLETION_MARKER: &str = "ok";

/// Prefix of a line reporting a command failure at the device
pub const ERROR_PREFIX: &str = "Error:";

/// Classified inbound line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceResponse {
    /// Completion acknowledgment
    Ok,
    /// Device-reported failure with its trimmed message
    Error(String),
    /// Informational line, ignored for correlation
    Info(String),
}

impl DeviceResponse {
    /// Classify one inbound line
    ///
    /// The completion marker must match exactly; the error prefix must start
    /// the line. Anything else is informational.
    pub fn classify(line: &str) -> DeviceResponse {
        let trimmed = line.trim();

        if trimmed == COMPLETION_MARKER {
            return DeviceResponse::Ok;
        }

        if let Some(message) = trimmed.strip_prefix(ERROR_PREFIX) {
            return DeviceResponse::Error(message.trim().to_string());
        }

        DeviceResponse::Info(trimmed.to_string())
    }

    /// True for the completion marker
    pub fn is_ack(&self) -> bool {
        matches!(self, DeviceResponse::Ok)
    }

    /// True for an error marker line
    pub fn is_error(&self) -> bool {
        matches!(self, DeviceResponse::Error(_))
    }
}

impl fmt::Display for DeviceResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceResponse::Ok => write!(f, "ok"),
            DeviceResponse::Error(message) => write!(f, "error: {}", message),
            DeviceResponse::Info(text) => write!(f, "info: {}", text),
        }
    }
}
