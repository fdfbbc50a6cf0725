//! Event type definitions for the stage event bus.
//!
//! Events are cloneable and serializable so hosts can log or replay them.
//! Transcript events carry every line that crosses the transport, in both
//! directions; device events carry errors that are not tied to a currently
//! pending command.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Root event enum for all stage client events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageEvent {
    /// Connection lifecycle events
    Connection(ConnectionEvent),
    /// Wire traffic, one event per line in either direction
    Transcript(TranscriptEntry),
    /// Device-originated conditions outside the request/response flow
    Device(DeviceEvent),
}

impl StageEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            StageEvent::Connection(_) => EventCategory::Connection,
            StageEvent::Transcript(_) => EventCategory::Transcript,
            StageEvent::Device(_) => EventCategory::Device,
        }
    }
}

impl std::fmt::Display for StageEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageEvent::Connection(e) => write!(f, "{}", e),
            StageEvent::Transcript(e) => write!(f, "{}", e),
            StageEvent::Device(e) => write!(f, "{}", e),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Connection lifecycle events.
    Connection,
    /// Wire traffic events.
    Transcript,
    /// Out-of-band device events.
    Device,
}

/// Connection lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Transport open is in progress.
    Connecting {
        /// Endpoint being opened.
        port: String,
    },
    /// Transport opened and the startup handshake completed.
    Connected {
        /// Endpoint that was opened.
        port: String,
    },
    /// Connection ended, by request or by transport fault.
    Disconnected {
        /// Fault description when the transport failed, `None` on a
        /// requested disconnect.
        fault: Option<String>,
    },
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEvent::Connecting { port } => write!(f, "Connecting to {}", port),
            ConnectionEvent::Connected { port } => write!(f, "Connected to {}", port),
            ConnectionEvent::Disconnected { fault: None } => write!(f, "Disconnected"),
            ConnectionEvent::Disconnected { fault: Some(detail) } => {
                write!(f, "Disconnected ({})", detail)
            }
        }
    }
}

/// Direction of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineDirection {
    /// Written to the device.
    Sent,
    /// Delivered by the device.
    Received,
}

/// One line of wire traffic with its arrival/departure time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Direction the line travelled.
    pub direction: LineDirection,
    /// The line text, without its terminator.
    pub text: String,
    /// When the line crossed the client boundary.
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Record a line written to the device, stamped now
    pub fn sent(text: impl Into<String>) -> Self {
        Self {
            direction: LineDirection::Sent,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Record a line delivered by the device, stamped now
    pub fn received(text: impl Into<String>) -> Self {
        Self {
            direction: LineDirection::Received,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arrow = match self.direction {
            LineDirection::Sent => ">",
            LineDirection::Received => "<",
        };
        write!(f, "{} {}", arrow, self.text)
    }
}

/// Device conditions that do not resolve a pending command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// An error marker line arrived while no command was pending.
    UnsolicitedError {
        /// The message text following the error marker.
        message: String,
    },
    /// A mode-restore command issued as compensation failed; the caller of
    /// the failed sequence only sees the original failure.
    CompensationFailed {
        /// The restore command that was attempted.
        command: String,
        /// Why the restore failed.
        detail: String,
    },
}

impl std::fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::UnsolicitedError { message } => {
                write!(f, "Unsolicited device error: {}", message)
            }
            DeviceEvent::CompensationFailed { command, detail } => {
                write!(f, "Compensation '{}' failed: {}", command, detail)
            }
        }
    }
}
