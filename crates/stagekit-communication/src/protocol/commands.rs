//! Stage command builder
//!
//! Pure mapping from structured motion intents to wire text; no I/O. Each
//! built command carries its response classification: most commands are
//! acknowledged by the generic completion marker, while a few are answered
//! in the same request/response turn and must not wait for one.

use stagekit_core::MoveTarget;

/// How the device answers a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Resolved later by a completion or error marker line.
    AwaitAck,
    /// Answered synchronously in the same turn; resolves once written.
    Immediate,
}

/// One wire command with its response classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    /// Command text, without terminator.
    pub text: String,
    /// How the device answers it.
    pub response: ResponseMode,
}

impl DeviceCommand {
    /// A command resolved later by a completion or error marker
    pub fn await_ack(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response: ResponseMode::AwaitAck,
        }
    }

    /// A command answered in the same request/response turn
    ///
    /// No wire-level acknowledgment follows; issuing one resolves as soon as
    /// the write succeeds.
    pub fn immediate(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            response: ResponseMode::Immediate,
        }
    }
}

/// Motion word selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionKind {
    /// Interpolated move at the commanded speed (G1).
    #[default]
    Linear,
    /// Rapid positioning move (G0).
    Rapid,
}

/// Define the current position as the stage origin
pub fn set_home() -> DeviceCommand {
    DeviceCommand::await_ack("G92 X0 Y0 Z0")
}

/// Move to the stage origin
pub fn go_home() -> DeviceCommand {
    DeviceCommand::await_ack("G0 X0 Y0 Z0")
}

/// Switch the device to relative positioning
pub fn enter_relative_mode() -> DeviceCommand {
    DeviceCommand::await_ack("G91")
}

/// Switch the device back to absolute positioning
pub fn enter_absolute_mode() -> DeviceCommand {
    DeviceCommand::await_ack("G90")
}

/// Startup handshake: query firmware information
pub fn firmware_info() -> DeviceCommand {
    DeviceCommand::await_ack("M115")
}

/// Build a motion command from per-axis parameters
///
/// Axes absent from the target are omitted from the text; the device retains
/// its prior value for them. A speed greater than zero is appended as the
/// trailing `F` word, zero or negative omits it.
pub fn motion(kind: MotionKind, target: &MoveTarget, speed: f64) -> DeviceCommand {
    let mut text = match kind {
        MotionKind::Rapid => "G0".to_string(),
        MotionKind::Linear => "G1".to_string(),
    };

    if let Some(x) = target.x {
        text.push_str(&format!(" X{}", format_number(x)));
    }
    if let Some(y) = target.y {
        text.push_str(&format!(" Y{}", format_number(y)));
    }
    if let Some(z) = target.z {
        text.push_str(&format!(" Z{}", format_number(z)));
    }
    if speed > 0.0 {
        text.push_str(&format!(" F{}", format_number(speed)));
    }

    DeviceCommand::await_ack(text)
}

/// Wrap free-form text typed by the caller
pub fn raw(text: impl Into<String>) -> DeviceCommand {
    DeviceCommand::await_ack(text)
}

/// Format a numeric parameter for the wire
///
/// The device's numeric grammar is an optional sign, digits, and at most one
/// decimal point, with no exponent form. Rust's shortest-round-trip `Display`
/// for `f64` satisfies both the grammar and parse-back equality.
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}
