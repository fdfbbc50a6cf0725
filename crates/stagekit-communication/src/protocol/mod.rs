//! Wire protocol for the stage controller.
//!
//! Outbound commands are free-form text lines built by [`commands`];
//! inbound lines are classified by [`response`]. The protocol has no
//! framing beyond the line terminator and no command identifiers.

pub mod commands;
pub mod response;

pub use commands::{DeviceCommand, MotionKind, ResponseMode};
pub use response::{DeviceResponse, COMPLETION_MARKER, ERROR_PREFIX};
