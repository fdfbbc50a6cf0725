//! # Stagekit Communication
//!
//! Serial transport, wire protocol, and command correlation for Stagekit.
//! The stage speaks a line-oriented G-code dialect over a half-duplex link:
//! one command at a time goes out, and completion (`ok`) or failure
//! (`Error: ...`) markers come back later as bare lines on the same stream.

pub mod client;
pub mod communication;
pub mod protocol;

pub use client::StageClient;
pub use communication::{
    serial::{list_ports, SerialLineTransport, SerialPortInfo},
    ConnectionParams, LineTransport, SerialParity, TransportEvent,
};
pub use protocol::{DeviceCommand, DeviceResponse, MotionKind, ResponseMode};
