//! Transport abstractions for the stage client.
//!
//! A transport is a byte-stream connection plus a line-splitting adapter: it
//! delivers complete, newline-terminated text lines as events, in arrival
//! order, and accepts whole outbound lines. Everything above this module
//! works in lines, never bytes.

pub mod serial;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagekit_core::Result;
use std::time::Duration;
use tokio::sync::mpsc;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity bit.
    #[default]
    None,
    /// Even parity.
    Even,
    /// Odd parity.
    Odd,
}

/// Connection parameters for opening a transport
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Endpoint name (e.g., "/dev/ttyUSB0", "COM3").
    pub port: String,
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Data bits (5-8).
    pub data_bits: u8,
    /// Stop bits (1 or 2).
    pub stop_bits: u8,
    /// Parity setting.
    pub parity: SerialParity,
    /// Enable hardware flow control.
    pub flow_control: bool,
    /// Timeout applied to each issued command.
    pub command_timeout: Duration,
    /// Timeout applied to the startup handshake.
    pub handshake_timeout: Duration,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: false,
            command_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectionParams {
    /// Default parameters for a named endpoint
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Default::default()
        }
    }
}

/// Events emitted by a transport, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The endpoint is open and lines may flow.
    Opened,
    /// One complete inbound line, terminator stripped.
    Line(String),
    /// The transport failed asynchronously; no further lines will arrive.
    Fault(String),
    /// The endpoint closed.
    Closed,
}

/// Line-oriented transport to the device
///
/// Implementations deliver inbound lines through the channel handed to
/// `open`, one event per line, never reordered. `write_line` appends the
/// line terminator itself; callers pass bare command text.
#[async_trait]
pub trait LineTransport: Send + Sync {
    /// Open the endpoint and start delivering events
    async fn open(
        &mut self,
        params: &ConnectionParams,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()>;

    /// Write one line, appending the terminator
    async fn write_line(&self, text: &str) -> Result<()>;

    /// Close the endpoint; a no-op when already closed
    async fn close(&mut self) -> Result<()>;

    /// True while the endpoint is open
    fn is_open(&self) -> bool;
}
