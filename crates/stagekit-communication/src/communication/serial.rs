//! Serial port transport implementation
//!
//! Provides the serial-port-backed [`LineTransport`] used for direct USB or
//! RS-232 connection to the stage controller, plus port enumeration.
//!
//! A dedicated reader thread performs blocking reads with a short timeout,
//! reassembles complete lines, and forwards them as [`TransportEvent`]s in
//! arrival order.

use crate::communication::{ConnectionParams, LineTransport, SerialParity, TransportEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use stagekit_core::{Result, StageError};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }
}

/// List serial ports that could plausibly host a stage controller
///
/// Filters the system's ports to USB-style device patterns:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        StageError::transport(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .filter(|port| is_candidate_port(&port.port_name))
        .map(|port| {
            let info = SerialPortInfo::new(&port.port_name, port_description(port));

            match &port.port_type {
                serialport::SerialPortType::UsbPort(usb_info) => {
                    let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                    if let Some(ref mfg) = usb_info.manufacturer {
                        info = info.with_manufacturer(mfg);
                    }
                    if let Some(ref serial) = usb_info.serial_number {
                        info = info.with_serial_number(serial);
                    }
                    info
                }
                _ => info,
            }
        })
        .collect())
}

/// Check if a port name matches stage controller device patterns
fn is_candidate_port(port_name: &str) -> bool {
    // Windows COM ports
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }

    // Linux USB and ACM devices
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }

    // macOS serial and modem devices
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }

    false
}

/// Get a user-friendly description for a port
fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

// Read timeout for the reader thread. Short so the shutdown flag is observed
// promptly without burning CPU.
const READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Serial-port-backed line transport
pub struct SerialLineTransport {
    /// Writer half of the port, present while open
    writer: Mutex<Option<Box<dyn serialport::SerialPort>>>,
    /// Signals the reader thread to stop
    shutdown: Arc<AtomicBool>,
    /// Reader thread handle, joined on close
    reader: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Event channel, kept to emit Closed
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl SerialLineTransport {
    /// Create a transport with no open endpoint
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    fn open_port(params: &ConnectionParams) -> Result<Box<dyn serialport::SerialPort>> {
        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(match params.data_bits {
                5 => serialport::DataBits::Five,
                6 => serialport::DataBits::Six,
                7 => serialport::DataBits::Seven,
                8 => serialport::DataBits::Eight,
                other => {
                    return Err(StageError::transport(format!(
                        "Invalid data bits: {}",
                        other
                    )))
                }
            })
            .stop_bits(match params.stop_bits {
                1 => serialport::StopBits::One,
                2 => serialport::StopBits::Two,
                other => {
                    return Err(StageError::transport(format!(
                        "Invalid stop bits: {}",
                        other
                    )))
                }
            })
            .parity(to_serialport_parity(params.parity))
            .flow_control(if params.flow_control {
                serialport::FlowControl::Hardware
            } else {
                serialport::FlowControl::None
            });

        builder.open().map_err(|e| {
            tracing::warn!("Failed to open serial port {}: {}", params.port, e);
            StageError::transport(format!("Failed to open port {}: {}", params.port, e))
        })
    }
}

impl Default for SerialLineTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineTransport for SerialLineTransport {
    async fn open(
        &mut self,
        params: &ConnectionParams,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        if self.is_open() {
            return Err(StageError::AlreadyConnected);
        }

        let port = Self::open_port(params)?;
        let reader_port = port
            .try_clone()
            .map_err(|e| StageError::transport(format!("Failed to clone port handle: {}", e)))?;

        self.shutdown.store(false, Ordering::SeqCst);
        *self.writer.lock() = Some(port);
        *self.events.lock() = Some(events.clone());

        let shutdown = self.shutdown.clone();
        let thread_events = events.clone();
        let port_name = params.port.clone();
        let handle = std::thread::spawn(move || {
            read_lines(reader_port, shutdown, thread_events, port_name);
        });
        *self.reader.lock() = Some(handle);

        let _ = events.send(TransportEvent::Opened).await;
        Ok(())
    }

    async fn write_line(&self, text: &str) -> Result<()> {
        use std::io::Write;

        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(StageError::NotConnected)?;

        port.write_all(text.as_bytes())
            .and_then(|_| port.write_all(b"\n"))
            .and_then(|_| port.flush())
            .map_err(|e| {
                tracing::error!("Serial write failed: {}", e);
                StageError::transport(format!("Write failed: {}", e))
            })
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        *self.writer.lock() = None;

        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let events = self.events.lock().take();
        if let Some(events) = events {
            let _ = events.send(TransportEvent::Closed).await;
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }
}

/// Reader loop: blocking reads, line reassembly, event forwarding
///
/// Runs until the shutdown flag is set, the receiver is dropped, or the port
/// reports a non-timeout error (forwarded as a fault).
fn read_lines(
    mut port: Box<dyn serialport::SerialPort>,
    shutdown: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
    port_name: String,
) {
    let mut raw = [0u8; 512];
    let mut buffer = String::new();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        match port.read(&mut raw) {
            Ok(0) => continue,
            Ok(n) => {
                buffer.push_str(&String::from_utf8_lossy(&raw[..n]));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    if line.is_empty() {
                        continue;
                    }
                    if events.blocking_send(TransportEvent::Line(line)).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => {
                if !shutdown.load(Ordering::SeqCst) {
                    tracing::error!("Serial read on {} failed: {}", port_name, e);
                    let _ = events.blocking_send(TransportEvent::Fault(e.to_string()));
                }
                return;
            }
        }
    }
}
