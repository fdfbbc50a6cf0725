//! End-to-end scenarios for the stage client over a scripted transport.
//!
//! The mock transport plays the device: replies are keyed by exact command
//! text, unknown commands stay silent (to provoke timeouts), and faults can
//! be injected mid-command.

use async_trait::async_trait;
use stagekit_communication::{
    ConnectionParams, LineTransport, MotionKind, StageClient, TransportEvent,
};
use stagekit_core::{
    ConnectionState, DeviceEvent, EventCategory, EventFilter, LineDirection, MoveTarget, Position,
    StageError, StageEvent,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const HANDSHAKE: &str = "M115";

/// Scripted device on the far side of the transport
#[derive(Clone, Default)]
struct ScriptedDevice {
    /// Outbound lines in write order
    sent: Arc<Mutex<Vec<String>>>,
    /// Reply lines keyed by exact command text; unknown commands get silence
    replies: Arc<Mutex<HashMap<String, Vec<String>>>>,
    /// Commands that trigger a transport fault instead of replies
    faults: Arc<Mutex<HashMap<String, String>>>,
    /// Event channel captured at open, usable for unsolicited lines
    events: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    open: Arc<AtomicBool>,
}

impl ScriptedDevice {
    fn new() -> Self {
        let device = Self::default();
        device.on(HANDSHAKE, &["FIRMWARE_NAME:StageOS 2.1", "ok"]);
        device
    }

    fn on(&self, command: &str, reply_lines: &[&str]) {
        self.replies.lock().unwrap().insert(
            command.to_string(),
            reply_lines.iter().map(|s| s.to_string()).collect(),
        );
    }

    fn fault_on(&self, command: &str, detail: &str) {
        self.faults
            .lock()
            .unwrap()
            .insert(command.to_string(), detail.to_string());
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    async fn inject_line(&self, line: &str) {
        let sender = self.events.lock().unwrap().clone();
        sender
            .expect("transport not open")
            .send(TransportEvent::Line(line.to_string()))
            .await
            .unwrap();
    }

    fn transport(&self) -> Box<dyn LineTransport> {
        Box::new(ScriptedTransport {
            device: self.clone(),
        })
    }
}

struct ScriptedTransport {
    device: ScriptedDevice,
}

#[async_trait]
impl LineTransport for ScriptedTransport {
    async fn open(
        &mut self,
        _params: &ConnectionParams,
        events: mpsc::Sender<TransportEvent>,
    ) -> stagekit_core::Result<()> {
        self.device.open.store(true, Ordering::SeqCst);
        *self.device.events.lock().unwrap() = Some(events.clone());
        let _ = events.send(TransportEvent::Opened).await;
        Ok(())
    }

    async fn write_line(&self, text: &str) -> stagekit_core::Result<()> {
        self.device.sent.lock().unwrap().push(text.to_string());

        let fault = self.device.faults.lock().unwrap().get(text).cloned();
        if let Some(detail) = fault {
            let sender = self.device.events.lock().unwrap().clone();
            if let Some(sender) = sender {
                let _ = sender.send(TransportEvent::Fault(detail)).await;
            }
            return Ok(());
        }

        let reply_lines = self.device.replies.lock().unwrap().get(text).cloned();
        if let Some(lines) = reply_lines {
            let sender = self.device.events.lock().unwrap().clone();
            if let Some(sender) = sender {
                for line in lines {
                    let _ = sender.send(TransportEvent::Line(line)).await;
                }
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> stagekit_core::Result<()> {
        self.device.open.store(false, Ordering::SeqCst);
        *self.device.events.lock().unwrap() = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.open.load(Ordering::SeqCst)
    }
}

fn test_params() -> ConnectionParams {
    let mut params = ConnectionParams::for_port("PORT1");
    params.command_timeout = Duration::from_millis(100);
    params.handshake_timeout = Duration::from_millis(100);
    params
}

async fn connected_client(device: &ScriptedDevice) -> StageClient {
    let client = StageClient::with_transport(device.transport());
    client.connect(test_params()).await.unwrap();
    client
}

#[tokio::test]
async fn test_connect_handshake_then_move_updates_cache() {
    let device = ScriptedDevice::new();
    device.on("G1 X10 Y0 Z0", &["ok"]);

    let client = connected_client(&device).await;
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    client
        .move_to(
            MoveTarget::new().x(10.0).y(0.0).z(0.0),
            MotionKind::Linear,
        )
        .await
        .unwrap();

    assert_eq!(client.position(), Position::new(10.0, 0.0, 0.0));
    assert_eq!(device.sent(), vec![HANDSHAKE, "G1 X10 Y0 Z0"]);
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let device = ScriptedDevice::new();
    let client = connected_client(&device).await;

    assert_eq!(
        client.connect(test_params()).await,
        Err(StageError::AlreadyConnected)
    );
    // The original connection is unaffected
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_speed_is_appended_and_omitted_axes_never_appear() {
    let device = ScriptedDevice::new();
    device.on("G1 X12.5 Y-3 F1000", &["ok"]);

    let client = connected_client(&device).await;
    client.set_speed(1000.0);
    client
        .move_to(MoveTarget::new().x(12.5).y(-3.0), MotionKind::Linear)
        .await
        .unwrap();

    let sent = device.sent();
    let command = sent.last().unwrap();
    assert_eq!(command, "G1 X12.5 Y-3 F1000");
    assert!(!command.contains('Z'));
}

#[tokio::test]
async fn test_busy_while_pending_leaves_first_command_undisturbed() {
    let device = ScriptedDevice::new();
    // "G1 X5" gets no reply: the first command stays pending until timeout.

    let client = connected_client(&device).await;
    let first = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .move_to(MoveTarget::new().x(5.0), MotionKind::Linear)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        client.send_raw("M114", Duration::from_millis(100)).await,
        Err(StageError::Busy)
    );

    // The rejected second command did not consume the first one's slot
    let first_outcome = first.await.unwrap();
    assert!(matches!(
        first_outcome,
        Err(StageError::Timeout { ref command, .. }) if command == "G1 X5"
    ));
}

#[tokio::test]
async fn test_device_error_resolves_command_and_keeps_connection() {
    let device = ScriptedDevice::new();
    device.on("G1 X999", &["Error: axis out of range"]);
    device.on("G1 X1", &["ok"]);

    let client = connected_client(&device).await;
    let err = client
        .move_to(MoveTarget::new().x(999.0), MotionKind::Linear)
        .await
        .unwrap_err();
    assert_eq!(err, StageError::device("axis out of range"));

    // Failed move must not touch the cache, and the session stays usable
    assert_eq!(client.position(), Position::ORIGIN);
    client
        .move_to(MoveTarget::new().x(1.0), MotionKind::Linear)
        .await
        .unwrap();
    assert_eq!(client.position(), Position::new(1.0, 0.0, 0.0));
}

#[tokio::test]
async fn test_unsolicited_error_goes_to_side_channel_only() {
    let device = ScriptedDevice::new();
    device.on("G1 X1", &["ok"]);

    let client = connected_client(&device).await;
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    client.events().subscribe(
        EventFilter::Categories(vec![EventCategory::Device]),
        move |event| {
            sink.lock().unwrap().push(event);
        },
    );

    device.inject_line("Error: thermal shutdown").await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let events = observed.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        StageEvent::Device(DeviceEvent::UnsolicitedError { message }) if message == "thermal shutdown"
    ));

    // State is not corrupted: the next command still works
    client
        .move_to(MoveTarget::new().x(1.0), MotionKind::Linear)
        .await
        .unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_relative_move_switches_and_restores_mode() {
    let device = ScriptedDevice::new();
    device.on("G1 X1 Y1 Z1", &["ok"]);
    device.on("G91", &["ok"]);
    device.on("G1 X5", &["ok"]);
    device.on("G90", &["ok"]);

    let client = connected_client(&device).await;
    client
        .move_to(MoveTarget::new().x(1.0).y(1.0).z(1.0), MotionKind::Linear)
        .await
        .unwrap();

    client
        .move_by(MoveTarget::new().x(5.0), MotionKind::Linear)
        .await
        .unwrap();

    assert_eq!(client.position(), Position::new(6.0, 1.0, 1.0));
    let sent = device.sent();
    let tail: Vec<&str> = sent.iter().rev().take(3).rev().map(|s| s.as_str()).collect();
    assert_eq!(tail, vec!["G91", "G1 X5", "G90"]);
}

#[tokio::test]
async fn test_compensation_restores_mode_after_device_error() {
    let device = ScriptedDevice::new();
    device.on("G91", &["ok"]);
    device.on("G1 X5", &["Error: stall detected"]);
    device.on("G90", &["ok"]);

    let client = connected_client(&device).await;
    let err = client
        .move_by(MoveTarget::new().x(5.0), MotionKind::Linear)
        .await
        .unwrap_err();

    // Caller sees the motion's failure, not the restore's outcome
    assert_eq!(err, StageError::device("stall detected"));
    assert_eq!(client.position(), Position::ORIGIN);

    // The restore was attempted after the failed motion
    let sent = device.sent();
    let motion_idx = sent.iter().position(|c| c == "G1 X5").unwrap();
    assert!(sent[motion_idx + 1..].contains(&"G90".to_string()));
}

#[tokio::test]
async fn test_unanswered_relative_move_times_out_and_still_compensates() {
    let device = ScriptedDevice::new();
    device.on("G91", &["ok"]);
    // Neither "G1 X5" nor "G90" is answered.

    let client = connected_client(&device).await;
    let observed = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    client.events().subscribe(
        EventFilter::Categories(vec![EventCategory::Device]),
        move |event| {
            sink.lock().unwrap().push(event);
        },
    );

    let err = client
        .move_by(MoveTarget::new().x(5.0), MotionKind::Linear)
        .await
        .unwrap_err();

    // The caller only sees the original timeout, naming the motion command
    assert!(matches!(
        err,
        StageError::Timeout { ref command, .. } if command == "G1 X5"
    ));

    // The restore was attempted (and itself went unanswered)
    let sent = device.sent();
    let motion_idx = sent.iter().position(|c| c == "G1 X5").unwrap();
    assert!(sent[motion_idx + 1..].contains(&"G90".to_string()));

    let events = observed.lock().unwrap().clone();
    assert!(events.iter().any(|event| matches!(
        event,
        StageEvent::Device(DeviceEvent::CompensationFailed { command, .. }) if command == "G90"
    )));
}

#[tokio::test]
async fn test_failed_mode_entry_skips_motion_and_restore() {
    let device = ScriptedDevice::new();
    device.on("G91", &["Error: unsupported"]);

    let client = connected_client(&device).await;
    let err = client
        .move_by(MoveTarget::new().x(5.0), MotionKind::Linear)
        .await
        .unwrap_err();

    assert_eq!(err, StageError::device("unsupported"));
    let sent = device.sent();
    assert_eq!(sent, vec![HANDSHAKE, "G91"]);
}

#[tokio::test]
async fn test_transport_fault_mid_command_drops_connection() {
    let device = ScriptedDevice::new();
    device.fault_on("G1 X5", "port vanished");

    let client = connected_client(&device).await;
    let err = client
        .move_to(MoveTarget::new().x(5.0), MotionKind::Linear)
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::Transport { .. }));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // Subsequent issues fail fast
    assert_eq!(
        client.send_raw("M114", Duration::from_millis(50)).await,
        Err(StageError::NotConnected)
    );
}

#[tokio::test]
async fn test_disconnect_aborts_pending_command() {
    let device = ScriptedDevice::new();
    // "G1 X5" is never answered.

    let client = connected_client(&device).await;
    let pending = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .move_to(MoveTarget::new().x(5.0), MotionKind::Linear)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.disconnect().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(StageError::Disconnected));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // Disconnect when already disconnected is a no-op success
    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_home_operations_reset_position_cache() {
    let device = ScriptedDevice::new();
    device.on("G1 X3 Y4", &["ok"]);
    device.on("G92 X0 Y0 Z0", &["ok"]);
    device.on("G0 X0 Y0 Z0", &["ok"]);

    let client = connected_client(&device).await;
    client
        .move_to(MoveTarget::new().x(3.0).y(4.0), MotionKind::Linear)
        .await
        .unwrap();
    assert_eq!(client.position(), Position::new(3.0, 4.0, 0.0));

    client.set_home().await.unwrap();
    assert_eq!(client.position(), Position::ORIGIN);

    client
        .move_to(MoveTarget::new().x(3.0).y(4.0), MotionKind::Linear)
        .await
        .unwrap();
    client.go_home().await.unwrap();
    assert_eq!(client.position(), Position::ORIGIN);
}

#[tokio::test]
async fn test_rapid_move_uses_rapid_word() {
    let device = ScriptedDevice::new();
    device.on("G0 X7", &["ok"]);

    let client = connected_client(&device).await;
    client
        .move_to(MoveTarget::new().x(7.0), MotionKind::Rapid)
        .await
        .unwrap();
    assert_eq!(device.sent().last().unwrap(), "G0 X7");
}

#[tokio::test]
async fn test_transcript_records_both_directions() {
    let device = ScriptedDevice::new();
    device.on("G1 X1", &["ok"]);

    let client = connected_client(&device).await;
    client
        .move_to(MoveTarget::new().x(1.0), MotionKind::Linear)
        .await
        .unwrap();

    let transcript = client.transcript();
    let sent: Vec<&str> = transcript
        .iter()
        .filter(|e| e.direction == LineDirection::Sent)
        .map(|e| e.text.as_str())
        .collect();
    let received: Vec<&str> = transcript
        .iter()
        .filter(|e| e.direction == LineDirection::Received)
        .map(|e| e.text.as_str())
        .collect();

    assert_eq!(sent, vec![HANDSHAKE, "G1 X1"]);
    assert!(received.contains(&"FIRMWARE_NAME:StageOS 2.1"));
    assert_eq!(received.iter().filter(|l| **l == "ok").count(), 2);
}

#[tokio::test]
async fn test_raw_command_round_trip() {
    let device = ScriptedDevice::new();
    device.on("M42 P13 S255", &["ok"]);

    let client = connected_client(&device).await;
    client
        .send_raw("M42 P13 S255", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(device.sent().last().unwrap(), "M42 P13 S255");
}
