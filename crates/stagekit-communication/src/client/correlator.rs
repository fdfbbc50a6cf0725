//! Command correlator
//!
//! Owns the single in-flight-command slot. The wire protocol carries no
//! command identifiers, so correlation relies on the protocol's
//! single-outstanding-command discipline: the slot is the mutex.
//!
//! The slot is a two-state machine {Idle, Awaiting}. Every resolution path
//! (completion marker, error marker, timeout, disconnect, transport fault)
//! funnels through taking the pending record out of the slot under its lock,
//! which makes exactly-once resolution structural: a second attempt finds
//! the slot empty, or a sequence number that no longer matches, and does
//! nothing.

use parking_lot::Mutex;
use stagekit_core::{Result, StageError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Responder = oneshot::Sender<Result<()>>;

/// The single pending-command slot
enum Slot {
    /// No command is awaiting resolution.
    Idle,
    /// Exactly one command is awaiting resolution.
    Awaiting(Pending),
}

/// Record of the command currently awaiting resolution
struct Pending {
    /// The command text that was written.
    command: String,
    /// When it was written.
    issued_at: Instant,
    /// Generation number guarding late timers.
    seq: u64,
    /// Completion continuation, consumed on resolution.
    responder: Responder,
}

/// Serializes command issuance and resolves each command exactly once
pub(crate) struct CommandCorrelator {
    slot: Mutex<Slot>,
    next_seq: AtomicU64,
}

impl CommandCorrelator {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Idle),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Occupy the slot for a new command
    ///
    /// Fails with `Busy` if a command is already pending. Returns the
    /// generation number and the receiver the caller suspends on.
    pub(crate) fn begin(&self, command: &str) -> Result<(u64, oneshot::Receiver<Result<()>>)> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Awaiting(_)) {
            return Err(StageError::Busy);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        *slot = Slot::Awaiting(Pending {
            command: command.to_string(),
            issued_at: Instant::now(),
            seq,
            responder: tx,
        });
        Ok((seq, rx))
    }

    /// Resolve the pending command with success
    ///
    /// Returns the command text and its round-trip time, or `None` when no
    /// command was pending (an unsolicited completion marker).
    pub(crate) fn complete(&self) -> Option<(String, Duration)> {
        let pending = self.take()?;
        let elapsed = pending.issued_at.elapsed();
        let _ = pending.responder.send(Ok(()));
        Some((pending.command, elapsed))
    }

    /// Resolve the pending command with an error
    ///
    /// Returns the command text, or `None` when no command was pending.
    pub(crate) fn fail(&self, error: StageError) -> Option<String> {
        let pending = self.take()?;
        let _ = pending.responder.send(Err(error));
        Some(pending.command)
    }

    /// Resolve with a timeout, but only if `seq` is still the current
    /// generation
    ///
    /// A timer outliving its command finds a different generation (or an
    /// idle slot) and has no effect. Returns whether the timeout won.
    pub(crate) fn expire(&self, seq: u64, timeout: Duration) -> bool {
        let Some(pending) = self.take_if_current(seq) else {
            return false;
        };
        let error = StageError::Timeout {
            command: pending.command,
            timeout,
        };
        let _ = pending.responder.send(Err(error));
        true
    }

    /// Resolve the command identified by `seq` with an explicit result
    ///
    /// Used for write failures and for commands answered in the same turn.
    /// A no-op when another path resolved the command first.
    pub(crate) fn resolve_if_current(&self, seq: u64, result: Result<()>) -> bool {
        let Some(pending) = self.take_if_current(seq) else {
            return false;
        };
        let _ = pending.responder.send(result);
        true
    }

    /// True while a command is awaiting resolution
    pub(crate) fn is_busy(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Awaiting(_))
    }

    fn take(&self) -> Option<Pending> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Awaiting(pending) => Some(pending),
            Slot::Idle => None,
        }
    }

    fn take_if_current(&self, seq: u64) -> Option<Pending> {
        let mut slot = self.slot.lock();
        let is_current = matches!(&*slot, Slot::Awaiting(pending) if pending.seq == seq);
        if !is_current {
            return None;
        }
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Awaiting(pending) => Some(pending),
            Slot::Idle => None,
        }
    }
}
