//! Move sequencer
//!
//! Relative motion is not a single wire command: the device must be switched
//! into relative positioning first and restored to absolute afterwards. The
//! three commands are issued strictly one at a time, and the restore is the
//! compensation step: it runs even when the motion fails, so an interrupted
//! sequence cannot strand the device in relative mode.

use crate::protocol::commands::{self, MotionKind};
use stagekit_core::{DeviceEvent, MoveTarget, Result, StageEvent};

use super::StageClient;

impl StageClient {
    /// Run the relative-move sequence: enter relative mode, move, restore
    /// absolute mode
    ///
    /// Failure handling:
    /// - mode entry fails → motion and restore are skipped entirely;
    /// - motion fails → the restore is still attempted, and its own failure
    ///   is demoted to a log line and a `CompensationFailed` event so the
    ///   caller's view of causality stays on the motion's failure;
    /// - restore fails after a successful motion → that failure propagates,
    ///   since the sequence did not complete.
    pub(crate) async fn relative_sequence(
        &self,
        delta: MoveTarget,
        kind: MotionKind,
    ) -> Result<()> {
        let timeout = self.command_timeout();

        self.issue(commands::enter_relative_mode(), timeout).await?;

        let motion = commands::motion(kind, &delta, self.current_speed());
        match self.issue(motion, timeout).await {
            Ok(()) => {
                self.record_relative_move(&delta);
                self.issue(commands::enter_absolute_mode(), timeout).await?;
                Ok(())
            }
            Err(original) => {
                let restore = commands::enter_absolute_mode();
                let restore_text = restore.text.clone();
                if let Err(secondary) = self.issue(restore, timeout).await {
                    tracing::warn!(
                        "Mode restore after failed move also failed: {}",
                        secondary
                    );
                    self.publish(StageEvent::Device(DeviceEvent::CompensationFailed {
                        command: restore_text,
                        detail: secondary.to_string(),
                    }));
                }
                Err(original)
            }
        }
    }
}
