use std::{io::Write, sync::Mutex};

use push_core::NotificationSink;
use serde_json::Value;
use shared::{
    domain::CallLaunch,
    protocol::{NotificationDescriptor, OutboundAction},
};
use tracing::warn;

/// Writes every host action as one JSON line, for a host process reading our
/// stdout.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self, action: OutboundAction) {
        let line = match serde_json::to_string(&action) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "sink: failed to encode action");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            warn!(%err, "sink: failed to write action");
        }
    }
}

impl<W: Write + Send> NotificationSink for JsonLinesSink<W> {
    fn display_local_notification(&self, descriptor: &NotificationDescriptor) {
        self.write(OutboundAction::DisplayLocalNotification {
            descriptor: descriptor.clone(),
        });
    }

    fn set_badge_count(&self, count: i32) {
        self.write(OutboundAction::SetBadgeCount { count });
    }

    fn emit_event(&self, name: &str, payload: &Value) {
        self.write(OutboundAction::EmitEvent {
            name: name.to_string(),
            payload: payload.clone(),
        });
    }

    fn cancel_ringing(&self, room_name: Option<&str>) {
        self.write(OutboundAction::CancelRinging {
            room_name: room_name.map(str::to_owned),
        });
    }

    fn launch_call_ui(&self, call: &CallLaunch) {
        self.write(OutboundAction::LaunchCallUi(call.clone()));
    }
}

#[cfg(test)]
#[path = "tests/sink_tests.rs"]
mod tests;
