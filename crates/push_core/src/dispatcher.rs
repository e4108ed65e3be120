use std::sync::Arc;

use serde_json::{Map, Value};
use shared::{
    domain::{
        IncomingCall, InboundMessage, VerificationOutcome, KEY_BADGE, KEY_CANCEL_RINGING,
        KEY_CUSTOM_NOTIFICATION, KEY_ROOM_NAME,
    },
    error::PushError,
    protocol::{parse_badge, NotificationDescriptor, OutboundAction, RECEIVE_NOTIFICATION_EVENT},
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    actions::{call_action, UiBridge},
    call_verifier::CallVerifier,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    CustomNotification(String),
    CancelRinging(Option<String>),
    IncomingCall(IncomingCall),
    Unrecognized,
}

/// First match wins: `custom_notification`, then `cancelRinging`, then
/// `roomName`.
pub fn classify(message: &InboundMessage) -> Intent {
    if let Some(payload) = message.get(KEY_CUSTOM_NOTIFICATION) {
        Intent::CustomNotification(payload.to_string())
    } else if message.contains(KEY_CANCEL_RINGING) {
        Intent::CancelRinging(message.get(KEY_ROOM_NAME).map(str::to_owned))
    } else if message.contains(KEY_ROOM_NAME) {
        Intent::IncomingCall(IncomingCall::from_message(message))
    } else {
        Intent::Unrecognized
    }
}

/// What handling a message amounted to.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Notification {
        displayed: bool,
        badge: Option<i32>,
    },
    RingingCancelled {
        room_name: Option<String>,
    },
    Call(VerificationOutcome),
    CallRejected(PushError),
    Ignored,
}

pub struct Dispatcher {
    verifier: CallVerifier,
    ui: UiBridge,
}

impl Dispatcher {
    pub fn new(verifier: CallVerifier, ui: UiBridge) -> Self {
        Self { verifier, ui }
    }

    /// Handles one message to completion. Never fails: every error ends in a
    /// log line and a [`Dispatched`] describing what was skipped.
    pub async fn dispatch(&self, message: InboundMessage) -> Dispatched {
        debug!(keys = message.data().len(), "push: remote message received");
        match classify(&message) {
            Intent::CustomNotification(payload) => self.deliver_notification(&message, &payload),
            Intent::CancelRinging(room_name) => {
                info!(room_name = room_name.as_deref().unwrap_or("-"), "push: cancel ringing");
                self.ui.post(OutboundAction::CancelRinging {
                    room_name: room_name.clone(),
                });
                Dispatched::RingingCancelled { room_name }
            }
            Intent::IncomingCall(call) => self.verify_call(call).await,
            Intent::Unrecognized => {
                debug!("push: message matched no handler");
                Dispatched::Ignored
            }
        }
    }

    /// Runs [`Dispatcher::dispatch`] on the runtime so the caller's context is
    /// never held across the verification round-trip.
    pub fn spawn(self: &Arc<Self>, message: InboundMessage) -> JoinHandle<Dispatched> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.dispatch(message).await })
    }

    fn deliver_notification(&self, message: &InboundMessage, payload: &str) -> Dispatched {
        let badge = message.get(KEY_BADGE).and_then(|raw| match parse_badge(raw) {
            Ok(count) => {
                self.ui.post(OutboundAction::SetBadgeCount { count });
                Some(count)
            }
            Err(err) => {
                warn!(kind = err.kind(), %err, "push: ignoring badge");
                None
            }
        });

        let displayed = match NotificationDescriptor::parse(payload) {
            Ok(descriptor) => {
                self.ui
                    .post(OutboundAction::DisplayLocalNotification { descriptor });
                true
            }
            Err(err) => {
                warn!(kind = err.kind(), %err, "push: skipping local notification");
                false
            }
        };

        self.ui.post(OutboundAction::EmitEvent {
            name: RECEIVE_NOTIFICATION_EVENT.to_string(),
            payload: message_payload(message),
        });

        Dispatched::Notification { displayed, badge }
    }

    async fn verify_call(&self, call: IncomingCall) -> Dispatched {
        let ctx = match call
            .into_context()
            .and_then(|ctx| self.verifier.admit(&ctx).map(|()| ctx))
        {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(kind = err.kind(), %err, "call: not verifying call");
                return Dispatched::CallRejected(err);
            }
        };

        info!(room_name = %ctx.room_name, "call: verifying notification time");
        let outcome = self.verifier.verify(ctx).await;
        if let Some(action) = call_action(&outcome) {
            self.ui.post(action);
        }
        Dispatched::Call(outcome)
    }
}

fn message_payload(message: &InboundMessage) -> Value {
    let data: Map<String, Value> = message
        .data()
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(data)
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
