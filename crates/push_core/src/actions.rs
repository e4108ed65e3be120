//! Outbound side of the relay: the host sink and the execution context it
//! must be driven from.

use std::sync::Arc;

use serde_json::Value;
use shared::{
    domain::{CallLaunch, VerificationOutcome},
    protocol::{NotificationDescriptor, OutboundAction},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Host-side effects. Implementations render notifications, update the
/// launcher badge, forward events to the app runtime and open the call
/// screen; return values are never consumed.
pub trait NotificationSink: Send + Sync {
    fn display_local_notification(&self, descriptor: &NotificationDescriptor);
    fn set_badge_count(&self, count: i32);
    fn emit_event(&self, name: &str, payload: &Value);
    fn cancel_ringing(&self, room_name: Option<&str>);
    fn launch_call_ui(&self, call: &CallLaunch);

    fn apply(&self, action: &OutboundAction) {
        match action {
            OutboundAction::DisplayLocalNotification { descriptor } => {
                self.display_local_notification(descriptor)
            }
            OutboundAction::SetBadgeCount { count } => self.set_badge_count(*count),
            OutboundAction::EmitEvent { name, payload } => self.emit_event(name, payload),
            OutboundAction::CancelRinging { room_name } => {
                self.cancel_ringing(room_name.as_deref())
            }
            OutboundAction::LaunchCallUi(call) => self.launch_call_ui(call),
        }
    }
}

pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on whatever context the host requires for UI work.
pub trait UiExecutor: Send + Sync {
    fn dispatch(&self, job: UiJob);
}

/// Runs the job on the calling thread.
pub struct InlineExecutor;

impl UiExecutor for InlineExecutor {
    fn dispatch(&self, job: UiJob) {
        job();
    }
}

/// Queues jobs for a single consumer loop, typically the process main task.
#[derive(Clone)]
pub struct MainThreadExecutor {
    tx: mpsc::UnboundedSender<UiJob>,
}

pub struct MainThreadQueue {
    rx: mpsc::UnboundedReceiver<UiJob>,
}

pub fn main_thread() -> (MainThreadExecutor, MainThreadQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainThreadExecutor { tx }, MainThreadQueue { rx })
}

impl UiExecutor for MainThreadExecutor {
    fn dispatch(&self, job: UiJob) {
        if self.tx.send(job).is_err() {
            warn!("ui: main thread queue closed, dropping action");
        }
    }
}

impl MainThreadQueue {
    /// Runs queued jobs until every executor handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
    }

    /// Runs whatever is queued right now and returns how many jobs ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }
}

/// Pairs a sink with the executor it must be called through.
#[derive(Clone)]
pub struct UiBridge {
    sink: Arc<dyn NotificationSink>,
    executor: Arc<dyn UiExecutor>,
}

impl UiBridge {
    pub fn new(sink: Arc<dyn NotificationSink>, executor: Arc<dyn UiExecutor>) -> Self {
        Self { sink, executor }
    }

    pub fn post(&self, action: OutboundAction) {
        let sink = Arc::clone(&self.sink);
        self.executor.dispatch(Box::new(move || sink.apply(&action)));
    }
}

/// The single outbound action owed for a resolved call, if any. Stale and
/// failed verifications only produce a log line.
pub fn call_action(outcome: &VerificationOutcome) -> Option<OutboundAction> {
    match outcome {
        VerificationOutcome::Timely(ctx) => {
            info!(
                room_name = %ctx.room_name,
                caller_name = %ctx.caller_name,
                "call: notification received in time"
            );
            Some(OutboundAction::LaunchCallUi(ctx.launch()))
        }
        VerificationOutcome::Stale => {
            info!("call: notification took too long to arrive");
            None
        }
        VerificationOutcome::VerificationFailed(reason) => {
            warn!(reason = %reason, code = reason.code(), "call: verification failed");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/actions_tests.rs"]
mod tests;
