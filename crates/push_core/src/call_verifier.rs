//! Decides whether an incoming-call push is still worth ringing for.
//!
//! A call push can sit undelivered for hours (device off, doze, reboot), so a
//! call is only surfaced if it was sent recently. Two ways to decide that:
//!
//! * [`verify_locally`] compares `timeSent` against the device clock. Cheap,
//!   but a skewed device clock makes it wrong; nothing here detects skew.
//! * [`verify_remotely`] asks the server, whose clock produced `timeSent`,
//!   over a one-shot verification session.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared::{
    domain::{CallContext, FailureReason, VerificationOutcome},
    error::PushError,
};
use tracing::{debug, warn};
use verification_channel::VerificationConnector;

pub const CALL_VALIDITY_WINDOW: Duration = Duration::from_millis(30_000);
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);
pub const VERIFY_METHOD: &str = "verifyTimeOfNotification";
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub enum VerificationStrategy {
    LocalClock {
        window: Duration,
    },
    Remote {
        connector: Arc<dyn VerificationConnector>,
        timeout: Duration,
    },
}

impl fmt::Debug for VerificationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalClock { window } => f
                .debug_struct("LocalClock")
                .field("window", window)
                .finish(),
            Self::Remote { timeout, .. } => f
                .debug_struct("Remote")
                .field("timeout", timeout)
                .finish_non_exhaustive(),
        }
    }
}

/// Lifecycle of one remote verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Connecting,
    AwaitingResponse,
    Resolved,
    Closed,
}

struct AttemptTrace<'a> {
    room_name: &'a str,
    state: SessionState,
}

impl<'a> AttemptTrace<'a> {
    fn new(room_name: &'a str) -> Self {
        Self {
            room_name,
            state: SessionState::Idle,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!(
            room_name = self.room_name,
            from = ?self.state,
            to = ?next,
            "call: verification session transition"
        );
        self.state = next;
    }
}

pub struct CallVerifier {
    strategy: VerificationStrategy,
    clock: Arc<dyn Clock>,
}

impl CallVerifier {
    pub fn new(strategy: VerificationStrategy) -> Self {
        Self {
            strategy,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn local() -> Self {
        Self::new(VerificationStrategy::LocalClock {
            window: CALL_VALIDITY_WINDOW,
        })
    }

    pub fn remote(connector: Arc<dyn VerificationConnector>, timeout: Duration) -> Self {
        Self::new(VerificationStrategy::Remote { connector, timeout })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn strategy(&self) -> &VerificationStrategy {
        &self.strategy
    }

    /// Checks that `ctx` carries what this strategy needs. The local clock
    /// has to parse `timeSent`; the server gets the string as delivered and
    /// judges it itself.
    pub fn admit(&self, ctx: &CallContext) -> Result<(), PushError> {
        match self.strategy {
            VerificationStrategy::LocalClock { .. } => ctx.sent_at().map(|_| ()),
            VerificationStrategy::Remote { .. } => Ok(()),
        }
    }

    pub async fn verify(&self, ctx: CallContext) -> VerificationOutcome {
        match &self.strategy {
            VerificationStrategy::LocalClock { window } => {
                verify_within(ctx, self.clock.now(), *window)
            }
            VerificationStrategy::Remote { connector, timeout } => {
                verify_remotely(ctx, connector.as_ref(), *timeout).await
            }
        }
    }
}

pub fn verify_locally(ctx: CallContext, now: DateTime<Utc>) -> VerificationOutcome {
    verify_within(ctx, now, CALL_VALIDITY_WINDOW)
}

/// Timely iff `|now - timeSent|` is strictly below `window`. A `timeSent` that
/// does not parse can never be shown to be recent, so it is stale.
pub fn verify_within(ctx: CallContext, now: DateTime<Utc>, window: Duration) -> VerificationOutcome {
    let sent_at = match ctx.sent_at() {
        Ok(at) => at,
        Err(err) => {
            warn!(room_name = %ctx.room_name, %err, "call: cannot compare timeSent locally");
            return VerificationOutcome::Stale;
        }
    };
    let elapsed_ms = (now - sent_at).num_milliseconds().unsigned_abs();
    if u128::from(elapsed_ms) < window.as_millis() {
        VerificationOutcome::Timely(ctx)
    } else {
        VerificationOutcome::Stale
    }
}

/// Only "true" (any case) is truthy; anything else, including garbage, is not.
pub fn is_truthy(response: &str) -> bool {
    response.eq_ignore_ascii_case("true")
}

/// One connect, one `verifyTimeOfNotification` call, one disconnect. The
/// session is dropped with the attempt and never reused. `timeout` bounds
/// connect and call together.
pub async fn verify_remotely(
    ctx: CallContext,
    connector: &dyn VerificationConnector,
    timeout: Duration,
) -> VerificationOutcome {
    let mut trace = AttemptTrace::new(&ctx.room_name);
    let deadline = tokio::time::Instant::now() + timeout;

    trace.advance(SessionState::Connecting);
    let mut session = match tokio::time::timeout_at(deadline, connector.connect()).await {
        Ok(Ok(session)) => session,
        Ok(Err(err)) => {
            trace.advance(SessionState::Closed);
            return VerificationOutcome::VerificationFailed(FailureReason::ConnectError(
                err.to_string(),
            ));
        }
        Err(_) => {
            trace.advance(SessionState::Closed);
            return VerificationOutcome::VerificationFailed(FailureReason::Timeout);
        }
    };

    trace.advance(SessionState::AwaitingResponse);
    let args = vec![Value::String(ctx.time_sent.clone())];
    let response = tokio::time::timeout_at(deadline, session.call(VERIFY_METHOD, args)).await;
    trace.advance(SessionState::Resolved);

    let outcome = match response {
        Ok(Ok(result)) => {
            debug!(room_name = %ctx.room_name, result = %result, "call: verification result");
            if is_truthy(&result) {
                None
            } else {
                Some(VerificationOutcome::Stale)
            }
        }
        Ok(Err(err)) => Some(VerificationOutcome::VerificationFailed(
            FailureReason::CallError(err.to_string()),
        )),
        Err(_) => Some(VerificationOutcome::VerificationFailed(FailureReason::Timeout)),
    };

    if tokio::time::timeout(DISCONNECT_GRACE, session.disconnect())
        .await
        .is_err()
    {
        warn!(room_name = %ctx.room_name, "call: disconnect did not finish, dropping session");
    }
    trace.advance(SessionState::Closed);

    outcome.unwrap_or(VerificationOutcome::Timely(ctx))
}

#[cfg(test)]
#[path = "tests/call_verifier_tests.rs"]
mod tests;
