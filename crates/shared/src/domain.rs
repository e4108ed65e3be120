use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PushError;

pub const KEY_CUSTOM_NOTIFICATION: &str = "custom_notification";
pub const KEY_CANCEL_RINGING: &str = "cancelRinging";
pub const KEY_ROOM_NAME: &str = "roomName";
pub const KEY_CALLER_NAME: &str = "callerName";
pub const KEY_TIME_SENT: &str = "timeSent";
pub const KEY_BADGE: &str = "badge";

/// One push payload as delivered by the transport: a flat string map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(pub HashMap<String, String>);

impl InboundMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn data(&self) -> &HashMap<String, String> {
        &self.0
    }
}

/// Call fields exactly as they arrived. Any of them may be missing; use
/// [`IncomingCall::into_context`] before handing the call to a verifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingCall {
    pub caller_name: Option<String>,
    pub room_name: Option<String>,
    pub time_sent: Option<String>,
}

impl IncomingCall {
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            caller_name: message.get(KEY_CALLER_NAME).map(str::to_owned),
            room_name: message.get(KEY_ROOM_NAME).map(str::to_owned),
            time_sent: message.get(KEY_TIME_SENT).map(str::to_owned),
        }
    }

    pub fn into_context(self) -> Result<CallContext, PushError> {
        let room_name = non_empty(self.room_name)
            .ok_or(PushError::IncompleteCallContext { missing: KEY_ROOM_NAME })?;
        let caller_name = non_empty(self.caller_name)
            .ok_or(PushError::IncompleteCallContext { missing: KEY_CALLER_NAME })?;
        let time_sent = non_empty(self.time_sent)
            .ok_or_else(|| PushError::MalformedTimestamp(String::new()))?;

        Ok(CallContext {
            caller_name,
            room_name,
            time_sent,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Accepts epoch milliseconds or an RFC 3339 timestamp.
pub fn parse_time_sent(raw: &str) -> Result<DateTime<Utc>, PushError> {
    let trimmed = raw.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        if let Some(at) = Utc.timestamp_millis_opt(millis).single() {
            return Ok(at);
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| PushError::MalformedTimestamp(raw.to_string()))
}

/// A call with every field present. `time_sent` is kept exactly as delivered
/// so it can be forwarded untouched; [`CallContext::sent_at`] parses it when a
/// local comparison needs an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallContext {
    pub caller_name: String,
    pub room_name: String,
    pub time_sent: String,
}

impl CallContext {
    pub fn sent_at(&self) -> Result<DateTime<Utc>, PushError> {
        parse_time_sent(&self.time_sent)
    }

    pub fn launch(&self) -> CallLaunch {
        CallLaunch {
            caller_name: self.caller_name.clone(),
            room_name: self.room_name.clone(),
        }
    }
}

/// What the host needs to bring up the incoming-call screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLaunch {
    pub caller_name: String,
    pub room_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    ConnectError(String),
    CallError(String),
    Timeout,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectError(_) => "connect-error",
            Self::CallError(_) => "call-error",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectError(detail) | Self::CallError(detail) => {
                write!(f, "{}: {detail}", self.code())
            }
            Self::Timeout => f.write_str(self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Timely(CallContext),
    Stale,
    VerificationFailed(FailureReason),
}

impl VerificationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Timely(_) => "timely",
            Self::Stale => "stale",
            Self::VerificationFailed(_) => "verification_failed",
        }
    }
}

#[cfg(test)]
#[path = "tests/domain_tests.rs"]
mod tests;
