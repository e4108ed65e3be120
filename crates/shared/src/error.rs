use thiserror::Error;

/// Recoverable failures while handling one push message. None of these
/// escape dispatch; they are logged and the message is dropped or degraded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("custom notification payload is not a JSON object: {0}")]
    MalformedPayload(String),
    #[error("badge count needs to be an integer, got {0:?}")]
    MalformedBadge(String),
    #[error("incoming call is missing {missing}")]
    IncompleteCallContext { missing: &'static str },
    #[error("timeSent is not a timestamp: {0:?}")]
    MalformedTimestamp(String),
}

impl PushError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::MalformedBadge(_) => "malformed_badge",
            Self::IncompleteCallContext { .. } => "incomplete_call_context",
            Self::MalformedTimestamp(_) => "malformed_timestamp",
        }
    }
}
