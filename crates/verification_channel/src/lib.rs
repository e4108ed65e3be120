use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod ddp;

pub use ddp::{DdpConnector, DdpSession};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid verification url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("verification channel transport failed: {0}")]
    Transport(String),
    #[error("server rejected protocol handshake (suggested version {suggested:?})")]
    Rejected { suggested: Option<String> },
    #[error("connection closed before handshake completed")]
    ClosedDuringHandshake,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error("remote method failed: {error} ({reason})")]
    Remote {
        error: String,
        reason: String,
        details: Option<String>,
    },
    #[error("verification channel transport failed: {0}")]
    Transport(String),
    #[error("connection closed before the call resolved")]
    Closed,
}

/// A live connection to the verification server. It is owned by exactly one
/// verification attempt and consumed by [`VerificationSession::disconnect`].
#[async_trait]
pub trait VerificationSession: Send {
    async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<String, CallError>;
    async fn disconnect(self: Box<Self>);
}

#[async_trait]
pub trait VerificationConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn VerificationSession>, ConnectError>;
}
