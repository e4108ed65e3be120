//! Verification channel over DDP, the JSON-over-websocket protocol spoken by
//! Meteor servers.
//!
//! A session performs the `connect`/`connected` handshake, answers server
//! `ping` frames, and matches a method call to its `result` frame by id.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::{CallError, ConnectError, VerificationConnector, VerificationSession};

const DDP_VERSION: &str = "1";
const DDP_SUPPORTED_VERSIONS: &[&str] = &["1", "pre2", "pre1"];

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Connect {
        version: &'a str,
        support: &'a [&'a str],
    },
    Method {
        method: &'a str,
        params: &'a [Value],
        id: &'a str,
    },
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum ServerFrame {
    Connected {
        session: Option<String>,
    },
    Failed {
        version: Option<String>,
    },
    Ping {
        id: Option<String>,
    },
    Result {
        id: String,
        result: Option<Value>,
        error: Option<RemoteError>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: Option<Value>,
    reason: Option<String>,
    details: Option<Value>,
    message: Option<String>,
}

impl From<RemoteError> for CallError {
    fn from(value: RemoteError) -> Self {
        let error = match value.error {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        };
        let reason = value.reason.or(value.message).unwrap_or_default();
        let details = value.details.map(|d| match d {
            Value::String(s) => s,
            other => other.to_string(),
        });
        CallError::Remote {
            error,
            reason,
            details,
        }
    }
}

enum Incoming {
    Frame(ServerFrame),
    Closed,
}

/// Turns the configured server address into the websocket endpoint Meteor
/// serves DDP on. `http(s)://host` becomes `ws(s)://host/websocket`.
pub fn websocket_url(raw: &str) -> Result<Url, ConnectError> {
    let invalid = |reason: String| ConnectError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw.trim()).map_err(|err| invalid(err.to_string()))?;

    let ws_scheme = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    if let Some(scheme) = ws_scheme {
        url.set_scheme(scheme)
            .map_err(|_| invalid("cannot switch to websocket scheme".to_string()))?;
        if url.path().is_empty() || url.path() == "/" {
            url.set_path("/websocket");
        }
    }
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct DdpConnector {
    url: Url,
}

impl DdpConnector {
    pub fn new(raw_url: &str) -> Result<Self, ConnectError> {
        Ok(Self {
            url: websocket_url(raw_url)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl VerificationConnector for DdpConnector {
    async fn connect(&self) -> Result<Box<dyn VerificationSession>, ConnectError> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| ConnectError::Transport(err.to_string()))?;
        let session = DdpSession::handshake(stream).await?;
        info!(
            url = %self.url,
            session = session.session_id.as_deref().unwrap_or("-"),
            "ddp: connected"
        );
        Ok(Box::new(session))
    }
}

pub struct DdpSession {
    stream: WsStream,
    session_id: Option<String>,
}

impl DdpSession {
    async fn handshake(stream: WsStream) -> Result<Self, ConnectError> {
        let mut session = Self {
            stream,
            session_id: None,
        };
        session
            .send(&ClientFrame::Connect {
                version: DDP_VERSION,
                support: DDP_SUPPORTED_VERSIONS,
            })
            .await
            .map_err(ConnectError::Transport)?;

        loop {
            match session.next_frame().await.map_err(ConnectError::Transport)? {
                Incoming::Frame(ServerFrame::Connected { session: id }) => {
                    session.session_id = id;
                    return Ok(session);
                }
                Incoming::Frame(ServerFrame::Failed { version }) => {
                    let _ = session.stream.close(None).await;
                    return Err(ConnectError::Rejected { suggested: version });
                }
                Incoming::Frame(_) => {}
                Incoming::Closed => return Err(ConnectError::ClosedDuringHandshake),
            }
        }
    }

    async fn send(&mut self, frame: &ClientFrame<'_>) -> Result<(), String> {
        let text = serde_json::to_string(frame).map_err(|err| err.to_string())?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|err| err.to_string())
    }

    /// Next DDP frame, answering heartbeats along the way. Non-JSON and
    /// untagged frames (such as `server_id`) are skipped.
    async fn next_frame(&mut self) -> Result<Incoming, String> {
        loop {
            let Some(message) = self.stream.next().await else {
                return Ok(Incoming::Closed);
            };
            let text = match message.map_err(|err| err.to_string())? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(Incoming::Closed),
                _ => continue,
            };
            let frame = match serde_json::from_str::<ServerFrame>(&text) {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(%err, "ddp: skipping unrecognized frame");
                    continue;
                }
            };
            if let ServerFrame::Ping { id } = frame {
                self.send(&ClientFrame::Pong { id }).await?;
                continue;
            }
            return Ok(Incoming::Frame(frame));
        }
    }
}

#[async_trait]
impl VerificationSession for DdpSession {
    async fn call(&mut self, method: &str, args: Vec<Value>) -> Result<String, CallError> {
        let call_id = uuid::Uuid::new_v4().to_string();
        self.send(&ClientFrame::Method {
            method,
            params: &args,
            id: &call_id,
        })
        .await
        .map_err(CallError::Transport)?;
        debug!(method, call_id = %call_id, "ddp: method sent");

        loop {
            match self.next_frame().await.map_err(CallError::Transport)? {
                Incoming::Frame(ServerFrame::Result { id, result, error }) if id == call_id => {
                    if let Some(error) = error {
                        return Err(error.into());
                    }
                    return Ok(match result {
                        Some(Value::String(s)) => s,
                        Some(other) => other.to_string(),
                        None => String::new(),
                    });
                }
                Incoming::Frame(_) => {}
                Incoming::Closed => return Err(CallError::Closed),
            }
        }
    }

    async fn disconnect(self: Box<Self>) {
        let mut this = self;
        if let Err(err) = this.stream.close(None).await {
            warn!(%err, "ddp: close failed");
        }
        debug!(
            session = this.session_id.as_deref().unwrap_or("-"),
            "ddp: disconnected"
        );
    }
}

#[cfg(test)]
#[path = "tests/ddp_tests.rs"]
mod tests;
