use super::*;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use std::time::Duration;
use tokio::{net::TcpListener, sync::mpsc};

#[derive(Clone)]
enum ServerReply {
    Result(Value),
    Error,
    RejectVersion,
    CloseOnMethod,
}

#[derive(Clone)]
struct ServerState {
    reply: ServerReply,
    ping_after_connect: bool,
    observed: mpsc::UnboundedSender<String>,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_ddp(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: Value) {
    let _ = socket.send(WsMessage::Text(value.to_string())).await;
}

async fn serve_ddp(mut socket: WebSocket, state: ServerState) {
    send_json(&mut socket, json!({ "server_id": "0" })).await;

    while let Some(Ok(message)) = socket.recv().await {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => {
                let _ = state.observed.send("closed".to_string());
                return;
            }
            _ => continue,
        };
        let frame: Value = serde_json::from_str(&text).expect("client frame is json");
        match frame["msg"].as_str() {
            Some("connect") => {
                let _ = state
                    .observed
                    .send(format!("connect:{}", frame["version"].as_str().unwrap_or("")));
                if matches!(state.reply, ServerReply::RejectVersion) {
                    send_json(&mut socket, json!({ "msg": "failed", "version": "2" })).await;
                    continue;
                }
                send_json(&mut socket, json!({ "msg": "connected", "session": "s-1" })).await;
                if state.ping_after_connect {
                    send_json(&mut socket, json!({ "msg": "ping", "id": "hb-1" })).await;
                }
            }
            Some("pong") => {
                let _ = state
                    .observed
                    .send(format!("pong:{}", frame["id"].as_str().unwrap_or("")));
            }
            Some("method") => {
                let _ = state.observed.send(format!(
                    "method:{}:{}",
                    frame["method"].as_str().unwrap_or(""),
                    frame["params"]
                ));
                let id = frame["id"].clone();
                send_json(&mut socket, json!({ "msg": "result", "id": "unrelated", "result": false }))
                    .await;
                send_json(&mut socket, json!({ "msg": "updated", "methods": [id.clone()] })).await;
                match &state.reply {
                    ServerReply::Result(result) => {
                        send_json(
                            &mut socket,
                            json!({ "msg": "result", "id": id, "result": result }),
                        )
                        .await;
                    }
                    ServerReply::Error => {
                        send_json(
                            &mut socket,
                            json!({
                                "msg": "result",
                                "id": id,
                                "error": { "error": 403, "reason": "too late", "details": "late by 40s" }
                            }),
                        )
                        .await;
                    }
                    ServerReply::CloseOnMethod => {
                        let _ = socket.close().await;
                        let _ = state.observed.send("server-closed".to_string());
                        return;
                    }
                    ServerReply::RejectVersion => {}
                }
            }
            _ => {}
        }
    }
    let _ = state.observed.send("eof".to_string());
}

async fn spawn_ddp_server(
    reply: ServerReply,
    ping_after_connect: bool,
) -> anyhow::Result<(String, mpsc::UnboundedReceiver<String>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let state = ServerState {
        reply,
        ping_after_connect,
        observed: tx,
    };
    let app = Router::new()
        .route("/websocket", get(ws_handler))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), rx))
}

async fn observed_until(rx: &mut mpsc::UnboundedReceiver<String>, last: &str) -> Vec<String> {
    let mut seen = Vec::new();
    loop {
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("server observation in time");
        let Some(event) = next else {
            return seen;
        };
        let done = event == last;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[test]
fn converts_http_urls_to_meteor_websocket_endpoint() {
    assert_eq!(
        websocket_url("https://calls.example.com").expect("url").as_str(),
        "wss://calls.example.com/websocket"
    );
    assert_eq!(
        websocket_url("http://127.0.0.1:3000/").expect("url").as_str(),
        "ws://127.0.0.1:3000/websocket"
    );
    assert_eq!(
        websocket_url("ws://host/custom").expect("url").as_str(),
        "ws://host/custom"
    );
    assert!(matches!(
        websocket_url("ftp://host"),
        Err(ConnectError::InvalidUrl { .. })
    ));
}

#[tokio::test]
async fn call_returns_matching_string_result_and_disconnects() {
    let (url, mut observed) = spawn_ddp_server(ServerReply::Result(json!("true")), false)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let mut session = connector.connect().await.expect("connect");
    let result = session
        .call("verifyTimeOfNotification", vec![json!("1700000000000")])
        .await
        .expect("call");
    assert_eq!(result, "true");
    session.disconnect().await;

    let seen = observed_until(&mut observed, "closed").await;
    assert_eq!(
        seen,
        vec![
            "connect:1".to_string(),
            r#"method:verifyTimeOfNotification:["1700000000000"]"#.to_string(),
            "closed".to_string(),
        ]
    );
}

#[tokio::test]
async fn non_string_results_are_rendered_as_json_text() {
    let (url, _observed) = spawn_ddp_server(ServerReply::Result(json!(false)), false)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let mut session = connector.connect().await.expect("connect");
    let result = session
        .call("verifyTimeOfNotification", vec![json!("0")])
        .await
        .expect("call");
    assert_eq!(result, "false");
    session.disconnect().await;
}

#[tokio::test]
async fn answers_server_ping_while_waiting_for_result() {
    let (url, mut observed) = spawn_ddp_server(ServerReply::Result(json!("true")), true)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let mut session = connector.connect().await.expect("connect");
    session
        .call("verifyTimeOfNotification", vec![json!("0")])
        .await
        .expect("call");
    session.disconnect().await;

    let seen = observed_until(&mut observed, "closed").await;
    assert!(seen.contains(&"pong:hb-1".to_string()), "saw {seen:?}");
}

#[tokio::test]
async fn remote_error_maps_to_call_error() {
    let (url, _observed) = spawn_ddp_server(ServerReply::Error, false)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let mut session = connector.connect().await.expect("connect");
    let err = session
        .call("verifyTimeOfNotification", vec![json!("0")])
        .await
        .expect_err("remote error");
    match err {
        CallError::Remote {
            error,
            reason,
            details,
        } => {
            assert_eq!(error, "403");
            assert_eq!(reason, "too late");
            assert_eq!(details.as_deref(), Some("late by 40s"));
        }
        other => panic!("unexpected error: {other}"),
    }
    session.disconnect().await;
}

#[tokio::test]
async fn peer_close_during_call_is_reported() {
    let (url, _observed) = spawn_ddp_server(ServerReply::CloseOnMethod, false)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let mut session = connector.connect().await.expect("connect");
    let err = session
        .call("verifyTimeOfNotification", vec![json!("0")])
        .await
        .expect_err("closed");
    assert!(
        matches!(err, CallError::Closed | CallError::Transport(_)),
        "unexpected error: {err}"
    );
    session.disconnect().await;
}

#[tokio::test]
async fn rejected_handshake_is_a_connect_error() {
    let (url, _observed) = spawn_ddp_server(ServerReply::RejectVersion, false)
        .await
        .expect("spawn server");
    let connector = DdpConnector::new(&url).expect("connector");

    let err = connector.connect().await.err().expect("rejected");
    match err {
        ConnectError::Rejected { suggested } => assert_eq!(suggested.as_deref(), Some("2")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unreachable_server_is_a_transport_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let connector = DdpConnector::new(&format!("ws://{addr}/websocket")).expect("connector");
    let err = connector.connect().await.err().expect("unreachable");
    assert!(matches!(err, ConnectError::Transport(_)), "unexpected error: {err}");
}
