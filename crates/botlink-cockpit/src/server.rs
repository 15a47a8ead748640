//! [`BridgeServer`] – WebSocket accept loop and per-connection command
//! processing.
//!
//! Listens on `127.0.0.1:26966` by default. Every accepted client is
//! registered with the [`ConnectionRegistry`][botlink_middleware::ConnectionRegistry]
//! so it receives all broadcasts, and its inbound text frames are handled
//! by [`process_message`].

use std::net::SocketAddr;
use std::sync::Arc;

use botlink_middleware::{Connection, WsSink};
use botlink_runtime::{BridgeContext, CancellationToken};
use botlink_types::wire::{CMD_CALL, CMD_GET_STATE, EVENT_CALL_RESULT};
use botlink_types::{Ack, BridgeError, CallOutcome, CallRequest, Command, InboundMessage};
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Default TCP port of the bridge.
pub const DEFAULT_PORT: u16 = 26966;

// ---------------------------------------------------------------------------
// BridgeServer
// ---------------------------------------------------------------------------

/// WebSocket front end of the bridge.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use botlink_cockpit::BridgeServer;
/// use botlink_hal::SimRobot;
/// use botlink_runtime::{BridgeContext, CancellationToken};
///
/// #[tokio::main]
/// async fn main() {
///     let robot = Arc::new(SimRobot::builder().with_cubes(3).build());
///     let ctx = Arc::new(BridgeContext::new(robot, Duration::from_secs(30)));
///     BridgeServer::new(ctx)
///         .run(CancellationToken::new())
///         .await
///         .expect("bridge server failed");
/// }
/// ```
pub struct BridgeServer {
    ctx: Arc<BridgeContext>,
    addr: SocketAddr,
}

impl BridgeServer {
    /// Server on `127.0.0.1:`[`DEFAULT_PORT`].
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            ctx,
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
        }
    }

    /// Override the listening address (builder-style).
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Transport`] if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener, BridgeError> {
        TcpListener::bind(self.addr)
            .await
            .map_err(|e| BridgeError::Transport(format!("bind error on {}: {e}", self.addr)))
    }

    /// Bind and serve until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BridgeError> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await
    }

    /// Accept connections on `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), BridgeError> {
        let local = listener
            .local_addr()
            .map_err(|e| BridgeError::Transport(format!("listener has no address: {e}")))?;
        info!(addr = %local, "bridge listening on ws://{local}");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = Arc::clone(&self.ctx);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, ctx, cancel).await {
                                warn!(%peer, error = %e, "client connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                },
            }
        }
        info!("bridge stopped accepting connections");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<BridgeContext>,
    cancel: CancellationToken,
) -> Result<(), BridgeError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| BridgeError::Transport(format!("WS handshake from {peer}: {e}")))?;

    let (ws_tx, mut ws_rx) = ws_stream.split();
    let conn = ctx.connections().register(peer, Box::new(WsSink::new(ws_tx)));
    info!(%peer, conn = %conn.id(), clients = ctx.connections().len(), "client connected");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                conn.close().await;
                break;
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => process_message(&ctx, &conn, text.as_str()).await,
                Some(Ok(Message::Binary(_))) => debug!(%peer, "ignoring binary frame from client"),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%peer, error = %e, "read error");
                    break;
                }
                _ => {}
            },
        }
    }

    ctx.connections().remove(conn.id());
    info!(%peer, clients = ctx.connections().len(), "client disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Command processing
// ---------------------------------------------------------------------------

/// Handle one inbound text frame from `conn`.
///
/// | Command | Replies |
/// |---|---|
/// | `get_state` | state to the requester, then ack |
/// | `call` | `call_result` event to everyone, then ack to the requester |
/// | anything else | logged, no ack |
///
/// Every processed message ends with a state broadcast. Text that is not a
/// JSON object is logged and dropped.
pub async fn process_message(ctx: &BridgeContext, conn: &Connection, raw: &str) {
    let peer = conn.peer();
    let msg = match InboundMessage::parse(raw) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%peer, error = %e, "dropping malformed message");
            return;
        }
    };
    info!(%peer, cmd = msg.cmd.as_deref().unwrap_or(""), args = %msg.args, "command received");

    match msg.command() {
        Command::GetState => {
            if let Err(e) = ctx.send_state(conn).await {
                debug!(%peer, error = %e, "state reply failed");
            }
            send_ack(ctx, conn, CMD_GET_STATE).await;
        }
        Command::Call(args) => {
            let result = match CallRequest::from_args(&args) {
                Ok(req) => {
                    let path = req.path.clone();
                    let result = ctx.dispatcher().dispatch(req).await;
                    log_call_result(&path, &result);
                    result
                }
                Err(e) => {
                    error!(%peer, error = %e, "malformed call");
                    Err(e)
                }
            };
            let outcome = CallOutcome::from(result);
            if let Err(e) = ctx.connections().broadcast_event(EVENT_CALL_RESULT, Some(outcome)).await {
                error!(error = %e, "call result broadcast failed");
            }
            send_ack(ctx, conn, CMD_CALL).await;
        }
        Command::Unknown(cmd) => warn!(%peer, cmd, "unknown command"),
    }

    if let Err(e) = ctx.broadcast_state().await {
        warn!(error = %e, "state broadcast failed");
    }
}

fn log_call_result(path: &str, result: &Result<botlink_types::CallResult, BridgeError>) {
    match result {
        Ok(r) if r.state.as_deref() == Some("action_failed") => warn!(
            path,
            reason = r.failure_reason.as_deref().unwrap_or("unknown"),
            "action failed"
        ),
        Ok(r) => debug!(path, state = r.state.as_deref().unwrap_or("done"), "call completed"),
        Err(e) => error!(path, error = %e, "call error"),
    }
}

async fn send_ack(ctx: &BridgeContext, conn: &Connection, cmd: &str) {
    if let Err(e) = ctx.connections().send_json(conn, &Ack::for_cmd(cmd)).await {
        debug!(peer = %conn.peer(), error = %e, "ack failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use botlink_hal::{CameraFrame, SimRobot};
    use botlink_runtime::push_loops::camera_tick;
    use botlink_types::wire::decode_framed;
    use futures_util::SinkExt;
    use serde_json::{Value, json};
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct Harness {
        sim: Arc<SimRobot>,
        ctx: Arc<BridgeContext>,
        addr: SocketAddr,
        cancel: CancellationToken,
    }

    impl Harness {
        async fn start() -> Self {
            let sim = Arc::new(SimRobot::builder().with_cubes(3).build());
            let ctx = Arc::new(BridgeContext::new(sim.clone(), Duration::from_secs(2)));
            let server = BridgeServer::new(Arc::clone(&ctx))
                .with_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
            let listener = server.bind().await.unwrap();
            let addr = listener.local_addr().unwrap();
            let cancel = CancellationToken::new();
            tokio::spawn(server.serve(listener, cancel.clone()));
            Self { sim, ctx, addr, cancel }
        }

        async fn connect(&self) -> Client {
            let (client, _) = connect_async(format!("ws://{}", self.addr)).await.unwrap();
            // Registration happens after the handshake completes server-side.
            for _ in 0..100 {
                if !self.ctx.connections().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            client
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn send(client: &mut Client, v: Value) {
        client.send(Message::Text(v.to_string().into())).await.unwrap();
    }

    async fn next_message(client: &mut Client) -> Message {
        tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for server")
            .expect("stream ended")
            .expect("read error")
    }

    async fn next_json(client: &mut Client) -> Value {
        match next_message(client).await {
            Message::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_state_replies_state_ack_then_broadcast() {
        let h = Harness::start().await;
        let mut client = h.connect().await;

        send(&mut client, json!({"cmd": "get_state"})).await;

        let direct = next_json(&mut client).await;
        assert!(direct["state"]["battery_percent"].is_string());
        assert_eq!(direct["state"]["cube_1_connected"], json!(true));
        assert_eq!(next_json(&mut client).await, json!({"ok": true, "cmd": "get_state"}));
        assert!(next_json(&mut client).await.get("state").is_some());
    }

    #[tokio::test]
    async fn unknown_path_yields_error_result() {
        let h = Harness::start().await;
        let mut client = h.connect().await;

        send(&mut client, json!({"cmd": "call", "args": ["robot.nonexistent", [], {}, false]})).await;

        let result = next_json(&mut client).await;
        assert_eq!(result["event"], json!("call_result"));
        let data = result["data"].as_object().unwrap();
        assert_eq!(data.len(), 1);
        assert!(data["error"].as_str().unwrap().contains("robot.nonexistent"));
        assert_eq!(next_json(&mut client).await, json!({"ok": true, "cmd": "call"}));
        assert!(next_json(&mut client).await.get("state").is_some());
    }

    #[tokio::test]
    async fn call_result_is_broadcast_and_ack_is_private() {
        let h = Harness::start().await;
        let mut caller = h.connect().await;
        let mut watcher = h.connect().await;
        for _ in 0..100 {
            if h.ctx.connections().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        send(
            &mut caller,
            json!({"cmd": "call", "args": ["robot.say_text", ["hi"], {"call_id": "42"}, true]}),
        )
        .await;

        let result = next_json(&mut caller).await;
        assert_eq!(result["data"]["call_id"], json!("42"));
        assert_eq!(result["data"]["state"], json!("action_succeeded"));
        assert_eq!(next_json(&mut caller).await["cmd"], json!("call"));

        let seen = next_json(&mut watcher).await;
        assert_eq!(seen["event"], json!("call_result"));
        // The watcher gets the state broadcast next, not an ack.
        assert!(next_json(&mut watcher).await.get("state").is_some());
        assert!(h.sim.calls()[0].starts_with("say_text text=\"hi\""));
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_keep_connection_alive() {
        let h = Harness::start().await;
        let mut client = h.connect().await;

        client.send(Message::Text("not json".into())).await.unwrap();
        send(&mut client, json!({"cmd": "dance"})).await;
        // Unknown command: no ack, only the state broadcast.
        assert!(next_json(&mut client).await.get("state").is_some());

        send(&mut client, json!({"cmd": "get_state"})).await;
        assert!(next_json(&mut client).await.get("state").is_some());
        assert_eq!(next_json(&mut client).await["cmd"], json!("get_state"));
    }

    #[tokio::test]
    async fn camera_frames_arrive_as_framed_binary() {
        let h = Harness::start().await;
        let mut client = h.connect().await;

        h.ctx.frames().store(Arc::new(CameraFrame::solid(16, 8, [0, 0, 255])));
        assert_eq!(camera_tick(&h.ctx).await.unwrap(), 1);

        match next_message(&mut client).await {
            Message::Binary(bytes) => {
                let (header, png) = decode_framed(&bytes).unwrap();
                assert_eq!(header["event"], json!("camera_frame"));
                assert_eq!(header["data"]["w"], json!(16));
                assert_eq!(&png[1..4], b"PNG");
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_removes_connection() {
        let h = Harness::start().await;
        let mut client = h.connect().await;
        assert_eq!(h.ctx.connections().len(), 1);

        client.close(None).await.unwrap();
        for _ in 0..100 {
            if h.ctx.connections().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h.ctx.connections().is_empty());
    }

    #[test]
    fn default_addr_is_loopback_26966() {
        let robot = Arc::new(SimRobot::builder().build());
        let ctx = Arc::new(BridgeContext::new(robot, Duration::from_secs(1)));
        let server = BridgeServer::new(ctx);
        assert_eq!(server.addr(), SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)));
    }
}
