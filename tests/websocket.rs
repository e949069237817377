#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use live_reload_agent::transport::{TransportConfig, WebSocketTransport};
use live_reload_agent::{Event, LiveReload, ReloadEvent, ReloadEventType, ServerOptions};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::common::{FakePrompt, FakeView, ORIGINAL_URL, ViewCall};

#[derive(Debug, Clone)]
enum ServerCommand {
    Text(String),
    Binary(Vec<u8>),
    Close(String),
    CloseWithoutStatus,
}

#[derive(Debug)]
struct Handshake {
    path: String,
    token: Option<String>,
}

/// Mock dev server.
struct MockWsServer {
    addr: SocketAddr,
    /// Commands for ALL connected clients
    command_tx: broadcast::Sender<ServerCommand>,
    handshake_rx: mpsc::UnboundedReceiver<Handshake>,
    /// Text frames sent by clients
    message_rx: mpsc::UnboundedReceiver<String>,
    /// Close frames sent by clients
    close_rx: mpsc::UnboundedReceiver<(u16, String)>,
    connections: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<ServerCommand>(100);
        let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = command_tx.clone();
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake so nothing sent after "connected" is missed
                let mut command_rx = broadcast_tx.subscribe();
                let handshake_tx = handshake_tx.clone();
                let callback = move |request: &Request, response: Response| {
                    let token = request
                        .headers()
                        .get("x-token")
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    drop(handshake_tx.send(Handshake {
                        path: request.uri().path().to_owned(),
                        token,
                    }));
                    Ok::<_, ErrorResponse>(response)
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };
                accepted.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let message_tx = message_tx.clone();
                let close_tx = close_tx.clone();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(message_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        if let Some(frame) = frame {
                                            drop(close_tx.send((u16::from(frame.code), frame.reason.to_string())));
                                        }
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                let message = match command {
                                    Ok(ServerCommand::Text(text)) => Message::Text(text.into()),
                                    Ok(ServerCommand::Binary(bytes)) => Message::Binary(bytes.into()),
                                    Ok(ServerCommand::Close(reason)) => Message::Close(Some(CloseFrame {
                                        code: CloseCode::Away,
                                        reason: reason.into(),
                                    })),
                                    Ok(ServerCommand::CloseWithoutStatus) => Message::Close(None),
                                    Err(_) => break,
                                };
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            handshake_rx,
            message_rx,
            close_rx,
            connections,
        }
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a text frame to all connected clients.
    fn send(&self, message: &str) {
        drop(self.command_tx.send(ServerCommand::Text(message.to_owned())));
    }

    /// Send a binary frame to all connected clients.
    fn send_binary(&self, bytes: &[u8]) {
        drop(self.command_tx.send(ServerCommand::Binary(bytes.to_vec())));
    }

    /// Close every connected client with code 1001.
    fn close_all(&self, reason: &str) {
        drop(self.command_tx.send(ServerCommand::Close(reason.to_owned())));
    }

    /// Close every connected client with an empty close frame.
    fn close_all_without_status(&self) {
        drop(self.command_tx.send(ServerCommand::CloseWithoutStatus));
    }

    async fn recv_handshake(&mut self) -> Option<Handshake> {
        timeout(Duration::from_secs(2), self.handshake_rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn recv_message(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    async fn recv_close(&mut self) -> Option<(u16, String)> {
        timeout(Duration::from_secs(2), self.close_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Server that completes the handshake and then never reads again, so PINGs go unanswered.
async fn start_unresponsive_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            if let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await {
                held.push(ws_stream);
            }
        }
    });

    addr
}

fn agent(view: &Arc<FakeView>, prompt: Option<&Arc<FakePrompt>>) -> LiveReload {
    agent_with(WebSocketTransport::default(), view, prompt)
}

fn agent_with(
    transport: WebSocketTransport,
    view: &Arc<FakeView>,
    prompt: Option<&Arc<FakePrompt>>,
) -> LiveReload {
    let view_surface = Arc::clone(view);
    let builder = LiveReload::builder()
        .transport(Arc::new(transport))
        .view(view_surface);

    match prompt {
        Some(prompt) => {
            let prompt_surface = Arc::clone(prompt);
            builder.prompt(prompt_surface).build()
        }
        None => builder.build(),
    }
}

/// Wait for the next `reloadEvent` of `event_type`, skipping everything else.
async fn wait_for(
    events: &mut broadcast::Receiver<Event>,
    event_type: ReloadEventType,
) -> ReloadEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Event::Reload(event) = events.recv().await.unwrap()
                && event.event_type == event_type
            {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

mod session {
    use super::*;

    #[tokio::test]
    async fn connects_with_headers_and_routes_messages() {
        let mut server = MockWsServer::start().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let agent = agent(&view, None);
        let mut events = agent.subscribe();

        agent
            .configure(
                ServerOptions::builder()
                    .url(server.http_url())
                    .websocket_path("live")
                    .headers(HashMap::from([("X-Token".to_owned(), "abc".to_owned())]))
                    .build(),
            )
            .await
            .unwrap();
        agent.connect().await.unwrap();

        let connected = wait_for(&mut events, ReloadEventType::Connected).await;
        assert_eq!(connected.message.as_deref(), Some("connected"));
        assert!(agent.status().connected, "status follows the socket");

        let handshake = server.recv_handshake().await.unwrap();
        assert_eq!(handshake.path, "/live");
        assert_eq!(handshake.token.as_deref(), Some("abc"));
        assert_eq!(view.calls(), vec![ViewCall::Load(server.http_url())]);

        server.send(r#"{"type":"file-update","file":{"path":"src/main.ts","hash":"42"}}"#);
        let update = wait_for(&mut events, ReloadEventType::FileUpdate).await;
        assert_eq!(
            serde_json::to_value(update.file).unwrap(),
            json!({ "path": "src/main.ts", "hash": "42" })
        );

        server.send("reload please");
        wait_for(&mut events, ReloadEventType::FullReload).await;

        agent.send("hello").await.unwrap();
        assert_eq!(server.recv_message().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn manual_disconnect_sends_normal_close() {
        let mut server = MockWsServer::start().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let agent = agent(&view, None);
        let mut events = agent.subscribe();

        agent
            .configure(ServerOptions::builder().url(server.http_url()).build())
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;

        let status = agent.disconnect().await.unwrap();

        assert!(!status.connected, "disconnected");
        assert_eq!(server.recv_close().await, Some((1000, "manual".to_owned())));
        assert_eq!(view.current().as_deref(), Some(ORIGINAL_URL));
    }

    #[tokio::test]
    async fn refused_connection_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let prompt = FakePrompt::new();
        let agent = agent(&view, Some(&prompt));
        let mut events = agent.subscribe();

        agent
            .configure(
                ServerOptions::builder()
                    .url(format!("http://{addr}"))
                    .auto_reconnect(false)
                    .build(),
            )
            .await
            .unwrap();
        agent.connect().await.unwrap();

        let error = wait_for(&mut events, ReloadEventType::Error).await;
        assert!(
            error
                .message
                .as_deref()
                .is_some_and(|message| message.starts_with("WebSocket connection error")),
            "got {error:?}"
        );
        assert!(!agent.status().connected, "never connected");

        let snapshot = agent.inspect().await.unwrap();
        assert!(snapshot.prompt_showing, "prompt shown");
        assert!(!snapshot.reconnect_scheduled(), "auto reconnect is off");
        assert_eq!(prompt.shown().len(), 1);
    }
}

mod binary {
    use super::*;

    async fn connected(server: &MockWsServer) -> (LiveReload, broadcast::Receiver<Event>) {
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let agent = agent(&view, None);
        let mut events = agent.subscribe();

        agent
            .configure(ServerOptions::builder().url(server.http_url()).build())
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;
        (agent, events)
    }

    #[tokio::test]
    async fn utf8_binary_frame_is_routed_as_text() {
        let server = MockWsServer::start().await;
        let (_agent, mut events) = connected(&server).await;

        server.send_binary(br#"{"type":"file-update","path":"index.js","hash":"abc"}"#);

        let update = wait_for(&mut events, ReloadEventType::FileUpdate).await;
        assert_eq!(
            serde_json::to_value(update.file).unwrap(),
            json!({ "path": "index.js", "hash": "abc" })
        );
    }

    #[tokio::test]
    async fn non_utf8_binary_frame_is_ignored() {
        let server = MockWsServer::start().await;
        let (agent, mut events) = connected(&server).await;

        server.send_binary(&[0xff, 0xfe, 0xfd]);
        server.send(r#"{"type":"full-reload"}"#);

        // Frames arrive in order, so the first reload event after the binary frame is the text one
        let next = timeout(Duration::from_secs(2), async {
            loop {
                if let Event::Reload(event) = events.recv().await.unwrap() {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(next.event_type, ReloadEventType::FullReload, "got {next:?}");
        assert!(agent.status().connected, "session survives the frame");
    }
}

mod heartbeat {
    use super::*;

    #[tokio::test]
    async fn unanswered_ping_fails_the_session() {
        let addr = start_unresponsive_server().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let prompt = FakePrompt::new();
        let transport =
            WebSocketTransport::new(TransportConfig::with_ping_interval(Duration::from_millis(100)));
        let agent = agent_with(transport, &view, Some(&prompt));
        let mut events = agent.subscribe();

        agent
            .configure(
                ServerOptions::builder()
                    .url(format!("http://{addr}"))
                    .auto_reconnect(false)
                    .build(),
            )
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;

        let error = wait_for(&mut events, ReloadEventType::Error).await;

        assert_eq!(error.message.as_deref(), Some("WebSocket heartbeat timed out"));
        assert!(!agent.status().connected, "dead peer is reported as lost");
        assert_eq!(prompt.shown().len(), 1, "prompt shown for the lost session");
    }

    #[tokio::test]
    async fn answered_pings_keep_the_session() {
        let mut server = MockWsServer::start().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let transport =
            WebSocketTransport::new(TransportConfig::with_ping_interval(Duration::from_millis(50)));
        let agent = agent_with(transport, &view, None);
        let mut events = agent.subscribe();

        agent
            .configure(ServerOptions::builder().url(server.http_url()).build())
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(agent.status().connected, "still connected after several pings");
        agent.send("still here").await.unwrap();
        assert_eq!(server.recv_message().await.as_deref(), Some("still here"));
    }
}

mod reconnect {
    use super::*;

    #[tokio::test]
    async fn reconnects_after_server_restart() {
        let server = MockWsServer::start().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let prompt = FakePrompt::new();
        let agent = agent(&view, Some(&prompt));
        let mut events = agent.subscribe();

        agent
            .configure(
                ServerOptions::builder()
                    .url(server.http_url())
                    .reconnect_interval(Duration::from_millis(100))
                    .build(),
            )
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;

        server.close_all("restarting");

        let disconnected = wait_for(&mut events, ReloadEventType::Disconnected).await;
        assert_eq!(disconnected.message.as_deref(), Some("restarting"));
        assert_eq!(prompt.shown().len(), 1, "prompt shown on unexpected close");

        wait_for(&mut events, ReloadEventType::Connected).await;
        assert_eq!(server.connections(), 2, "one reconnect");
        assert_eq!(prompt.dismissed().len(), 1, "prompt taken down on reconnect");
        assert!(agent.status().connected, "connected again");
    }

    #[tokio::test]
    async fn empty_close_frame_is_a_disconnect_without_details() {
        let server = MockWsServer::start().await;
        let view = FakeView::new(Some(ORIGINAL_URL), None);
        let prompt = FakePrompt::new();
        let agent = agent(&view, Some(&prompt));
        let mut events = agent.subscribe();

        agent
            .configure(
                ServerOptions::builder()
                    .url(server.http_url())
                    .auto_reconnect(false)
                    .build(),
            )
            .await
            .unwrap();
        agent.connect().await.unwrap();
        wait_for(&mut events, ReloadEventType::Connected).await;

        server.close_all_without_status();

        let disconnected = wait_for(&mut events, ReloadEventType::Disconnected).await;
        assert_eq!(disconnected.message, None);
        assert!(!agent.status().connected);
        assert_eq!(prompt.shown().len(), 1);
    }
}
