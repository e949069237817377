use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{EventSink, Transport, TransportError, TransportEvent, TransportHandle, TransportRequest};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(15);

/// Close code reported for a close frame without a status code.
const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Configuration for the WebSocket transport.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interval between WebSocket PING frames keeping the connection alive
    pub ping_interval: Duration,
    /// Maximum time to wait for the PONG answering a PING before the session
    /// is considered dead
    pub pong_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::with_ping_interval(DEFAULT_PING_INTERVAL_DURATION)
    }
}

impl TransportConfig {
    /// Ping every `ping_interval` and fail when a PONG is not back before the next PING is due.
    #[must_use]
    pub fn with_ping_interval(ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout: ping_interval,
        }
    }

    #[must_use]
    pub fn with_pong_timeout(mut self, pong_timeout: Duration) -> Self {
        self.pong_timeout = pong_timeout;
        self
    }
}

/// [`Transport`] backed by `tokio-tungstenite`.
///
/// Each session runs in its own task and reports back through its [`EventSink`].
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport {
    config: TransportConfig,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

enum Outgoing {
    Text(String),
    Close { code: u16, reason: String },
}

struct WebSocketHandle {
    outgoing_tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportHandle for WebSocketHandle {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.outgoing_tx
            .send(Outgoing::Text(text))
            .map_err(|_e| TransportError::ConnectionClosed)
    }

    fn close(self: Box<Self>, code: u16, reason: &str) {
        // The session task may already be gone, nothing left to close then.
        _ = self.outgoing_tx.send(Outgoing::Close {
            code,
            reason: reason.to_owned(),
        });
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, request: TransportRequest, events: EventSink) -> Box<dyn TransportHandle> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let config = self.config.clone();

        tokio::spawn(async move {
            run_session(request, events, outgoing_rx, config).await;
        });

        Box::new(WebSocketHandle { outgoing_tx })
    }
}

fn build_request(request: &TransportRequest) -> Result<Request, TransportError> {
    let mut client_request = request
        .url
        .as_str()
        .into_client_request()
        .map_err(TransportError::Connection)?;

    for (name, value) in &request.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_e| TransportError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_e| TransportError::InvalidHeader(name.clone()))?;
        client_request.headers_mut().insert(header_name, header_value);
    }

    Ok(client_request)
}

/// Connect, then pump frames until the peer closes, the stream breaks, or
/// the handle asks to close.
async fn run_session(
    request: TransportRequest,
    events: EventSink,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    config: TransportConfig,
) {
    let client_request = match build_request(&request) {
        Ok(client_request) => client_request,
        Err(e) => {
            events.send(TransportEvent::Failed(e));
            return;
        }
    };

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %request.url, session = %events.session(), "Opening WebSocket");

    // Frames queued before the handshake completes are flushed once open.
    let mut pending = Vec::new();
    let connect = connect_async(client_request);
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok((ws_stream, _response)) => break ws_stream,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Unable to connect");
                    events.send(TransportEvent::Failed(TransportError::Connection(e)));
                    return;
                }
            },
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(Outgoing::Text(text)) => pending.push(text),
                // Closed while still connecting
                Some(Outgoing::Close { .. }) | None => return,
            },
        }
    };

    if !events.send(TransportEvent::Opened) {
        return;
    }

    handle_connection(ws_stream, &events, &mut outgoing_rx, pending, &config).await;
}

/// Code and reason carried by a peer's close frame.
fn close_details(frame: Option<CloseFrame>) -> (u16, String) {
    frame.map_or_else(
        || (NO_STATUS_RECEIVED, String::new()),
        |frame| (u16::from(frame.code), frame.reason.to_string()),
    )
}

async fn handle_connection(
    ws_stream: WsStream,
    events: &EventSink,
    outgoing_rx: &mut mpsc::UnboundedReceiver<Outgoing>,
    pending: Vec<String>,
    config: &TransportConfig,
) {
    let (mut write, mut read) = ws_stream.split();

    for text in pending {
        if let Err(e) = write.send(Message::Text(text.into())).await {
            events.send(TransportEvent::Failed(TransportError::Connection(e)));
            return;
        }
    }

    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Armed while a PING is unanswered
    let pong_deadline = sleep(config.pong_timeout);
    tokio::pin!(pong_deadline);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Received WebSocket text message");
                        events.send(TransportEvent::Message(text.to_string()));
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Ok(text) = std::str::from_utf8(&bytes) {
                            events.send(TransportEvent::Message(text.to_owned()));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = close_details(frame);
                        _ = write.close().await;
                        events.send(TransportEvent::Closed { code, reason });
                        return;
                    }
                    Some(Err(e)) => {
                        events.send(TransportEvent::Failed(TransportError::Connection(e)));
                        return;
                    }
                    None => {
                        events.send(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection lost".to_owned(),
                        });
                        return;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(_)) => {
                        // Incoming PINGs are answered by tungstenite itself.
                    }
                }
            }

            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(Outgoing::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            events.send(TransportEvent::Failed(TransportError::Connection(e)));
                            return;
                        }
                    }
                    Some(Outgoing::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        _ = write.send(Message::Close(Some(frame))).await;
                        return;
                    }
                    None => {
                        _ = write.send(Message::Close(None)).await;
                        return;
                    }
                }
            }

            _ = ping.tick(), if !awaiting_pong => {
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    events.send(TransportEvent::Failed(TransportError::Connection(e)));
                    return;
                }
                awaiting_pong = true;
                pong_deadline.as_mut().reset(Instant::now() + config.pong_timeout);
            }

            () = &mut pong_deadline, if awaiting_pong => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Heartbeat timeout: no PONG received within {:?}",
                    config.pong_timeout
                );
                events.send(TransportEvent::Failed(TransportError::HeartbeatTimeout));
                return;
            }
        }
    }
}
