//! Streaming transport seam.
//!
//! The agent never talks to a socket directly. It asks a [`Transport`] to open
//! a session and receives that session's lifecycle through an [`EventSink`],
//! a channel into the agent's event loop. Callbacks therefore never re-enter
//! the agent from the transport's own task.
//!
//! - [`Transport`]: opens sessions, non-blocking
//! - [`TransportHandle`]: the open session, used to send text and close it
//! - [`WebSocketTransport`]: `tokio-tungstenite` implementation (feature `ws`)

#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types expose their role in the name since they are re-exported side by side"
)]

#[cfg(feature = "ws")]
pub mod websocket;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use tokio::sync::mpsc;
use url::Url;

#[cfg(feature = "ws")]
pub use websocket::{TransportConfig, WebSocketTransport};

/// WebSocket close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Identifies one opened session. Events from superseded sessions are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What the agent needs to open a session.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub url: Url,
    pub headers: HashMap<String, String>,
}

impl TransportRequest {
    #[must_use]
    pub fn new(url: Url, headers: HashMap<String, String>) -> Self {
        Self { url, headers }
    }
}

/// Lifecycle notifications of a single session.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportEvent {
    /// Handshake completed
    Opened,
    /// A text frame (or UTF-8 binary frame) arrived
    Message(String),
    /// The peer closed the session
    Closed { code: u16, reason: String },
    /// The session could not be opened or broke
    Failed(TransportError),
}

/// Delivers [`TransportEvent`]s for one session into the agent's event loop.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
}

impl EventSink {
    pub(crate) fn new(
        session: SessionId,
        tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
    ) -> Self {
        Self { session, tx }
    }

    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Forward `event`. Returns `false` once the agent has stopped listening.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.session, event)).is_ok()
    }
}

/// Opens streaming sessions.
///
/// `open` must not block: the outcome arrives later through `events`
/// as [`TransportEvent::Opened`] or [`TransportEvent::Failed`].
pub trait Transport: Send + Sync + 'static {
    fn open(&self, request: TransportRequest, events: EventSink) -> Box<dyn TransportHandle>;
}

/// An opened (or opening) session.
pub trait TransportHandle: Send + 'static {
    /// Queue a text frame for the server.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the session. No further events are delivered for it.
    fn close(self: Box<Self>, code: u16, reason: &str);
}

/// Transport error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum TransportError {
    /// Error connecting to or communicating with the WebSocket server
    #[cfg(feature = "ws")]
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A configured header name or value is not valid HTTP
    InvalidHeader(String),
    /// The session is gone
    ConnectionClosed,
    /// No session is open
    NotConnected,
    /// A PING went unanswered, the peer is gone
    HeartbeatTimeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidHeader(name) => write!(f, "Invalid WebSocket header: {name}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::NotConnected => write!(f, "WebSocket is not connected"),
            Self::HeartbeatTimeout => write!(f, "WebSocket heartbeat timed out"),
        }
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            #[cfg(feature = "ws")]
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for crate::error::Error {
    fn from(e: TransportError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Transport, e)
    }
}
