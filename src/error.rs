use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Missing, empty or unparseable server address
    InvalidConfig,
    /// An operation needed a configured server before `configure` was called
    NotConfigured,
    /// Error opening or communicating over the streaming transport
    Transport,
    /// Incoming frame that could not be understood. Never surfaced to callers,
    /// malformed frames are treated as a full reload.
    MalformedMessage,
    /// Internal error from dependencies or a stopped agent
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        InvalidConfig {
            reason: message.into(),
        }
        .into()
    }

    #[must_use]
    pub fn not_configured() -> Self {
        NotConfigured.into()
    }

    #[must_use]
    pub fn agent_stopped() -> Self {
        AgentStopped.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct InvalidConfig {
    pub reason: String,
}

impl fmt::Display for InvalidConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration: {}", self.reason)
    }
}

impl StdError for InvalidConfig {}

impl From<InvalidConfig> for Error {
    fn from(err: InvalidConfig) -> Self {
        Error::with_source(Kind::InvalidConfig, err)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct NotConfigured;

impl fmt::Display for NotConfigured {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "server URL is not configured")
    }
}

impl StdError for NotConfigured {}

impl From<NotConfigured> for Error {
    fn from(err: NotConfigured) -> Self {
        Error::with_source(Kind::NotConfigured, err)
    }
}

/// The agent's event loop has shut down and can no longer accept commands.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct AgentStopped;

impl fmt::Display for AgentStopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live reload agent is no longer running")
    }
}

impl StdError for AgentStopped {}

impl From<AgentStopped> for Error {
    fn from(err: AgentStopped) -> Self {
        Error::with_source(Kind::Internal, err)
    }
}

/// An event subscriber fell behind and missed events.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
pub struct EventsLagged {
    /// Number of events that were missed
    pub count: u64,
}

impl fmt::Display for EventsLagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event subscriber lagged, missed {} events", self.count)
    }
}

impl StdError for EventsLagged {}

impl From<EventsLagged> for Error {
    fn from(err: EventsLagged) -> Self {
        Error::with_source(Kind::Internal, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::InvalidConfig, e)
    }
}
