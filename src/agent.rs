//! The connection manager and its public handle.
//!
//! All mutable state lives in one event-loop task. The [`LiveReload`] handle,
//! transport sessions, reconnect timers and prompt answers reach it only through
//! channels, so the view and prompt surfaces are driven from a single context
//! and no two navigations ever race.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_stream::try_stream;
use bon::bon;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::Result;
use crate::config::{Configuration, ServerOptions};
use crate::content::{ContentSwitch, DisplayMode};
use crate::error::{Error, EventsLagged};
use crate::host::{PromptSurface, ViewSurface};
use crate::prompt::{PromptAction, PromptController, PromptId};
use crate::router::ReloadMessage;
use crate::scheduler::{ReconnectScheduler, RetryPolicy, SchedulerState};
use crate::transport::{
    EventSink, NORMAL_CLOSURE, SessionId, Transport, TransportError, TransportEvent,
    TransportHandle, TransportRequest,
};
use crate::types::{Event, FileUpdate, PluginVersion, ReloadEvent, ReloadEventType, Status};

/// Broadcast channel capacity for outward events.
const EVENT_CAPACITY: usize = 256;

const URL_BUILD_FAILED: &str = "Unable to build WebSocket URL";

/// Diagnostic view of the agent's internal state.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSnapshot {
    pub connected: bool,
    /// A transport session is open or opening
    pub session_open: bool,
    pub manual_disconnect: bool,
    pub reconnect: SchedulerState,
    pub display_mode: DisplayMode,
    pub original_url: Option<String>,
    pub prompt_showing: bool,
}

impl AgentSnapshot {
    #[must_use]
    pub fn reconnect_scheduled(&self) -> bool {
        matches!(self.reconnect, SchedulerState::Scheduled { .. })
    }
}

enum Command {
    Configure {
        options: ServerOptions,
        reply: oneshot::Sender<Result<Status>>,
    },
    Connect {
        reply: oneshot::Sender<Result<Status>>,
    },
    Disconnect {
        reply: oneshot::Sender<Status>,
    },
    Reload {
        reply: oneshot::Sender<()>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Inspect {
        reply: oneshot::Sender<AgentSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Client-side live reload agent.
///
/// Cheap to clone; every clone talks to the same event loop. The loop stops
/// when [`LiveReload::shutdown`] is called or the last handle is dropped.
///
/// # Example
///
/// ```rust, no_run
/// use std::sync::Arc;
///
/// use live_reload_agent::LiveReload;
/// use live_reload_agent::config::ServerOptions;
/// use live_reload_agent::transport::WebSocketTransport;
///
/// # async fn example() -> live_reload_agent::Result<()> {
/// let agent = LiveReload::builder()
///     .transport(Arc::new(WebSocketTransport::default()))
///     .build();
///
/// agent
///     .configure(ServerOptions::builder().url("http://10.0.0.5:8100").build())
///     .await?;
/// let status = agent.connect().await?;
/// assert_eq!(status.url.as_deref(), Some("http://10.0.0.5:8100"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LiveReload {
    inner: Arc<Inner>,
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<Status>,
    events_tx: broadcast::Sender<Event>,
}

#[bon]
impl LiveReload {
    /// Start the agent's event loop.
    ///
    /// Must be called from within a Tokio runtime. Without a `view` the agent
    /// still tracks the connection but never navigates; without a `prompt`
    /// disconnects are reported only through events.
    #[builder]
    pub fn new(
        transport: Arc<dyn Transport>,
        view: Option<Arc<dyn ViewSurface>>,
        prompt: Option<Arc<dyn PromptSurface>>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let agent = Agent {
            config: None,
            state: ConnectionState::default(),
            content: ContentSwitch::new(view),
            scheduler: ReconnectScheduler::new(timer_tx),
            prompt: PromptController::new(prompt, prompt_tx),
            transport,
            transport_tx,
            next_session: 0,
            status_tx,
            events_tx: events_tx.clone(),
        };

        tokio::spawn(agent.run(commands_rx, transport_rx, prompt_rx, timer_rx));

        Self {
            inner: Arc::new(Inner {
                commands: commands_tx,
                status_rx,
                events_tx,
            }),
        }
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .map_err(|_e| Error::agent_stopped())?;
        response.await.map_err(|_e| Error::agent_stopped())
    }

    /// Store the dev server settings used by subsequent connections.
    ///
    /// Fails with [`Kind::InvalidConfig`](crate::error::Kind::InvalidConfig)
    /// when the base address is missing or empty.
    pub async fn configure(&self, options: ServerOptions) -> Result<Status> {
        self.request(|reply| Command::Configure { options, reply })
            .await?
    }

    /// Open the streaming connection unless one is already established.
    ///
    /// Returns immediately; the outcome is reported through [`Event`]s.
    pub async fn connect(&self) -> Result<Status> {
        self.request(|reply| Command::Connect { reply }).await?
    }

    /// Close the connection, suppress reconnects, and restore the original content.
    pub async fn disconnect(&self) -> Result<Status> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status_rx.borrow().clone()
    }

    /// Reload the displayed content.
    pub async fn reload(&self) -> Result<()> {
        self.request(|reply| Command::Reload { reply }).await
    }

    /// Reload after a single file changed. Falls back to a full reload.
    pub async fn reload_file(&self, file: FileUpdate) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(path = %file.path, "Reloading for file update");
        #[cfg(not(feature = "tracing"))]
        let _ = &file;
        self.reload().await
    }

    /// Send a text frame to the dev server over the active session.
    pub async fn send<S: Into<String>>(&self, text: S) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::Send { text, reply }).await?
    }

    #[must_use]
    pub fn plugin_version(&self) -> PluginVersion {
        PluginVersion {
            version: crate::VERSION.to_owned(),
        }
    }

    /// Internal state, for diagnostics and tests.
    pub async fn inspect(&self) -> Result<AgentSnapshot> {
        self.request(|reply| Command::Inspect { reply }).await
    }

    /// Stop the event loop, closing any open session.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Subscribe to outward events.
    ///
    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events_tx.subscribe()
    }

    /// Outward events as a stream. Yields an error if the subscriber falls behind.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> + use<> {
        let mut rx = self.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Live reload event subscriber lagged, missed {count} events");
                        Err(EventsLagged { count })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Subscribe to status snapshots.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<Status> {
        self.inner.status_rx.clone()
    }
}

struct ActiveSession {
    id: SessionId,
    handle: Box<dyn TransportHandle>,
}

/// Connection state owned by the event loop.
///
/// `connected` implies `session` is set; there is never more than one session.
#[derive(Default)]
struct ConnectionState {
    connected: bool,
    session: Option<ActiveSession>,
    manual_disconnect: bool,
}

struct Agent {
    config: Option<Configuration>,
    state: ConnectionState,
    content: ContentSwitch,
    scheduler: ReconnectScheduler,
    prompt: PromptController,
    transport: Arc<dyn Transport>,
    transport_tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
    next_session: u64,
    status_tx: watch::Sender<Status>,
    events_tx: broadcast::Sender<Event>,
}

impl Agent {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_rx: mpsc::UnboundedReceiver<(SessionId, TransportEvent)>,
        mut prompt_rx: mpsc::UnboundedReceiver<(PromptId, PromptAction)>,
        mut timer_rx: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                // Events already delivered are handled before later commands.
                biased;

                Some((session, event)) = transport_rx.recv() => self.on_transport(session, event),
                Some((id, action)) = prompt_rx.recv() => self.on_prompt(id, action),
                Some(generation) = timer_rx.recv() => self.on_timer(generation),

                command = commands.recv() => {
                    let Some(command) = command else {
                        self.stop();
                        break;
                    };
                    if self.handle(command).is_break() {
                        break;
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Live reload agent stopped");
    }

    fn handle(&mut self, command: Command) -> ControlFlow<()> {
        // A dropped reply means the caller stopped waiting; the work is done anyway.
        match command {
            Command::Configure { options, reply } => {
                _ = reply.send(self.configure(options));
            }
            Command::Connect { reply } => {
                _ = reply.send(self.connect());
            }
            Command::Disconnect { reply } => {
                _ = reply.send(self.disconnect());
            }
            Command::Reload { reply } => {
                self.reload_content();
                _ = reply.send(());
            }
            Command::Send { text, reply } => {
                _ = reply.send(self.send(text));
            }
            Command::Inspect { reply } => {
                _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                self.stop();
                _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn configure(&mut self, options: ServerOptions) -> Result<Status> {
        let config = Configuration::new(options)?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            url = %config.url,
            path = %config.websocket_path,
            auto_reconnect = config.auto_reconnect,
            "Configured live reload server"
        );

        self.config = Some(config);
        self.content.capture_original();
        self.notify_status();
        Ok(self.status())
    }

    fn connect(&mut self) -> Result<Status> {
        if self.config.is_none() {
            return Err(Error::not_configured());
        }
        if self.state.connected && self.state.session.is_some() {
            return Ok(self.status());
        }

        self.state.manual_disconnect = false;
        self.prompt.dismiss();
        self.open_session();
        Ok(self.status())
    }

    fn disconnect(&mut self) -> Status {
        self.state.manual_disconnect = true;
        self.close_session("manual");
        self.content.restore_original();
        self.prompt.dismiss();
        self.status()
    }

    fn send(&self, text: String) -> Result<()> {
        let session = self
            .state
            .session
            .as_ref()
            .filter(|_| self.state.connected)
            .ok_or(TransportError::NotConnected)?;
        session.handle.send(text)?;
        Ok(())
    }

    fn stop(&mut self) {
        self.scheduler.cancel();
        if let Some(session) = self.state.session.take() {
            session.handle.close(NORMAL_CLOSURE, "shutdown");
        }
        self.set_connected(false);
        self.prompt.dismiss();
    }

    fn status(&self) -> Status {
        Status::new(
            self.state.connected,
            self.config.as_ref().map(|config| config.url.clone()),
        )
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            connected: self.state.connected,
            session_open: self.state.session.is_some(),
            manual_disconnect: self.state.manual_disconnect,
            reconnect: self.scheduler.state(),
            display_mode: self.content.mode(),
            original_url: self.content.original_url().map(str::to_owned),
            prompt_showing: self.prompt.is_showing(),
        }
    }

    fn notify_status(&self) {
        let status = self.status();
        self.status_tx.send_replace(status.clone());
        // No subscribers is fine
        _ = self.events_tx.send(Event::StatusChange(status));
    }

    fn emit(&self, event: ReloadEvent) {
        #[cfg(feature = "tracing")]
        tracing::debug!(event_type = %event.event_type, message = ?event.message, "reloadEvent");
        _ = self.events_tx.send(Event::Reload(event));
    }

    fn set_connected(&mut self, connected: bool) {
        if self.state.connected == connected {
            return;
        }
        self.state.connected = connected;

        if connected {
            self.prompt.dismiss();
            if let Some(config) = &self.config {
                self.content.switch_to_live(&config.url);
            }
        }
        self.notify_status();
    }

    fn reload_content(&self) {
        self.content
            .reload(self.config.as_ref().map(|config| config.url.as_str()));
    }

    /// Open a fresh session, replacing any session still in progress.
    fn open_session(&mut self) {
        self.state.manual_disconnect = false;
        self.scheduler.cancel();
        self.prompt.dismiss();

        let Some(config) = &self.config else {
            return;
        };
        let url = match config.websocket_url() {
            Ok(url) => url,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(url = %config.url, error = %e, "Unable to build WebSocket URL");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                self.emit(ReloadEvent::with_message(
                    ReloadEventType::Error,
                    Some(URL_BUILD_FAILED.to_owned()),
                ));
                return;
            }
        };
        let request = TransportRequest::new(url, config.headers.clone());

        if let Some(previous) = self.state.session.take() {
            previous.handle.close(NORMAL_CLOSURE, "reconnect");
        }

        self.next_session += 1;
        let id = SessionId(self.next_session);

        #[cfg(feature = "tracing")]
        tracing::info!(url = %request.url, session = %id, "Connecting to live reload server");

        let handle = self
            .transport
            .open(request, EventSink::new(id, self.transport_tx.clone()));
        self.state.session = Some(ActiveSession { id, handle });
    }

    /// Close the active session (if any) and stop retrying.
    fn close_session(&mut self, reason: &str) {
        self.scheduler.cancel();
        if let Some(session) = self.state.session.take() {
            session.handle.close(NORMAL_CLOSURE, reason);
        }
        self.set_connected(false);
    }

    fn on_transport(&mut self, session: SessionId, event: TransportEvent) {
        if self.state.session.as_ref().map(|active| active.id) != Some(session) {
            #[cfg(feature = "tracing")]
            tracing::trace!(%session, ?event, "Ignoring event from superseded session");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(text) => self.on_message(&text),
            TransportEvent::Closed { code, reason } => {
                #[cfg(feature = "tracing")]
                tracing::info!(code, %reason, "Live reload connection closed");
                #[cfg(not(feature = "tracing"))]
                let _ = code;
                self.state.session = None;
                let reason = (!reason.is_empty()).then_some(reason);
                self.on_lost(ReloadEventType::Disconnected, reason);
            }
            TransportEvent::Failed(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "Live reload connection failed");
                self.state.session = None;
                self.on_lost(ReloadEventType::Error, Some(error.to_string()));
            }
        }
    }

    fn on_open(&mut self) {
        self.scheduler.cancel();
        self.prompt.dismiss();
        self.set_connected(true);
        self.emit(ReloadEvent::with_message(
            ReloadEventType::Connected,
            Some("connected".to_owned()),
        ));
    }

    fn on_message(&mut self, text: &str) {
        let message = ReloadMessage::parse(text);
        self.emit(message.to_event());
        self.reload_content();
    }

    fn on_lost(&mut self, event_type: ReloadEventType, message: Option<String>) {
        self.set_connected(false);
        self.emit(ReloadEvent::with_message(event_type, message.clone()));

        if self.state.manual_disconnect {
            return;
        }
        self.prompt.present(message.as_deref());
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let Some(config) = &self.config else {
            return;
        };
        let policy = RetryPolicy {
            auto_reconnect: config.auto_reconnect,
            configured: true,
            manual_disconnect: self.state.manual_disconnect,
        };
        let delay = config.reconnect_interval;
        self.scheduler.schedule(delay, policy);
    }

    fn on_timer(&mut self, generation: u64) {
        if !self.scheduler.fired(generation) {
            return;
        }
        if self.state.connected || self.state.manual_disconnect {
            #[cfg(feature = "tracing")]
            tracing::debug!(generation, "Reconnect no longer needed");
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::info!(generation, "Reconnecting to live reload server");
        self.open_session();
    }

    fn on_prompt(&mut self, id: PromptId, action: PromptAction) {
        if !self.prompt.resolve(id, action) {
            return;
        }

        match action {
            PromptAction::Primary => {
                self.state.manual_disconnect = false;
                self.reload_content();
                self.open_session();
            }
            PromptAction::Secondary => {
                self.state.manual_disconnect = true;
                self.close_session("manual");
                self.content.restore_original();
            }
            PromptAction::Dismissed => {}
        }
    }
}
