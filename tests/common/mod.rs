#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::sync::{Arc, Mutex};

use live_reload_agent::prompt::{DisconnectPrompt, PromptId, PromptResponder};
use live_reload_agent::transport::{
    EventSink, Transport, TransportError, TransportEvent, TransportHandle, TransportRequest,
};
use live_reload_agent::{Event, LiveReload, PromptSurface, ServerOptions, ViewSurface};
use tokio::sync::broadcast;

pub const SERVER_URL: &str = "http://10.0.0.5:8100";
pub const ORIGINAL_URL: &str = "capacitor://localhost/";

/// One `open` call seen by [`FakeTransport`].
pub struct OpenedSession {
    pub request: TransportRequest,
    pub sink: EventSink,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<Mutex<Option<(u16, String)>>>,
}

/// Transport that never touches the network. Tests drive each session through
/// the recorded [`EventSink`].
#[derive(Default)]
pub struct FakeTransport {
    sessions: Mutex<Vec<OpenedSession>>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> TransportRequest {
        self.sessions.lock().unwrap()[index].request.clone()
    }

    pub fn sink(&self, index: usize) -> EventSink {
        self.sessions.lock().unwrap()[index].sink.clone()
    }

    pub fn sent(&self, index: usize) -> Vec<String> {
        self.sessions.lock().unwrap()[index].sent.lock().unwrap().clone()
    }

    pub fn closed(&self, index: usize) -> Option<(u16, String)> {
        self.sessions.lock().unwrap()[index].closed.lock().unwrap().clone()
    }

    /// Push `event` into the most recent session.
    pub fn emit(&self, event: TransportEvent) {
        let sink = self.sink(self.open_count() - 1);
        assert!(sink.send(event), "agent stopped listening");
    }
}

struct FakeHandle {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl TransportHandle for FakeHandle {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(self: Box<Self>, code: u16, reason: &str) {
        *self.closed.lock().unwrap() = Some((code, reason.to_owned()));
    }
}

impl Transport for FakeTransport {
    fn open(&self, request: TransportRequest, events: EventSink) -> Box<dyn TransportHandle> {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(Mutex::new(None));
        self.sessions.lock().unwrap().push(OpenedSession {
            request,
            sink: events,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        Box::new(FakeHandle { sent, closed })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCall {
    Load(String),
    Reload,
}

/// View surface that records navigations.
pub struct FakeView {
    current: Mutex<Option<String>>,
    default_url: Option<String>,
    calls: Mutex<Vec<ViewCall>>,
}

impl FakeView {
    #[must_use]
    pub fn new(current: Option<&str>, default_url: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(current.map(str::to_owned)),
            default_url: default_url.map(str::to_owned),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }
}

impl ViewSurface for FakeView {
    fn load_url(&self, url: &str) {
        *self.current.lock().unwrap() = Some(url.to_owned());
        self.calls.lock().unwrap().push(ViewCall::Load(url.to_owned()));
    }

    fn reload(&self) {
        self.calls.lock().unwrap().push(ViewCall::Reload);
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    fn default_url(&self) -> Option<String> {
        self.default_url.clone()
    }
}

/// Prompt surface that keeps every responder so tests can answer.
#[derive(Default)]
pub struct FakePrompt {
    shown: Mutex<Vec<(DisconnectPrompt, PromptResponder)>>,
    dismissed: Mutex<Vec<PromptId>>,
}

impl FakePrompt {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shown(&self) -> Vec<DisconnectPrompt> {
        self.shown
            .lock()
            .unwrap()
            .iter()
            .map(|(prompt, _)| prompt.clone())
            .collect()
    }

    pub fn responder(&self, index: usize) -> PromptResponder {
        self.shown.lock().unwrap()[index].1.clone()
    }

    pub fn dismissed(&self) -> Vec<PromptId> {
        self.dismissed.lock().unwrap().clone()
    }
}

impl PromptSurface for FakePrompt {
    fn show(&self, prompt: DisconnectPrompt, responder: PromptResponder) {
        self.shown.lock().unwrap().push((prompt, responder));
    }

    fn dismiss(&self, id: PromptId) {
        self.dismissed.lock().unwrap().push(id);
    }
}

/// Everything a test needs to drive an agent end to end.
pub struct Harness {
    pub agent: LiveReload,
    pub transport: Arc<FakeTransport>,
    pub view: Arc<FakeView>,
    pub prompt: Arc<FakePrompt>,
    pub events: broadcast::Receiver<Event>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_view(FakeView::new(Some(ORIGINAL_URL), None))
    }

    #[must_use]
    pub fn with_view(view: Arc<FakeView>) -> Self {
        let transport = FakeTransport::new();
        let prompt = FakePrompt::new();

        let transport_surface = Arc::clone(&transport);
        let view_surface = Arc::clone(&view);
        let prompt_surface = Arc::clone(&prompt);
        let agent = LiveReload::builder()
            .transport(transport_surface)
            .view(view_surface)
            .prompt(prompt_surface)
            .build();
        let events = agent.subscribe();

        Self {
            agent,
            transport,
            view,
            prompt,
            events,
        }
    }

    /// Configure with `options` and open the first session without completing it.
    pub async fn configure_and_connect(&mut self, options: ServerOptions) {
        self.agent.configure(options).await.unwrap();
        self.agent.connect().await.unwrap();
        assert_eq!(self.transport.open_count(), 1, "connect opens one session");
    }

    /// Configure with the default server and complete the handshake.
    pub async fn connected(&mut self) {
        self.configure_and_connect(ServerOptions::builder().url(SERVER_URL).build())
            .await;
        self.transport.emit(TransportEvent::Opened);
        self.settle().await;
        self.drain();
    }

    /// Let the event loop handle everything already queued.
    ///
    /// Transport, prompt and timer events are served before commands, so a
    /// round trip through `inspect` flushes them.
    pub async fn settle(&self) {
        self.agent.inspect().await.unwrap();
    }

    /// Events published since the last drain.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
