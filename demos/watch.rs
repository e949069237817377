//! Watches a dev server and logs what a web view would do.
//!
//! The view and prompt here only log; a real host forwards these calls to its
//! web view and dialog APIs. The prompt answers "Reload" straight away.
//!
//! Run against a Vite or similar dev server:
//! ```sh
//! RUST_LOG=info,live_reload_agent=debug cargo run --example watch --features ws,tracing -- http://localhost:5173
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt as _;
use live_reload_agent::prompt::{DisconnectPrompt, PromptId, PromptResponder};
use live_reload_agent::transport::WebSocketTransport;
use live_reload_agent::{Event, LiveReload, PromptSurface, ServerOptions, ViewSurface};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SERVER: &str = "http://localhost:5173";

struct LoggingView {
    current: Mutex<Option<String>>,
}

impl ViewSurface for LoggingView {
    fn load_url(&self, url: &str) {
        info!(%url, "view: navigate");
        if let Ok(mut current) = self.current.lock() {
            *current = Some(url.to_owned());
        }
    }

    fn reload(&self) {
        info!("view: reload");
    }

    fn current_url(&self) -> Option<String> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    fn default_url(&self) -> Option<String> {
        Some("https://localhost/".to_owned())
    }
}

struct AutoRetryPrompt;

impl PromptSurface for AutoRetryPrompt {
    fn show(&self, prompt: DisconnectPrompt, responder: PromptResponder) {
        warn!(id = %prompt.id, title = %prompt.title, message = %prompt.message, "prompt: show");
        responder.retry();
    }

    fn dismiss(&self, id: PromptId) {
        info!(%id, "prompt: dismiss");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SERVER.to_owned());

    let agent = LiveReload::builder()
        .transport(Arc::new(WebSocketTransport::default()))
        .view(Arc::new(LoggingView {
            current: Mutex::new(Some("capacitor://localhost/".to_owned())),
        }))
        .prompt(Arc::new(AutoRetryPrompt))
        .build();

    info!(version = %agent.plugin_version().version, "live reload agent");

    let mut events = Box::pin(agent.events());
    agent
        .configure(
            ServerOptions::builder()
                .url(url)
                .reconnect_interval(Duration::from_secs(2))
                .build(),
        )
        .await?;
    agent.connect().await?;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match event {
                    Ok(Event::StatusChange(status)) => info!(connected = status.connected, url = ?status.url, "statusChange"),
                    Ok(event) => info!(name = event.name(), payload = %event.payload()?, "event"),
                    Err(e) => warn!(error = %e, "event stream"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                agent.disconnect().await?;
                agent.shutdown().await?;
                break;
            }
        }
    }

    Ok(())
}
