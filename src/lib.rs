#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod agent;
pub mod config;
pub mod content;
pub mod error;
pub mod host;
pub mod prompt;
pub mod router;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use agent::{AgentSnapshot, LiveReload};
pub use config::ServerOptions;
pub use content::DisplayMode;
pub use host::{PromptSurface, ViewSurface};
pub use types::{Event, FileUpdate, PluginVersion, ReloadEvent, ReloadEventType, Status};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Version reported by [`LiveReload::plugin_version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
