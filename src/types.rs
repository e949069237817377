//! Values exchanged with the application layer: status snapshots and the
//! `statusChange` / `reloadEvent` events.

use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the event carrying a [`Status`].
pub const STATUS_CHANGE: &str = "statusChange";
/// Name of the event carrying a [`ReloadEvent`].
pub const RELOAD_EVENT: &str = "reloadEvent";

/// Read-only snapshot of the connection state.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub connected: bool,
    /// Configured server base address, absent until `configure` succeeds
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

impl Status {
    #[must_use]
    pub fn new(connected: bool, url: Option<String>) -> Self {
        Self { connected, url }
    }
}

/// Kind of a [`ReloadEvent`].
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ReloadEventType {
    Connected,
    Disconnected,
    Error,
    FileUpdate,
    FullReload,
}

/// Payload of the `reloadEvent` event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct ReloadEvent {
    #[serde(rename = "type")]
    pub event_type: ReloadEventType,
    /// File descriptor, populated for `file-update` when the server sent one
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file: Option<Map<String, Value>>,
    /// Human-readable message for errors and status changes
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(into)]
    pub message: Option<String>,
}

impl ReloadEvent {
    #[must_use]
    pub fn new(event_type: ReloadEventType) -> Self {
        Self {
            event_type,
            file: None,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(event_type: ReloadEventType, message: Option<String>) -> Self {
        Self {
            event_type,
            file: None,
            message,
        }
    }

    #[must_use]
    pub fn file_update(file: Option<Map<String, Value>>) -> Self {
        Self {
            event_type: ReloadEventType::FileUpdate,
            file,
            message: None,
        }
    }
}

/// Path and optional content hash of a changed file.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct FileUpdate {
    #[builder(into)]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(into)]
    pub hash: Option<String>,
}

/// Version of the agent, as reported by `getPluginVersion`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginVersion {
    pub version: String,
}

/// Outward notification delivered to every subscriber.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StatusChange(Status),
    Reload(ReloadEvent),
}

impl Event {
    /// Listener name the application layer registers for.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChange(_) => STATUS_CHANGE,
            Self::Reload(_) => RELOAD_EVENT,
        }
    }

    /// JSON body handed to the host's event emission channel.
    pub fn payload(&self) -> crate::Result<Value> {
        let value = match self {
            Self::StatusChange(status) => serde_json::to_value(status)?,
            Self::Reload(event) => serde_json::to_value(event)?,
        };
        Ok(value)
    }

    #[must_use]
    pub fn as_status(&self) -> Option<&Status> {
        match self {
            Self::StatusChange(status) => Some(status),
            Self::Reload(_) => None,
        }
    }

    #[must_use]
    pub fn as_reload(&self) -> Option<&ReloadEvent> {
        match self {
            Self::Reload(event) => Some(event),
            Self::StatusChange(_) => None,
        }
    }
}
