//! Decodes reload notifications sent by the dev server.
//!
//! Accepted frames look like
//! `{"type": "file-update" | "full-reload", "file": {...}, "path": "...", "hash": "..."}`.
//! Anything that does not decode is a full reload: plain-text frames are the
//! most common signal from simple servers, not an error.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::Result;
use crate::error::{Error, Kind};
use crate::types::{ReloadEvent, ReloadEventType};

const FILE_UPDATE: &str = "file-update";

/// Action requested by one incoming frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadMessage {
    /// A single file changed. Carries the file descriptor when the server sent one.
    FileUpdate(Option<Map<String, Value>>),
    /// Reload everything
    FullReload,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    file: Option<Value>,
    #[serde(default)]
    path: Option<Value>,
    #[serde(default)]
    hash: Option<Value>,
}

#[derive(Debug)]
struct Malformed(serde_json::Error);

impl std::fmt::Display for Malformed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed reload message: {}", self.0)
    }
}

impl std::error::Error for Malformed {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

fn decode(text: &str) -> Result<WireMessage> {
    serde_json::from_str(text).map_err(|e| Error::with_source(Kind::MalformedMessage, Malformed(e)))
}

/// Render a scalar as text the way hosts coerce it; `null` means absent.
fn text_of(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

impl ReloadMessage {
    /// Decode `text`, falling back to [`ReloadMessage::FullReload`].
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match decode(text) {
            Ok(message) => Self::from_wire(message),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%text, error = %e, "Treating undecodable frame as full reload");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Self::FullReload
            }
        }
    }

    fn from_wire(message: WireMessage) -> Self {
        if message.kind.as_deref() != Some(FILE_UPDATE) {
            return Self::FullReload;
        }

        if let Some(Value::Object(file)) = message.file {
            return Self::FileUpdate(Some(file));
        }

        let file = message.path.and_then(text_of).map(|path| {
            let mut file = Map::new();
            file.insert("path".to_owned(), Value::String(path));
            if let Some(hash) = message.hash.and_then(text_of) {
                file.insert("hash".to_owned(), Value::String(hash));
            }
            file
        });
        Self::FileUpdate(file)
    }

    /// The `reloadEvent` announcing this message.
    #[must_use]
    pub fn to_event(&self) -> ReloadEvent {
        match self {
            Self::FileUpdate(file) => ReloadEvent::file_update(file.clone()),
            Self::FullReload => ReloadEvent::new(ReloadEventType::FullReload),
        }
    }
}
