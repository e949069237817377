//! Disconnect prompt lifecycle.
//!
//! At most one prompt is live at a time. Each presentation gets a fresh
//! [`PromptId`] so a late answer from a prompt that was already dismissed is
//! recognised and dropped.

#![expect(
    clippy::module_name_repetitions,
    reason = "Prompt types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::host::PromptSurface;

pub const PROMPT_TITLE: &str = "Live Reload Disconnected";
pub const PRIMARY_LABEL: &str = "Reload";
pub const SECONDARY_LABEL: &str = "Close";

const LOST_MESSAGE: &str = "The connection to the live reload server was lost.";
const ACTIONS_HINT: &str = "Close restores the original bundle. Reload tries to reconnect.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptId(u64);

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prompt-{}", self.0)
    }
}

/// What the user did with the prompt.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    /// Retry the connection now
    Primary,
    /// Give up and restore the original content
    Secondary,
    /// The host took the prompt down without a choice
    Dismissed,
}

/// Everything a host needs to render the prompt.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPrompt {
    pub id: PromptId,
    pub title: String,
    pub message: String,
    pub primary_label: String,
    pub secondary_label: String,
}

impl DisconnectPrompt {
    fn new(id: PromptId, reason: Option<&str>) -> Self {
        Self {
            id,
            title: PROMPT_TITLE.to_owned(),
            message: message(reason),
            primary_label: PRIMARY_LABEL.to_owned(),
            secondary_label: SECONDARY_LABEL.to_owned(),
        }
    }
}

/// Body text of the prompt, with the failure reason when there is one.
#[must_use]
pub fn message(reason: Option<&str>) -> String {
    let mut message = LOST_MESSAGE.to_owned();
    if let Some(reason) = reason.filter(|reason| !reason.is_empty()) {
        message.push_str("\n\nDetails: ");
        message.push_str(reason);
    }
    message.push_str("\n\n");
    message.push_str(ACTIONS_HINT);
    message
}

/// Reports the user's choice back into the agent's event loop.
#[derive(Debug, Clone)]
pub struct PromptResponder {
    id: PromptId,
    tx: mpsc::UnboundedSender<(PromptId, PromptAction)>,
}

impl PromptResponder {
    #[must_use]
    pub fn id(&self) -> PromptId {
        self.id
    }

    pub fn respond(&self, action: PromptAction) {
        // The agent may have shut down in the meantime
        _ = self.tx.send((self.id, action));
    }

    pub fn retry(&self) {
        self.respond(PromptAction::Primary);
    }

    pub fn close(&self) {
        self.respond(PromptAction::Secondary);
    }
}

/// Owns the single prompt instance.
pub(crate) struct PromptController {
    surface: Option<Arc<dyn PromptSurface>>,
    current: Option<PromptId>,
    next_id: u64,
    tx: mpsc::UnboundedSender<(PromptId, PromptAction)>,
}

impl PromptController {
    pub(crate) fn new(
        surface: Option<Arc<dyn PromptSurface>>,
        tx: mpsc::UnboundedSender<(PromptId, PromptAction)>,
    ) -> Self {
        Self {
            surface,
            current: None,
            next_id: 0,
            tx,
        }
    }

    pub(crate) fn is_showing(&self) -> bool {
        self.current.is_some()
    }

    /// Show a prompt unless one is already up. Returns whether one was shown.
    pub(crate) fn present(&mut self, reason: Option<&str>) -> bool {
        if self.current.is_some() {
            return false;
        }
        let Some(surface) = &self.surface else {
            return false;
        };

        self.next_id += 1;
        let id = PromptId(self.next_id);
        let responder = PromptResponder {
            id,
            tx: self.tx.clone(),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, ?reason, "Showing disconnect prompt");

        surface.show(DisconnectPrompt::new(id, reason), responder);
        self.current = Some(id);
        true
    }

    pub(crate) fn dismiss(&mut self) {
        if let Some(id) = self.current.take()
            && let Some(surface) = &self.surface
        {
            surface.dismiss(id);
        }
    }

    /// Accept an answer for `id`. Answers for anything but the live prompt are
    /// stale and return `false`.
    pub(crate) fn resolve(&mut self, id: PromptId, action: PromptAction) -> bool {
        if self.current != Some(id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%id, ?action, "Ignoring answer from stale prompt");
            return false;
        }

        match action {
            PromptAction::Dismissed => self.current = None,
            PromptAction::Primary | PromptAction::Secondary => self.dismiss(),
        }
        true
    }
}
