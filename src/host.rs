//! Capabilities the host application shell lends to the agent.
//!
//! Implementations are only ever called from the agent's event loop task, one
//! call at a time. A host whose view or dialogs must be driven from a UI thread
//! should forward these calls to that thread.

use crate::prompt::{DisconnectPrompt, PromptId, PromptResponder};

/// The web view that displays either the bundled content or the dev server.
pub trait ViewSurface: Send + Sync + 'static {
    /// Navigate to `url`.
    fn load_url(&self, url: &str);

    /// Reload the current page in place.
    fn reload(&self);

    /// URL currently displayed, if any.
    fn current_url(&self) -> Option<String>;

    /// The host's default content root, used when no original URL was captured.
    fn default_url(&self) -> Option<String> {
        None
    }
}

/// Modal prompt shown when the connection to the dev server is lost.
pub trait PromptSurface: Send + Sync + 'static {
    /// Present `prompt`. The user's choice is reported through `responder`.
    fn show(&self, prompt: DisconnectPrompt, responder: PromptResponder);

    /// Take down the prompt identified by `id` if it is still showing.
    fn dismiss(&self, id: PromptId);
}
