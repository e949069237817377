//! Switches the view surface between the bundled content and the dev server.

use std::sync::{Arc, OnceLock};

use crate::host::ViewSurface;

/// Which content the view surface currently shows.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DisplayMode {
    /// Bundled content the host started with
    #[default]
    Original,
    /// Content served by the dev server
    Live,
}

/// Drives [`DisplayMode`] transitions on the view surface.
///
/// The original URL is captured at most once per session and never replaced.
pub(crate) struct ContentSwitch {
    view: Option<Arc<dyn ViewSurface>>,
    mode: DisplayMode,
    original_url: OnceLock<String>,
}

impl ContentSwitch {
    pub(crate) fn new(view: Option<Arc<dyn ViewSurface>>) -> Self {
        Self {
            view,
            mode: DisplayMode::Original,
            original_url: OnceLock::new(),
        }
    }

    pub(crate) fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub(crate) fn original_url(&self) -> Option<&str> {
        self.original_url.get().map(String::as_str)
    }

    /// Remember what the view shows now, unless something was already captured.
    pub(crate) fn capture_original(&self) {
        if self.original_url.get().is_some() {
            return;
        }
        if let Some(url) = self.view.as_ref().and_then(|view| view.current_url()) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%url, "Captured original content URL");
            // A concurrent capture cannot happen, only this task touches the view.
            _ = self.original_url.set(url);
        }
    }

    /// Point the view at the dev server, or refresh it in place if already live.
    pub(crate) fn switch_to_live(&mut self, base_url: &str) {
        let Some(view) = self.view.clone() else {
            return;
        };
        self.capture_original();

        if self.mode == DisplayMode::Live {
            view.reload();
        } else {
            #[cfg(feature = "tracing")]
            tracing::info!(url = %base_url, "Switching to live content");
            self.mode = DisplayMode::Live;
            view.load_url(base_url);
        }
    }

    /// Go back to the original content.
    ///
    /// Falls back to the host's default root, then to a plain reload.
    pub(crate) fn restore_original(&mut self) {
        self.mode = DisplayMode::Original;
        let Some(view) = &self.view else {
            return;
        };

        let target = self
            .original_url
            .get()
            .cloned()
            .or_else(|| view.default_url());

        #[cfg(feature = "tracing")]
        tracing::info!(url = ?target, "Restoring original content");

        match target {
            Some(url) => view.load_url(&url),
            None => view.reload(),
        }
    }

    /// Reload what is displayed. Live content is re-navigated so new bundles are picked up.
    pub(crate) fn reload(&self, base_url: Option<&str>) {
        let Some(view) = &self.view else {
            return;
        };

        match base_url {
            Some(url) if self.mode == DisplayMode::Live => view.load_url(url),
            _ => view.reload(),
        }
    }
}
