//! Server configuration supplied by `configureServer`.

use std::collections::HashMap;
use std::time::Duration;

use bon::Builder;
use serde::Deserialize;
use serde_with::formats::Flexible;
use serde_with::{DurationMilliSeconds, serde_as};
use url::Url;

use crate::Result;
use crate::error::Error;

pub const DEFAULT_WEBSOCKET_PATH: &str = "/ws";
const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_millis(2000);

/// Options accepted by [`LiveReload::configure`](crate::LiveReload::configure).
///
/// Deserializes from the camelCase object the host passes through, e.g.
/// `{"url": "http://10.0.0.5:8100", "websocketPath": "/live", "reconnectInterval": 2000}`.
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Default, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    /// Base address of the dev server. The view navigates here once connected.
    #[serde(default)]
    #[builder(into)]
    pub url: Option<String>,
    /// WebSocket path, `/ws` when absent or empty
    #[serde(default)]
    #[builder(into)]
    pub websocket_path: Option<String>,
    /// Extra headers sent with the WebSocket handshake
    #[serde(default)]
    #[builder(default)]
    pub headers: HashMap<String, String>,
    /// Reconnect automatically after an unexpected close. Defaults to `true`.
    #[serde(default)]
    pub auto_reconnect: Option<bool>,
    /// Delay before a reconnection attempt. Defaults to 2000 ms.
    #[serde_as(as = "Option<DurationMilliSeconds<u64, Flexible>>")]
    #[serde(default)]
    pub reconnect_interval: Option<Duration>,
}

/// Validated configuration for one session, replaced wholesale on every `configure`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub url: String,
    pub websocket_path: String,
    pub headers: HashMap<String, String>,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
}

impl Configuration {
    /// Validate `options`, filling in defaults.
    ///
    /// Only the presence of the base address is checked here. Whether it parses
    /// is discovered when the stream URL is built, which reports through the
    /// event stream rather than to the caller.
    pub fn new(options: ServerOptions) -> Result<Self> {
        let url = options
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| Error::invalid_config("Missing 'url'"))?;

        let websocket_path = options
            .websocket_path
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_WEBSOCKET_PATH.to_owned());

        Ok(Self {
            url,
            websocket_path,
            headers: options.headers,
            auto_reconnect: options.auto_reconnect.unwrap_or(true),
            reconnect_interval: options
                .reconnect_interval
                .unwrap_or(DEFAULT_RECONNECT_INTERVAL_DURATION),
        })
    }

    /// Stream URL derived from the base address.
    ///
    /// `http` maps to `ws`, `https` to `wss`, anything else is kept. The path is
    /// replaced by the configured WebSocket path with exactly one leading slash.
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;

        let scheme = match url.scheme() {
            "http" => Some("ws"),
            "https" => Some("wss"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            url.set_scheme(scheme).map_err(|()| {
                Error::invalid_config(format!("cannot switch {} to {scheme}", self.url))
            })?;
        }

        if !self.websocket_path.is_empty() {
            let path = self.websocket_path.trim_start_matches('/');
            url.set_path(&format!("/{path}"));
        }

        Ok(url)
    }
}
