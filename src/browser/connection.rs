//! Remote-debugging connection management
//!
//! This module attaches to an already running Chromium through its
//! remote-debugging endpoint, picks the page to work on, and releases the
//! connection afterwards without closing the user's browser.

use crate::error::{ConnectionError, Result};
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Default remote-debugging endpoint
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9222";

/// Configuration for attaching to a browser
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `http(s)://host:port` or a `ws(s)://` debugger URL (default: 127.0.0.1:9222)
    pub endpoint: String,
    /// Timeout for establishing the connection in milliseconds (default: 10000)
    pub connect_timeout_ms: u64,
    /// Time given to target discovery before enumerating pages (default: 300)
    pub discovery_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 10_000,
            discovery_delay_ms: 300,
        }
    }
}

impl ConnectionConfig {
    /// Create a new config builder
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }
}

/// Builder for ConnectionConfig
#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Set the remote-debugging endpoint
    pub fn endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the target discovery delay
    pub fn discovery_delay_ms(mut self, ms: u64) -> Self {
        self.config.discovery_delay_ms = ms;
        self
    }

    /// Build the config
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Check that an endpoint is a URL chromiumoxide can dial
pub fn validate_endpoint(endpoint: &str) -> std::result::Result<Url, ConnectionError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConnectionError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    match url.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "unsupported scheme '{}' in {}",
                other, endpoint
            )))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConnectionError::InvalidEndpoint(format!(
            "missing host in {}",
            endpoint
        )));
    }

    Ok(url)
}

/// Live connection to a browser's debugging endpoint
pub struct BrowserConnection {
    browser: Browser,
    handler: JoinHandle<()>,
    config: ConnectionConfig,
}

impl BrowserConnection {
    /// Connect to the configured endpoint.
    ///
    /// Any failure here is a [`ConnectionError`], the one fatal error class.
    #[instrument(skip(config), fields(endpoint = %config.endpoint))]
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        validate_endpoint(&config.endpoint)?;
        info!("Connecting to {}", config.endpoint);

        let connect_failed = |reason: String| ConnectionError::ConnectFailed {
            endpoint: config.endpoint.clone(),
            reason,
        };

        let (browser, mut handler) = tokio::time::timeout(
            Duration::from_millis(config.connect_timeout_ms),
            Browser::connect(config.endpoint.clone()),
        )
        .await
        .map_err(|_| connect_failed(format!("timed out after {}ms", config.connect_timeout_ms)))?
        .map_err(|e| connect_failed(e.to_string()))?;

        // Spawn handler task
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("Browser handler event error: {}", e);
                }
            }
            debug!("Browser handler finished");
        });

        info!("Connected to browser");

        Ok(Self {
            browser,
            handler: handler_task,
            config,
        })
    }

    /// Pick the page to record or replay on.
    ///
    /// Prefers the first regular web page among the browser's existing
    /// targets and opens a blank page if there is none.
    #[instrument(skip(self))]
    pub async fn active_page(&mut self) -> Result<Page> {
        let targets = self
            .browser
            .fetch_targets()
            .await
            .map_err(|e| ConnectionError::NoPage(e.to_string()))?;
        debug!("Browser reports {} targets", targets.len());

        tokio::time::sleep(Duration::from_millis(self.config.discovery_delay_ms)).await;

        let pages = self
            .browser
            .pages()
            .await
            .map_err(|e| ConnectionError::NoPage(e.to_string()))?;

        for page in pages {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            if is_user_page(&url) {
                info!("Using existing page {}", url);
                return Ok(page);
            }
        }

        info!("No existing page, opening about:blank");
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ConnectionError::NoPage(e.to_string()))?;
        Ok(page)
    }

    /// Release the connection. The browser itself keeps running.
    #[instrument(skip(self))]
    pub async fn release(self) {
        drop(self.browser);

        // Wait for handler to finish
        if tokio::time::timeout(Duration::from_secs(2), self.handler)
            .await
            .is_err()
        {
            debug!("Browser handler still running after release");
        }

        info!("Connection released");
    }
}

/// Whether a target URL belongs to a page the user is looking at
pub fn is_user_page(url: &str) -> bool {
    !(url.starts_with("devtools://")
        || url.starts_with("chrome-extension://")
        || url.starts_with("chrome://")
        || url.starts_with("edge://"))
}
