//! Interaction capture
//!
//! The recorder subscribes to a page's lifecycle events over CDP and installs
//! a small listener script that reports clicks and key presses back through a
//! `Runtime` binding. Every observed event becomes one line in the session log.
//!
//! ```text
//! Page.frameNavigated ──▶ navigated{url, title}
//! Page.loadEventFired ──▶ page_load{title}
//! binding "click"     ──▶ dom_event{kind: click, …locator}
//! binding "keydown"   ──▶ dom_event{kind: keydown, key}
//! ```

use crate::browser::OVERLAY_ELEMENT_ID;
use crate::error::{ConnectionError, Error, Result};
use crate::locator::{ElementSnapshot, SNAPSHOT_FN};
use crate::session::SessionEvent;
use crate::session_log::SessionLogWriter;
use chromiumoxide::cdp::browser_protocol::dom::EnableParams as DomEnableParams;
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, EnableParams as PageEnableParams,
    EventFrameNavigated, EventLoadEventFired,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    AddBindingParams, EnableParams as RuntimeEnableParams, EventBindingCalled,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Name of the `Runtime` binding the listener script reports through
pub const BINDING_NAME: &str = "__rkRecordEvent";

const LISTENER_TEMPLATE: &str = r#"
    (() => {
        if (window.__rkRecorderInstalled) return true;
        window.__rkRecorderInstalled = true;
        const snapshot = __SNAPSHOT__;
        const send = (msg) => {
            try { window['__BINDING__'](JSON.stringify(msg)); } catch (e) {}
        };
        document.addEventListener('click', (ev) => {
            let el = ev.target;
            if (el && el.nodeType !== 1) el = el.parentElement;
            if (!el || el.id === '__OVERLAY__') return;
            send({ kind: 'click', element: snapshot(el) });
        }, true);
        document.addEventListener('keydown', (ev) => {
            send({ kind: 'keydown', key: ev.key });
        }, true);
        return true;
    })()
"#;

/// In-page listener script, installed on every document
pub fn listener_script() -> String {
    LISTENER_TEMPLATE
        .replace("__SNAPSHOT__", SNAPSHOT_FN.trim())
        .replace("__BINDING__", BINDING_NAME)
        .replace("__OVERLAY__", OVERLAY_ELEMENT_ID)
}

/// Message sent by the listener script through the binding
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BindingMessage {
    /// A click with the clicked element's facts
    Click {
        /// Element facts
        element: ElementSnapshot,
    },
    /// A key press
    Keydown {
        /// `KeyboardEvent.key`
        key: String,
    },
}

impl BindingMessage {
    /// Parse a binding payload
    pub fn parse(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Convert into a session event
    pub fn into_event(self, session_id: &str) -> SessionEvent {
        match self {
            BindingMessage::Click { element } => SessionEvent::click(session_id, &element),
            BindingMessage::Keydown { key } => SessionEvent::keydown(session_id, &key),
        }
    }
}

/// Counters for a finished recording
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Events written to the log
    pub written: usize,
    /// Events that could not be written
    pub write_failures: usize,
    /// Binding payloads that did not parse
    pub ignored: usize,
}

struct Subscriptions {
    navigated: EventStream<EventFrameNavigated>,
    loaded: EventStream<EventLoadEventFired>,
    bindings: EventStream<EventBindingCalled>,
}

/// Writes captured events to a session log
pub struct Recorder {
    writer: Arc<SessionLogWriter>,
    session_id: String,
    stats: RecordStats,
}

impl Recorder {
    /// Create a recorder for one session
    pub fn new<S: Into<String>>(writer: Arc<SessionLogWriter>, session_id: S) -> Self {
        Self {
            writer,
            session_id: session_id.into(),
            stats: RecordStats::default(),
        }
    }

    /// Session id stamped on every event
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Counters so far
    pub fn stats(&self) -> RecordStats {
        self.stats
    }

    /// Append an event. Write failures are logged and counted.
    pub fn record(&mut self, event: SessionEvent) {
        match self.writer.append(&event) {
            Ok(()) => {
                self.stats.written += 1;
                debug!(event_type = ?event.event_type(), "Recorded event");
            }
            Err(e) => {
                self.stats.write_failures += 1;
                warn!("Failed to append event: {}", e);
            }
        }
    }

    /// Handle one payload from the listener binding
    pub fn handle_binding(&mut self, payload: &str) {
        match BindingMessage::parse(payload) {
            Ok(msg) => {
                let event = msg.into_event(&self.session_id);
                self.record(event);
            }
            Err(e) => {
                self.stats.ignored += 1;
                debug!("Ignoring binding payload: {}", e);
            }
        }
    }

    /// Record `page` until `shutdown` resolves.
    ///
    /// If the subscriptions cannot be set up, a single `error` event is
    /// written and the [`ConnectionError`] is returned. Events already written
    /// stay in the log when the page's event streams end early.
    #[instrument(skip(self, page, shutdown), fields(session_id = %self.session_id()))]
    pub async fn run<F>(&mut self, page: &Page, shutdown: F) -> Result<RecordStats>
    where
        F: Future<Output = ()>,
    {
        let mut subs = match Self::subscribe(page).await {
            Ok(subs) => subs,
            Err(e) => {
                let event = SessionEvent::error(self.session_id.clone(), e.to_string());
                self.record(event);
                return Err(e);
            }
        };

        info!("Recording to {}", self.writer.path().display());
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Recording stopped");
                    break;
                }
                Some(ev) = subs.navigated.next() => {
                    if ev.frame.parent_id.is_none() {
                        let title = page.get_title().await.ok().flatten();
                        let event = SessionEvent::navigated(self.session_id.clone(), &ev.frame.url, title);
                        self.record(event);
                    }
                }
                Some(_) = subs.loaded.next() => {
                    let title = page.get_title().await.ok().flatten();
                    let event = SessionEvent::page_load(self.session_id.clone(), title);
                    self.record(event);
                }
                Some(ev) = subs.bindings.next() => {
                    if ev.name == BINDING_NAME {
                        self.handle_binding(&ev.payload);
                    }
                }
                else => {
                    warn!("Page event streams ended");
                    return Err(ConnectionError::ConnectionLost.into());
                }
            }
        }

        Ok(self.stats)
    }

    async fn subscribe(page: &Page) -> Result<Subscriptions> {
        fn failed(what: &str, e: impl std::fmt::Display) -> Error {
            ConnectionError::SubscriptionFailed(format!("{}: {}", what, e)).into()
        }

        let navigated = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(|e| failed("Page.frameNavigated", e))?;
        let loaded = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(|e| failed("Page.loadEventFired", e))?;
        let bindings = page
            .event_listener::<EventBindingCalled>()
            .await
            .map_err(|e| failed("Runtime.bindingCalled", e))?;

        page.execute(PageEnableParams::default())
            .await
            .map_err(|e| failed("Page.enable", e))?;
        page.execute(DomEnableParams::default())
            .await
            .map_err(|e| failed("DOM.enable", e))?;
        page.execute(RuntimeEnableParams::default())
            .await
            .map_err(|e| failed("Runtime.enable", e))?;
        page.execute(AddBindingParams::new(BINDING_NAME))
            .await
            .map_err(|e| failed("Runtime.addBinding", e))?;

        let script = listener_script();
        let params = AddScriptToEvaluateOnNewDocumentParams::builder()
            .source(script.clone())
            .build()
            .map_err(|e| failed("listener script params", e))?;
        page.execute(params)
            .await
            .map_err(|e| failed("Page.addScriptToEvaluateOnNewDocument", e))?;

        // The current document predates the new-document hook.
        page.evaluate(script.as_str())
            .await
            .map_err(|e| failed("listener install", e))?;

        debug!("Recorder subscriptions established");
        Ok(Subscriptions {
            navigated,
            loaded,
            bindings,
        })
    }
}
