//! Session log persistence
//!
//! The log is newline-delimited JSON, one [`SessionEvent`] per line, written
//! append-only and flushed per event. Readers are lenient: a line that does
//! not parse is dropped and the rest of the log is still returned.

use crate::error::{Result, SessionLogError};
use crate::session::{EventType, Payload, SessionEvent};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Default file name for a session's log
pub fn default_log_name(session_id: &str) -> String {
    format!("dom_session_{}.jsonl", session_id)
}

/// Append-only writer shared by all capture callbacks.
///
/// Each event is serialized to a complete line before the lock is taken and
/// written with a single `write_all`, so concurrent callers never interleave.
pub struct SessionLogWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl SessionLogWriter {
    /// Open (or create) a log for appending
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Opened session log {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and flush it to disk
    pub fn append(&self, event: &SessionEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Parse log text, dropping lines that are blank or malformed
pub fn parse_events(text: &str) -> Vec<SessionEvent> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match parse_line(idx + 1, line) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!("Skipping {}", e);
                None
            }
        })
        .collect()
}

fn parse_line(line_no: usize, line: &str) -> std::result::Result<SessionEvent, SessionLogError> {
    serde_json::from_str(line.trim()).map_err(|e| SessionLogError::MalformedLine {
        line: line_no,
        reason: e.to_string(),
    })
}

/// Read every parseable event from a log file, in file order
#[instrument]
pub fn read_events(path: &Path) -> Result<Vec<SessionEvent>> {
    let text = std::fs::read_to_string(path)?;
    let events = parse_events(&text);
    debug!("Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

/// Overview of a log's contents
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session id of the first event
    pub session_id: Option<String>,
    /// Total events
    pub total: usize,
    /// Events per type
    pub by_type: HashMap<EventType, usize>,
    /// Earliest timestamp
    pub start: Option<DateTime<Utc>>,
    /// Latest timestamp
    pub end: Option<DateTime<Utc>>,
}

impl SessionSummary {
    /// Count of events with the given type
    pub fn count(&self, event_type: EventType) -> usize {
        self.by_type.get(&event_type).copied().unwrap_or(0)
    }
}

/// Summarize a sequence of events
pub fn summarize(events: &[SessionEvent]) -> SessionSummary {
    let mut summary = SessionSummary {
        session_id: events.first().map(|e| e.session_id.clone()),
        total: events.len(),
        ..Default::default()
    };

    for event in events {
        *summary.by_type.entry(event.event_type()).or_insert(0) += 1;
        summary.start = Some(summary.start.map_or(event.timestamp, |s| s.min(event.timestamp)));
        summary.end = Some(summary.end.map_or(event.timestamp, |e| e.max(event.timestamp)));
    }

    summary
}

/// Latest navigated URL together with the latest known page title
pub fn last_location(events: &[SessionEvent]) -> Option<(String, Option<String>)> {
    let mut url: Option<String> = None;
    let mut title: Option<String> = None;

    for event in events {
        match &event.payload {
            Payload::Navigated(p) => {
                url = Some(p.url.clone());
                if p.title.is_some() {
                    title = p.title.clone();
                }
            }
            Payload::PageLoad(p) => {
                if p.title.is_some() {
                    title = p.title.clone();
                }
            }
            _ => {}
        }
    }

    url.map(|u| (u, title))
}
