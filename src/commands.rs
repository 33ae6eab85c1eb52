//! Top-level operations
//!
//! Each function here is one command of the `rk-replay` binary: it wires the
//! configuration to a browser connection and the capture or replay machinery,
//! and always releases the connection before returning.

use crate::browser::{BrowserConnection, CdpTarget};
use crate::captions::{align_to_events, read_narrations, Caption};
use crate::config::{RecordConfig, ReplayConfig};
use crate::control::{ControlPaths, ControlStatus, Controller};
use crate::error::{Error, Result};
use crate::recorder::{RecordStats, Recorder};
use crate::replay::{ReplayDriver, ReplayReport, ReplayState};
use crate::session::SessionEvent;
use crate::session_log::{last_location, read_events, summarize, SessionLogWriter, SessionSummary};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, trace, warn};

/// Result of a recording session
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    /// Session id stamped on the events
    pub session_id: String,
    /// Log file written
    pub path: PathBuf,
    /// Event counters
    pub stats: RecordStats,
}

/// Record the active page until `shutdown` resolves.
///
/// If the browser or its page cannot be reached, a single `error` event is
/// written to the log before the error is returned.
#[instrument(skip(config, shutdown))]
pub async fn record<F>(config: &RecordConfig, shutdown: F) -> Result<RecordOutcome>
where
    F: Future<Output = ()>,
{
    let session_id = config.resolve_session_id();
    let path = config.output_path(&session_id);
    let writer = Arc::new(SessionLogWriter::open(&path)?);

    let log_failure = |e: Error| {
        let event = SessionEvent::error(session_id.clone(), e.to_string());
        if let Err(write_err) = writer.append(&event) {
            warn!("Failed to append error event: {}", write_err);
        }
        e
    };

    let mut connection = BrowserConnection::connect(config.connection.clone())
        .await
        .map_err(log_failure)?;
    let result = async {
        let page = connection.active_page().await.map_err(log_failure)?;
        let mut recorder = Recorder::new(writer.clone(), session_id.clone());
        recorder.run(&page, shutdown).await
    }
    .await;
    connection.release().await;

    let stats = result?;
    info!(
        "Recorded {} events to {} ({} write failures)",
        stats.written,
        path.display(),
        stats.write_failures
    );
    Ok(RecordOutcome {
        session_id,
        path,
        stats,
    })
}

/// Replay a session log against the active page.
///
/// Only connection failures and an unreadable log are errors. Everything that
/// happens during the step loop is reported in the [`ReplayReport`].
#[instrument(skip(config), fields(input = %config.input.display()))]
pub async fn replay(config: &ReplayConfig) -> Result<ReplayReport> {
    trace!(state = ?ReplayState::Idle);
    if config.input.as_os_str().is_empty() {
        return Err(Error::generic("No session log to replay"));
    }

    trace!(state = ?ReplayState::Loading);
    let mut connection = BrowserConnection::connect(config.connection.clone()).await?;
    let result = async {
        let page = connection.active_page().await?;
        let target = CdpTarget::attach(page).await?;
        let events = read_events(&config.input)?;

        let driver = ReplayDriver::new(&target, config.to_options());
        Ok::<_, Error>(driver.run(&events).await)
    }
    .await;
    connection.release().await;

    let report = result?;
    if report.locator_misses > 0 || report.timeouts > 0 {
        warn!(
            "{} locator misses, {} timeouts",
            report.locator_misses, report.timeouts
        );
    }
    Ok(report)
}

/// Overview of a session log
#[derive(Debug, Clone)]
pub struct Inspection {
    /// Counts and time range
    pub summary: SessionSummary,
    /// Last navigated URL and last known title
    pub last_location: Option<(String, Option<String>)>,
}

/// Summarize a session log
#[instrument]
pub fn inspect(path: &Path) -> Result<Inspection> {
    let events = read_events(path)?;
    Ok(Inspection {
        summary: summarize(&events),
        last_location: last_location(&events),
    })
}

/// Align narrations to a session log's steps
#[instrument]
pub fn align(dom_log: &Path, narrations: &Path) -> Result<Vec<Caption>> {
    let events = read_events(dom_log)?;
    let narrations = read_narrations(narrations)?;
    Ok(align_to_events(&events, &narrations))
}

/// Controller-side signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    /// Create the pause file
    Pause,
    /// Remove the pause file
    Resume,
    /// Create the step file
    Step,
    /// Create the stop file
    Stop,
    /// Clear stop, step and progress
    Reset,
    /// Only report the current state
    Status,
}

/// Apply `action` to the control files and report the resulting state
pub fn control(paths: ControlPaths, action: ControlAction) -> Result<ControlStatus> {
    let controller = Controller::new(paths);
    match action {
        ControlAction::Pause => controller.pause()?,
        ControlAction::Resume => controller.resume()?,
        ControlAction::Step => controller.step()?,
        ControlAction::Stop => controller.stop()?,
        ControlAction::Reset => controller.reset()?,
        ControlAction::Status => {}
    }
    controller.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ConnectionConfig;
    use crate::control::Progress;
    use crate::session::EventType;

    #[test]
    fn test_control_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ControlPaths::in_dir(dir.path());

        let status = control(paths.clone(), ControlAction::Pause).unwrap();
        assert!(status.paused);

        let status = control(paths.clone(), ControlAction::Stop).unwrap();
        assert!(status.paused);
        assert!(status.stop_pending);

        let status = control(paths.clone(), ControlAction::Resume).unwrap();
        assert!(!status.paused);

        let status = control(paths.clone(), ControlAction::Reset).unwrap();
        assert!(!status.stop_pending);
        assert!(!status.step_pending);
        assert_eq!(status.progress, None);
    }

    #[test]
    fn test_control_status_reads_progress() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ControlPaths::in_dir(dir.path());
        let body = serde_json::to_string(&Progress::new(3, 7)).unwrap();
        std::fs::write(paths.progress.as_ref().unwrap(), body).unwrap();

        let status = control(paths, ControlAction::Status).unwrap();
        assert_eq!(status.progress, Some(Progress::new(3, 7)));
    }

    #[tokio::test]
    async fn test_record_unreachable_endpoint_logs_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("s.jsonl");
        let config = RecordConfig::builder()
            .connection(
                ConnectionConfig::builder()
                    .endpoint("http://127.0.0.1:1")
                    .connect_timeout_ms(2000)
                    .build(),
            )
            .output(log.clone())
            .session_id("s1")
            .build();

        let err = record(&config, std::future::pending()).await.unwrap_err();
        assert!(err.is_fatal());

        let events = read_events(&log).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::Error);
        assert_eq!(events[0].session_id, "s1");
    }

    #[test]
    fn test_inspect_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("missing.jsonl")).is_err());
    }

    #[test]
    fn test_inspect_and_align() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("s.jsonl");
        let writer = SessionLogWriter::open(&log).unwrap();
        let nav = SessionEvent::navigated("s", "https://example.com/", Some("Example".into()));
        let key = SessionEvent::keydown("s", "a");
        writer.append(&nav).unwrap();
        writer.append(&key).unwrap();

        let inspection = inspect(&log).unwrap();
        assert_eq!(inspection.summary.total, 2);
        assert_eq!(
            inspection.last_location,
            Some(("https://example.com/".to_string(), Some("Example".to_string())))
        );

        let narrations = dir.path().join("n.jsonl");
        let line = serde_json::json!({ "timestamp": key.timestamp, "text": "typing" });
        std::fs::write(&narrations, format!("{}\n", line)).unwrap();

        let captions = align(&log, &narrations).unwrap();
        assert_eq!(captions, vec![Caption::new(1, "typing")]);
    }
}
