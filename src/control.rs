//! File-based replay control
//!
//! The replay driver and whatever paces it (a dashboard, a shell, a test)
//! share nothing but a handful of file paths:
//!
//! | Signal   | Trigger | Meaning                                         |
//! |----------|---------|-------------------------------------------------|
//! | pause    | level   | file exists → replay is paused                  |
//! | step     | edge    | file appears → advance one step, file is deleted|
//! | stop     | level   | file exists → replay aborts at the next boundary|
//! | progress | output  | `{index, total}`, overwritten by the driver     |
//!
//! Every path is optional. On the driver side ([`ControlChannel`]) I/O errors
//! are treated as "signal absent" so a flaky filesystem never ends a replay.
//! The controller side ([`Controller`]) reports errors to its caller.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

/// Default interval between polls of the pause and step files
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 150;

/// File name of the pause toggle inside a control directory
pub const PAUSE_FILE_NAME: &str = "wam_replay_pause.toggle";
/// File name of the step signal inside a control directory
pub const STEP_FILE_NAME: &str = "wam_replay_step.signal";
/// File name of the stop signal inside a control directory
pub const STOP_FILE_NAME: &str = "wam_replay_stop.signal";
/// File name of the progress report inside a control directory
pub const PROGRESS_FILE_NAME: &str = "wam_replay_progress.json";

/// Replay position as reported through the progress file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Index of the step about to run, or the final index once replay ended
    pub index: usize,
    /// Number of events in the log
    pub total: usize,
}

impl Progress {
    /// Create a progress value; `index` is clamped to `total`
    pub fn new(index: usize, total: usize) -> Self {
        Self {
            index: index.min(total),
            total,
        }
    }

    /// Completion percentage in `[0, 100]`
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.index as f32 / self.total as f32 * 100.0
        }
    }
}

/// Locations of the control files. `None` disables a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlPaths {
    /// Pause toggle
    pub pause: Option<PathBuf>,
    /// Step signal; its presence also enables step mode
    pub step: Option<PathBuf>,
    /// Stop signal
    pub stop: Option<PathBuf>,
    /// Progress output
    pub progress: Option<PathBuf>,
}

impl ControlPaths {
    /// All four signals under `dir`, using the standard file names
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            pause: Some(dir.join(PAUSE_FILE_NAME)),
            step: Some(dir.join(STEP_FILE_NAME)),
            stop: Some(dir.join(STOP_FILE_NAME)),
            progress: Some(dir.join(PROGRESS_FILE_NAME)),
        }
    }

    /// All four signals in the system temp directory
    pub fn temp() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    /// Drop empty paths, which callers use to mean "disabled"
    pub fn normalized(self) -> Self {
        fn keep(p: Option<PathBuf>) -> Option<PathBuf> {
            p.filter(|p| !p.as_os_str().is_empty())
        }
        Self {
            pause: keep(self.pause),
            step: keep(self.step),
            stop: keep(self.stop),
            progress: keep(self.progress),
        }
    }

    /// Same paths without the step signal (free-running replay)
    pub fn without_step(mut self) -> Self {
        self.step = None;
        self
    }
}

/// Driver side of the control protocol
#[derive(Debug, Clone)]
pub struct ControlChannel {
    paths: ControlPaths,
    poll_interval: Duration,
}

impl Default for ControlChannel {
    fn default() -> Self {
        Self::disabled()
    }
}

impl ControlChannel {
    /// Create a channel over the given paths
    pub fn new(paths: ControlPaths, poll_interval: Duration) -> Self {
        Self {
            paths: paths.normalized(),
            poll_interval,
        }
    }

    /// A channel with every signal disabled
    pub fn disabled() -> Self {
        Self::new(
            ControlPaths::default(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        )
    }

    /// Interval between polls
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Whether each step waits for an external step signal
    pub fn step_mode(&self) -> bool {
        self.paths.step.is_some()
    }

    /// Whether the pause file currently exists
    pub async fn is_paused(&self) -> bool {
        signal_present(self.paths.pause.as_deref()).await
    }

    /// Whether the stop file currently exists
    pub async fn stop_requested(&self) -> bool {
        signal_present(self.paths.stop.as_deref()).await
    }

    /// Sleep until the pause file is gone. Returns `true` if it had to wait.
    pub async fn wait_while_paused(&self) -> bool {
        let mut waited = false;
        while self.is_paused().await {
            if !waited {
                info!("Replay paused");
                waited = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        if waited {
            info!("Replay resumed");
        }
        waited
    }

    /// In step mode, block until the step file appears and consume it.
    ///
    /// Returns `false` if a stop is requested before the step arrives; the
    /// step file is then left in place.
    pub async fn wait_for_step(&self) -> bool {
        let Some(path) = self.paths.step.as_deref() else {
            return true;
        };

        while !signal_present(Some(path)).await {
            if self.stop_requested().await {
                debug!("Stop requested while waiting for a step");
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!("Could not consume step signal {}: {}", path.display(), e);
        }
        trace!("Step signal consumed");
        true
    }

    /// Overwrite the progress file. Errors are ignored.
    pub async fn write_progress(&self, progress: Progress) {
        let Some(path) = self.paths.progress.as_deref() else {
            return;
        };

        if let Err(e) = write_atomically(path, &progress).await {
            debug!("Could not write progress to {}: {}", path.display(), e);
        }
    }
}

async fn signal_present(path: Option<&Path>) -> bool {
    match path {
        Some(p) => tokio::fs::try_exists(p).await.unwrap_or(false),
        None => false,
    }
}

async fn write_atomically(path: &Path, progress: &Progress) -> std::io::Result<()> {
    let body = serde_json::to_vec(progress)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Snapshot of the control files as seen by a controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlStatus {
    /// Pause file present
    pub paused: bool,
    /// Stop file present and not yet acted upon
    pub stop_pending: bool,
    /// Step file present and not yet consumed
    pub step_pending: bool,
    /// Last reported progress
    pub progress: Option<Progress>,
}

/// Controller side of the control protocol
#[derive(Debug, Clone)]
pub struct Controller {
    paths: ControlPaths,
}

impl Controller {
    /// Create a controller over the given paths
    pub fn new(paths: ControlPaths) -> Self {
        Self {
            paths: paths.normalized(),
        }
    }

    /// Pause the replay
    #[instrument(skip(self))]
    pub fn pause(&self) -> Result<()> {
        touch(self.paths.pause.as_deref(), "pause")
    }

    /// Resume a paused replay
    #[instrument(skip(self))]
    pub fn resume(&self) -> Result<()> {
        remove_if_exists(self.paths.pause.as_deref())
    }

    /// Let a step-mode replay advance one step
    #[instrument(skip(self))]
    pub fn step(&self) -> Result<()> {
        touch(self.paths.step.as_deref(), "step")
    }

    /// Ask the replay to stop at the next step boundary
    #[instrument(skip(self))]
    pub fn stop(&self) -> Result<()> {
        touch(self.paths.stop.as_deref(), "stop")
    }

    /// Clear stale stop/step/progress markers before a new run
    #[instrument(skip(self))]
    pub fn reset(&self) -> Result<()> {
        remove_if_exists(self.paths.stop.as_deref())?;
        remove_if_exists(self.paths.step.as_deref())?;
        remove_if_exists(self.paths.progress.as_deref())
    }

    /// Last progress written by the driver. Unreadable content reads as `None`.
    pub fn read_progress(&self) -> Result<Option<Progress>> {
        let Some(path) = self.paths.progress.as_deref() else {
            return Ok(None);
        };
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Current state of every signal
    pub fn status(&self) -> Result<ControlStatus> {
        let exists = |p: Option<&Path>| p.map(|p| p.exists()).unwrap_or(false);
        Ok(ControlStatus {
            paused: exists(self.paths.pause.as_deref()),
            stop_pending: exists(self.paths.stop.as_deref()),
            step_pending: exists(self.paths.step.as_deref()),
            progress: self.read_progress()?,
        })
    }
}

fn touch(path: Option<&Path>, body: &str) -> Result<()> {
    if let Some(path) = path {
        std::fs::write(path, body)?;
        debug!("Wrote signal {}", path.display());
    }
    Ok(())
}

fn remove_if_exists(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(paths: ControlPaths) -> ControlChannel {
        ControlChannel::new(paths, Duration::from_millis(10))
    }

    // ========================================================================
    // Progress Tests
    // ========================================================================

    #[test]
    fn test_progress_clamps_index() {
        assert_eq!(Progress::new(9, 5), Progress { index: 5, total: 5 });
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(Progress::new(1, 4).percent(), 25.0);
        assert_eq!(Progress::new(0, 0).percent(), 0.0);
    }

    #[test]
    fn test_progress_wire_shape() {
        let json = serde_json::to_string(&Progress::new(2, 5)).unwrap();
        assert_eq!(json, r#"{"index":2,"total":5}"#);
    }

    // ========================================================================
    // Path Tests
    // ========================================================================

    #[test]
    fn test_in_dir_uses_standard_names() {
        let paths = ControlPaths::in_dir("/tmp/x");
        assert_eq!(paths.stop, Some(PathBuf::from("/tmp/x/wam_replay_stop.signal")));
        assert_eq!(
            paths.progress,
            Some(PathBuf::from("/tmp/x/wam_replay_progress.json"))
        );
    }

    #[test]
    fn test_empty_paths_disable_signals() {
        let channel = ControlChannel::new(
            ControlPaths {
                step: Some(PathBuf::new()),
                ..Default::default()
            },
            Duration::from_millis(10),
        );
        assert!(!channel.step_mode());
    }

    // ========================================================================
    // Driver Side Tests
    // ========================================================================

    #[tokio::test]
    async fn test_disabled_channel_is_inert() {
        let channel = ControlChannel::disabled();
        assert!(!channel.is_paused().await);
        assert!(!channel.stop_requested().await);
        assert!(!channel.wait_while_paused().await);
        assert!(channel.wait_for_step().await);
        channel.write_progress(Progress::new(0, 1)).await;
    }

    #[tokio::test]
    async fn test_stop_is_level_triggered() {
        let dir = tempfile::tempdir().unwrap();
        let channel = fast(ControlPaths::in_dir(dir.path()));

        assert!(!channel.stop_requested().await);
        std::fs::write(dir.path().join(STOP_FILE_NAME), "stop").unwrap();
        assert!(channel.stop_requested().await);
        assert!(channel.stop_requested().await);
    }

    #[tokio::test]
    async fn test_step_signal_is_consumed() {
        let dir = tempfile::tempdir().unwrap();
        let step = dir.path().join(STEP_FILE_NAME);
        std::fs::write(&step, "step").unwrap();

        let channel = fast(ControlPaths::in_dir(dir.path()));
        let consumed = tokio::time::timeout(Duration::from_secs(2), channel.wait_for_step())
            .await
            .unwrap();
        assert!(consumed);
        assert!(!step.exists());
    }

    #[tokio::test]
    async fn test_stop_releases_step_wait() {
        let dir = tempfile::tempdir().unwrap();
        let channel = fast(ControlPaths::in_dir(dir.path()));
        let stopper = {
            let stop = dir.path().join(STOP_FILE_NAME);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::write(stop, "stop").unwrap();
            })
        };

        let consumed = tokio::time::timeout(Duration::from_secs(2), channel.wait_for_step())
            .await
            .unwrap();
        stopper.await.unwrap();
        assert!(!consumed);
    }

    #[tokio::test]
    async fn test_step_blocks_without_signal() {
        let dir = tempfile::tempdir().unwrap();
        let channel = fast(ControlPaths::in_dir(dir.path()));
        let waited =
            tokio::time::timeout(Duration::from_millis(100), channel.wait_for_step()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_pause_waits_until_removed() {
        let dir = tempfile::tempdir().unwrap();
        let pause = dir.path().join(PAUSE_FILE_NAME);
        std::fs::write(&pause, "pause").unwrap();

        let channel = fast(ControlPaths::in_dir(dir.path()));
        let remover = {
            let pause = pause.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                std::fs::remove_file(pause).unwrap();
            })
        };

        let waited = tokio::time::timeout(Duration::from_secs(2), channel.wait_while_paused())
            .await
            .unwrap();
        assert!(waited);
        remover.await.unwrap();
    }

    #[tokio::test]
    async fn test_progress_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ControlPaths::in_dir(dir.path());
        let channel = fast(paths.clone());
        let controller = Controller::new(paths);

        channel.write_progress(Progress::new(0, 3)).await;
        channel.write_progress(Progress::new(1, 3)).await;
        assert_eq!(controller.read_progress().unwrap(), Some(Progress::new(1, 3)));
    }

    #[tokio::test]
    async fn test_progress_write_failure_is_swallowed() {
        let channel = fast(ControlPaths {
            progress: Some(PathBuf::from("/nonexistent-dir/for/sure/progress.json")),
            ..Default::default()
        });
        channel.write_progress(Progress::new(0, 1)).await;
    }

    // ========================================================================
    // Controller Tests
    // ========================================================================

    #[test]
    fn test_controller_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(ControlPaths::in_dir(dir.path()));

        controller.pause().unwrap();
        controller.stop().unwrap();
        controller.step().unwrap();
        let status = controller.status().unwrap();
        assert!(status.paused && status.stop_pending && status.step_pending);

        controller.resume().unwrap();
        controller.reset().unwrap();
        assert_eq!(controller.status().unwrap(), ControlStatus::default());
    }

    #[test]
    fn test_controller_resume_when_not_paused() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Controller::new(ControlPaths::in_dir(dir.path()));
        assert!(controller.resume().is_ok());
    }

    #[test]
    fn test_garbage_progress_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(PROGRESS_FILE_NAME), "{oops").unwrap();
        let controller = Controller::new(ControlPaths::in_dir(dir.path()));
        assert_eq!(controller.read_progress().unwrap(), None);
    }
}
