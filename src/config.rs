//! Run configuration
//!
//! [`RecordConfig`] and [`ReplayConfig`] hold everything a single run needs.
//! Both follow the same builder pattern as [`ConnectionConfig`].

use crate::browser::ConnectionConfig;
use crate::captions::CaptionTrack;
use crate::control::{ControlChannel, ControlPaths, DEFAULT_POLL_INTERVAL_MS};
use crate::replay::{ReplayOptions, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_SPEED_MS};
use crate::session_log::default_log_name;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Largest accepted post-action delay in milliseconds
pub const MAX_SPEED_MS: u64 = 10_000;

/// Configuration for a recording session
#[derive(Debug, Clone)]
pub struct RecordConfig {
    /// Browser connection
    pub connection: ConnectionConfig,
    /// Explicit log path; derived from the session id when unset
    pub output: Option<PathBuf>,
    /// Explicit session id; a fresh UUID when unset
    pub session_id: Option<String>,
    /// Directory for derived log paths (default: system temp dir)
    pub log_dir: PathBuf,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            output: None,
            session_id: None,
            log_dir: std::env::temp_dir(),
        }
    }
}

impl RecordConfig {
    /// Create a new config builder
    pub fn builder() -> RecordConfigBuilder {
        RecordConfigBuilder::default()
    }

    /// Session id for this run. Blank ids count as unset.
    pub fn resolve_session_id(&self) -> String {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// Log path for `session_id`
    pub fn output_path(&self, session_id: &str) -> PathBuf {
        match &self.output {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => self.log_dir.join(default_log_name(session_id)),
        }
    }
}

/// Builder for RecordConfig
#[derive(Default)]
pub struct RecordConfigBuilder {
    config: RecordConfig,
}

impl RecordConfigBuilder {
    /// Set the connection config
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Set an explicit log path
    pub fn output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.output = Some(path.into());
        self
    }

    /// Set the session id
    pub fn session_id<S: Into<String>>(mut self, id: S) -> Self {
        self.config.session_id = Some(id.into());
        self
    }

    /// Set the directory for derived log paths
    pub fn log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    /// Build the config
    pub fn build(self) -> RecordConfig {
        self.config
    }
}

/// Configuration for a replay run
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Browser connection
    pub connection: ConnectionConfig,
    /// Session log to replay
    pub input: PathBuf,
    /// Post-action delay in milliseconds (default: 400)
    pub speed_ms: u64,
    /// Captions by step index
    pub captions: CaptionTrack,
    /// Control file locations; `None` entries are disabled
    pub control: ControlPaths,
    /// Control file polling interval in milliseconds (default: 150)
    pub poll_interval_ms: u64,
    /// Upper bound for a single protocol call in milliseconds (default: 10000)
    pub call_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            input: PathBuf::new(),
            speed_ms: DEFAULT_SPEED_MS,
            captions: CaptionTrack::default(),
            control: ControlPaths::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl ReplayConfig {
    /// Create a new config builder
    pub fn builder() -> ReplayConfigBuilder {
        ReplayConfigBuilder::default()
    }

    /// Driver options for this run
    pub fn to_options(&self) -> ReplayOptions {
        ReplayOptions {
            speed: Duration::from_millis(self.speed_ms.min(MAX_SPEED_MS)),
            call_timeout: Duration::from_millis(self.call_timeout_ms.max(1)),
            control: ControlChannel::new(
                self.control.clone(),
                Duration::from_millis(self.poll_interval_ms.max(1)),
            ),
            captions: self.captions.clone(),
        }
    }
}

/// Builder for ReplayConfig
#[derive(Default)]
pub struct ReplayConfigBuilder {
    config: ReplayConfig,
}

impl ReplayConfigBuilder {
    /// Set the connection config
    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.config.connection = connection;
        self
    }

    /// Set the session log to replay
    pub fn input<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.input = path.into();
        self
    }

    /// Set the post-action delay, clamped to [`MAX_SPEED_MS`]
    pub fn speed_ms(mut self, ms: u64) -> Self {
        self.config.speed_ms = ms.min(MAX_SPEED_MS);
        self
    }

    /// Set captions
    pub fn captions(mut self, captions: CaptionTrack) -> Self {
        self.config.captions = captions;
        self
    }

    /// Set captions from their JSON form. Invalid JSON means no captions.
    pub fn captions_json(mut self, json: &str) -> Self {
        self.config.captions = CaptionTrack::parse(json);
        self
    }

    /// Set the control file locations
    pub fn control(mut self, paths: ControlPaths) -> Self {
        self.config.control = paths;
        self
    }

    /// Set the polling interval
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the per-call timeout
    pub fn call_timeout_ms(mut self, ms: u64) -> Self {
        self.config.call_timeout_ms = ms;
        self
    }

    /// Build the config
    pub fn build(self) -> ReplayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_record_config_default() {
        let config = RecordConfig::default();
        assert!(config.output.is_none());
        assert!(config.session_id.is_none());
        assert_eq!(config.log_dir, std::env::temp_dir());
    }

    #[test]
    fn test_record_session_id_generated_when_blank() {
        let config = RecordConfig::builder().session_id("  ").build();
        let id = config.resolve_session_id();
        assert!(Uuid::parse_str(&id).is_ok());

        let config = RecordConfig::builder().session_id("abc").build();
        assert_eq!(config.resolve_session_id(), "abc");
    }

    #[test]
    fn test_record_output_path() {
        let config = RecordConfig::builder().log_dir("/var/log/rk").build();
        assert_eq!(
            config.output_path("s1"),
            Path::new("/var/log/rk/dom_session_s1.jsonl")
        );

        let config = RecordConfig::builder().output("/tmp/x.jsonl").build();
        assert_eq!(config.output_path("s1"), Path::new("/tmp/x.jsonl"));
    }

    #[test]
    fn test_replay_config_default() {
        let config = ReplayConfig::default();
        assert_eq!(config.speed_ms, 400);
        assert_eq!(config.poll_interval_ms, 150);
        assert_eq!(config.call_timeout_ms, 10_000);
        assert!(config.captions.is_empty());
    }

    #[test]
    fn test_replay_config_builder() {
        let config = ReplayConfig::builder()
            .input("/tmp/s.jsonl")
            .speed_ms(50_000)
            .captions_json(r#"[{"index":0,"text":"Hi"}]"#)
            .control(ControlPaths::in_dir("/tmp").without_step())
            .poll_interval_ms(20)
            .build();

        assert_eq!(config.input, Path::new("/tmp/s.jsonl"));
        assert_eq!(config.speed_ms, MAX_SPEED_MS);
        assert_eq!(config.captions.get(0), Some("Hi"));
        assert!(config.control.step.is_none());

        let options = config.to_options();
        assert_eq!(options.speed, Duration::from_millis(MAX_SPEED_MS));
        assert_eq!(options.control.poll_interval(), Duration::from_millis(20));
        assert!(!options.control.step_mode());
    }

    #[test]
    fn test_replay_config_bad_captions_is_empty() {
        let config = ReplayConfig::builder().captions_json("not json").build();
        assert!(config.captions.is_empty());
    }
}
