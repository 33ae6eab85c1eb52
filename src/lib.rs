//! ReasonKit Replay - Browser Interaction Capture & Deterministic Replay
//!
//! This crate records what a user does in a running Chromium (navigations,
//! page loads, clicks and key presses) into an append-only session log, and
//! replays such a log against a live page over the Chrome DevTools Protocol.
//!
//! # Features
//!
//! - **Capture**: CDP page events plus an in-page listener, one NDJSON line per event
//! - **Locators**: deterministic CSS and XPath selectors synthesized at capture time
//! - **Replay**: paced re-execution with CSS → XPath fallback and per-call timeouts
//! - **Control**: pause, step and stop through plain files, progress written back
//! - **Captions**: step-indexed overlay text, optionally aligned from narration
//!
//! # Architecture
//!
//! ```text
//! Browser (CDP) ──▶ Recorder ──▶ Locator Synthesizer
//!                      │
//!                      ▼
//!                 Session Log (NDJSON)
//!                      │
//!                      ▼
//! Controller ──▶ Control Files ──▶ Replay Driver ──▶ Browser (CDP)
//!                                      │
//!                                      ▼
//!                               Caption Overlay
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use reasonkit_replay::commands;
//! use reasonkit_replay::config::ReplayConfig;
//! use reasonkit_replay::control::ControlPaths;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ReplayConfig::builder()
//!         .input("/tmp/dom_session_demo.jsonl")
//!         .speed_ms(400)
//!         .control(ControlPaths::temp().without_step())
//!         .build();
//!
//!     let report = commands::replay(&config).await?;
//!     println!("{:?}", report.outcome);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod browser;
pub mod captions;
pub mod commands;
pub mod config;
pub mod control;
pub mod error;
pub mod locator;
pub mod recorder;
pub mod replay;
pub mod session;
pub mod session_log;

// Re-exports for convenience
pub use browser::{BrowserConnection, CdpTarget, ConnectionConfig};
pub use captions::{Caption, CaptionTrack};
pub use config::{RecordConfig, ReplayConfig};
pub use control::{ControlChannel, ControlPaths, Controller, Progress};
pub use error::{Error, Result};
pub use locator::{Locator, LocatorSynthesizer};
pub use recorder::Recorder;
pub use replay::{ReplayDriver, ReplayOutcome, ReplayReport, ReplayTarget};
pub use session::SessionEvent;
pub use session_log::SessionLogWriter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
