//! Session replay
//!
//! [`ReplayDriver`] walks a session log in file order and re-drives each event
//! against a [`ReplayTarget`], consulting the [`ControlChannel`] and the
//! [`CaptionTrack`] at every step:
//!
//! ```text
//! Idle ─▶ Loading ─▶ ┌──────────── StepLoop(i) ────────────┐ ─▶ Completed
//!                    │ CheckStop ─▶ WriteProgress          │ ─▶ Aborted
//!                    │ ─▶ ApplyCaption ─▶ WaitPause        │ ─▶ Failed
//!                    │ ─▶ RecheckStop ─▶ WaitStep          │
//!                    │ ─▶ Dispatch ─▶ Advance              │
//!                    └─────────────────────────────────────┘
//! ```
//!
//! Stop is only observed at step boundaries, including while waiting for a
//! step signal; an in-flight action always completes first. Every protocol
//! call, caption calls included, is bounded by the per-call timeout. Whatever
//! the outcome, the caption overlay is removed and a
//! final progress value is written before [`ReplayDriver::run`] returns.

use crate::captions::{CaptionOverlay, CaptionTrack};
use crate::control::{ControlChannel, Progress};
use crate::error::{Error, LocatorError, Result};
use crate::locator::{Candidate, Locator};
use crate::session::{DomEventPayload, Payload, SessionEvent};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default delay after each dispatched action
pub const DEFAULT_SPEED_MS: u64 = 400;

/// Default upper bound for a single protocol call
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;

/// Browser operations the replay driver needs.
///
/// Element handles never outlive a call: each click resolves its selector
/// afresh.
#[allow(async_fn_in_trait)]
pub trait ReplayTarget {
    /// Navigate the page to `url`
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Click the first element matching a CSS selector
    async fn click_css(&self, selector: &str) -> Result<()>;

    /// Click the first element matching an XPath expression
    async fn click_xpath(&self, xpath: &str) -> Result<()>;

    /// Dispatch key-down then key-up for Enter
    async fn press_enter(&self) -> Result<()>;

    /// Insert text at the focused element
    async fn insert_text(&self, text: &str) -> Result<()>;

    /// Create or update the caption overlay
    async fn show_caption(&self, text: &str) -> Result<()>;

    /// Remove the caption overlay if present
    async fn remove_caption(&self) -> Result<()>;
}

/// Replay pacing and side inputs
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Delay after each dispatched action
    pub speed: Duration,
    /// Upper bound for a single protocol call
    pub call_timeout: Duration,
    /// Control files
    pub control: ControlChannel,
    /// Captions by step index
    pub captions: CaptionTrack,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            speed: Duration::from_millis(DEFAULT_SPEED_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
            control: ControlChannel::disabled(),
            captions: CaptionTrack::default(),
        }
    }
}

/// Replay states, used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Nothing started yet
    Idle,
    /// Connecting and reading the log
    Loading,
    /// Checking the stop signal before a step
    CheckStop,
    /// Publishing progress
    WriteProgress,
    /// Updating the caption overlay
    ApplyCaption,
    /// Waiting for the pause signal to clear
    WaitPause,
    /// Checking the stop signal again after a pause
    RecheckStop,
    /// Waiting for a step signal
    WaitStep,
    /// Running the event's action
    Dispatch,
    /// Moving to the next event
    Advance,
    /// Every event was dispatched
    Completed,
    /// Stopped by the stop signal
    Aborted,
    /// Ended by a protocol error
    Failed,
}

impl ReplayState {
    /// Whether the state ends the replay
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReplayState::Completed | ReplayState::Aborted | ReplayState::Failed
        )
    }
}

/// How a replay ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Every event was dispatched
    Completed,
    /// Stop signal observed before dispatching `index`
    Aborted {
        /// First event that was not dispatched
        index: usize,
    },
    /// Dispatching `index` failed
    Failed {
        /// Event whose dispatch failed
        index: usize,
        /// Failure description
        reason: String,
    },
}

impl ReplayOutcome {
    /// Terminal state for this outcome
    pub fn state(&self) -> ReplayState {
        match self {
            ReplayOutcome::Completed => ReplayState::Completed,
            ReplayOutcome::Aborted { .. } => ReplayState::Aborted,
            ReplayOutcome::Failed { .. } => ReplayState::Failed,
        }
    }
}

/// Summary of a replay run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// How the run ended
    pub outcome: ReplayOutcome,
    /// Number of events in the log
    pub total: usize,
    /// Events whose action was dispatched (including no-op actions)
    pub dispatched: usize,
    /// Clicks where no locator candidate resolved
    pub locator_misses: usize,
    /// Protocol calls that hit the per-call timeout
    pub timeouts: usize,
}

impl ReplayReport {
    /// Final progress value written for this run
    pub fn final_progress(&self) -> Progress {
        let index = match &self.outcome {
            ReplayOutcome::Completed => self.total,
            ReplayOutcome::Aborted { index } | ReplayOutcome::Failed { index, .. } => *index,
        };
        Progress::new(index, self.total)
    }
}

/// What a single event turns into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Navigate to a URL
    Navigate(String),
    /// Let the page settle (delay only)
    Settle,
    /// Click via the locator's candidates
    Click(Locator),
    /// Enter key press
    PressEnter,
    /// Insert a single character
    InsertText(String),
    /// Nothing to do beyond the delay
    Skip,
}

impl Action {
    /// Map an event to its replay action
    pub fn plan(event: &SessionEvent) -> Self {
        match &event.payload {
            Payload::Navigated(p) => Action::Navigate(p.url.clone()),
            Payload::PageLoad(_) => Action::Settle,
            Payload::DomEvent(DomEventPayload::Click(c)) => Action::Click(c.locator()),
            Payload::DomEvent(DomEventPayload::Keydown(k)) => Self::plan_key(&k.key),
            Payload::Error(_) => Action::Skip,
        }
    }

    /// Enter → key press; one character (including space) → text; else nothing
    pub fn plan_key(key: &str) -> Self {
        if key == "Enter" {
            return Action::PressEnter;
        }
        let mut chars = key.chars();
        match (chars.next(), chars.next()) {
            (Some(_), None) => Action::InsertText(key.to_string()),
            _ => Action::Skip,
        }
    }
}

enum Step {
    Continue,
    Fail(String),
}

#[derive(Default)]
struct Counters {
    dispatched: usize,
    locator_misses: usize,
    timeouts: usize,
}

/// Drives a session log against a [`ReplayTarget`]
pub struct ReplayDriver<'a, T: ReplayTarget> {
    target: &'a T,
    options: ReplayOptions,
}

impl<'a, T: ReplayTarget> ReplayDriver<'a, T> {
    /// Create a driver over a target
    pub fn new(target: &'a T, options: ReplayOptions) -> Self {
        Self { target, options }
    }

    /// Replay `events` in order. Never fails; the outcome is in the report.
    #[instrument(skip(self, events), fields(total = events.len()))]
    pub async fn run(&self, events: &[SessionEvent]) -> ReplayReport {
        let total = events.len();
        let mut overlay = CaptionOverlay::new(self.options.call_timeout);
        let mut counters = Counters::default();

        info!("Replaying {} events", total);
        let outcome = self.step_loop(events, &mut overlay, &mut counters).await;

        let removed = overlay.remove(self.target).await;
        self.absorb("remove caption overlay", removed, &mut counters);
        let report = ReplayReport {
            outcome,
            total,
            dispatched: counters.dispatched,
            locator_misses: counters.locator_misses,
            timeouts: counters.timeouts,
        };
        self.options.control.write_progress(report.final_progress()).await;

        trace!(state = ?report.outcome.state());
        match &report.outcome {
            ReplayOutcome::Completed => info!("Replay completed ({} events)", total),
            ReplayOutcome::Aborted { index } => info!("Replay stopped at {}/{}", index, total),
            ReplayOutcome::Failed { index, reason } => {
                error!("Replay failed at {}/{}: {}", index, total, reason)
            }
        }
        report
    }

    async fn step_loop(
        &self,
        events: &[SessionEvent],
        overlay: &mut CaptionOverlay,
        counters: &mut Counters,
    ) -> ReplayOutcome {
        let total = events.len();
        let control = &self.options.control;

        for (index, event) in events.iter().enumerate() {
            trace!(index, state = ?ReplayState::CheckStop);
            if control.stop_requested().await {
                return ReplayOutcome::Aborted { index };
            }

            trace!(index, state = ?ReplayState::WriteProgress);
            control.write_progress(Progress::new(index, total)).await;

            if let Some(text) = self.options.captions.get(index) {
                trace!(index, state = ?ReplayState::ApplyCaption);
                let shown = overlay.show(self.target, text).await;
                self.absorb("show caption", shown, counters);
            }

            trace!(index, state = ?ReplayState::WaitPause);
            control.wait_while_paused().await;

            trace!(index, state = ?ReplayState::RecheckStop);
            if control.stop_requested().await {
                return ReplayOutcome::Aborted { index };
            }

            if control.step_mode() {
                trace!(index, state = ?ReplayState::WaitStep);
                if !control.wait_for_step().await {
                    return ReplayOutcome::Aborted { index };
                }
            }

            trace!(index, state = ?ReplayState::Dispatch);
            match self.dispatch(index, event, counters).await {
                Step::Continue => {}
                Step::Fail(reason) => return ReplayOutcome::Failed { index, reason },
            }
            counters.dispatched += 1;

            trace!(index, state = ?ReplayState::Advance);
        }

        ReplayOutcome::Completed
    }

    async fn dispatch(&self, index: usize, event: &SessionEvent, counters: &mut Counters) -> Step {
        let action = Action::plan(event);
        debug!(index, ?action, "Dispatching");

        let result = match &action {
            Action::Navigate(url) => self.call(self.target.navigate(url)).await,
            Action::Settle | Action::Skip => Ok(()),
            Action::Click(locator) => {
                if let Err(e) = self.click(locator, counters).await {
                    warn!("Step {}: {}", index, e);
                    counters.locator_misses += 1;
                }
                Ok(())
            }
            Action::PressEnter => self.call(self.target.press_enter()).await,
            Action::InsertText(text) => self.call(self.target.insert_text(text)).await,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_timeout() => {
                warn!("Step {}: {}, continuing", index, e);
                counters.timeouts += 1;
            }
            Err(e) => return Step::Fail(e.to_string()),
        }

        tokio::time::sleep(self.options.speed).await;
        Step::Continue
    }

    /// Try each locator candidate in order; the first successful click wins
    async fn click(&self, locator: &Locator, counters: &mut Counters) -> Result<()> {
        for candidate in locator.candidates() {
            let attempt = match candidate {
                Candidate::Css(sel) => self.call(self.target.click_css(sel)).await,
                Candidate::XPath(xp) => self.call(self.target.click_xpath(xp)).await,
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if e.is_timeout() {
                        counters.timeouts += 1;
                    }
                    debug!("Candidate {} failed: {}", candidate.as_str(), e);
                }
            }
        }

        Err(LocatorError::Exhausted {
            css: locator.css.clone(),
            xpath: locator.xpath.clone(),
        }
        .into())
    }

    /// Bound a protocol call by the per-call timeout
    async fn call<F>(&self, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        bounded(self.options.call_timeout, fut).await
    }

    fn absorb(&self, what: &str, result: Result<()>, counters: &mut Counters) {
        if let Err(e) = result {
            if e.is_timeout() {
                counters.timeouts += 1;
            }
            warn!("Failed to {}: {}", what, e);
        }
    }
}

/// Run `fut`, turning an overrun of `limit` into [`Error::Timeout`]
pub(crate) async fn bounded<F>(limit: Duration, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}
