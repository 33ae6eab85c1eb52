//! Caption synchronization
//!
//! Captions attach overlay text to replay step indices. They are supplied as a
//! JSON array of `{index, text}`; anything that does not parse is treated as
//! "no captions" rather than an error.
//!
//! Captions usually come from narration recorded alongside a session, see
//! [`align_narrations`].

use crate::error::{CaptionError, Result};
use crate::replay::{bounded, ReplayTarget};
use crate::session::SessionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Overlay text for one replay step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    /// Replay step index
    pub index: usize,
    /// Text to display
    pub text: String,
}

impl Caption {
    /// Create a caption
    pub fn new<S: Into<String>>(index: usize, text: S) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Index → caption text lookup. When an index appears twice the later entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptionTrack {
    by_index: BTreeMap<usize, String>,
}

impl CaptionTrack {
    /// Build a track from captions
    pub fn new(captions: impl IntoIterator<Item = Caption>) -> Self {
        Self {
            by_index: captions.into_iter().map(|c| (c.index, c.text)).collect(),
        }
    }

    /// Strict parse of a JSON caption array
    pub fn try_parse(json: &str) -> std::result::Result<Self, CaptionError> {
        let captions: Vec<Caption> =
            serde_json::from_str(json).map_err(|e| CaptionError::Parse(e.to_string()))?;
        Ok(Self::new(captions))
    }

    /// Lenient parse: malformed or empty input yields an empty track
    pub fn parse(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        Self::try_parse(json).unwrap_or_else(|e| {
            debug!("Ignoring captions: {}", e);
            Self::default()
        })
    }

    /// Caption text for a step, if any
    pub fn get(&self, index: usize) -> Option<&str> {
        self.by_index.get(&index).map(String::as_str)
    }

    /// Number of captioned steps
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// Whether the track has no captions
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Captions in index order
    pub fn to_captions(&self) -> Vec<Caption> {
        self.by_index
            .iter()
            .map(|(i, t)| Caption::new(*i, t.clone()))
            .collect()
    }
}

/// Single on-page caption overlay.
///
/// Created lazily by the first caption, updated in place afterwards, and
/// removed by [`CaptionOverlay::remove`], which the replay driver calls on
/// every exit path. Every call to the target is bounded by `call_timeout`.
#[derive(Debug)]
pub struct CaptionOverlay {
    current: Option<String>,
    call_timeout: Duration,
}

impl CaptionOverlay {
    /// A not-yet-created overlay whose target calls time out after `call_timeout`
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            current: None,
            call_timeout,
        }
    }

    /// Text currently displayed, if the overlay exists
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Create or update the overlay. Showing the text already displayed is a no-op.
    pub async fn show<T: ReplayTarget>(&mut self, target: &T, text: &str) -> Result<()> {
        if self.current() == Some(text) {
            return Ok(());
        }
        bounded(self.call_timeout, target.show_caption(text)).await?;
        self.current = Some(text.to_string());
        Ok(())
    }

    /// Remove the overlay. Always attempted, even if it was never shown.
    pub async fn remove<T: ReplayTarget>(&mut self, target: &T) -> Result<()> {
        self.current = None;
        bounded(self.call_timeout, target.remove_caption()).await
    }
}

/// A timestamped narration line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Narration {
    /// When it was spoken or typed
    #[serde(deserialize_with = "crate::session::deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Narration text
    pub text: String,
}

/// Read narrations from a JSONL file, skipping unparseable lines
pub fn read_narrations(path: &Path) -> Result<Vec<Narration>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

/// Map each narration to the replay index closest to it in time.
///
/// `dom_timestamps[i]` is the capture time of log entry `i` (or `None` if
/// unknown). With at least two known timestamps each narration goes to the
/// nearest entry; otherwise narrations are spread proportionally over the log.
pub fn align_narrations(
    dom_timestamps: &[Option<DateTime<Utc>>],
    narrations: &[Narration],
) -> Vec<Caption> {
    if narrations.is_empty() || dom_timestamps.is_empty() {
        return Vec::new();
    }

    let mut dom: Vec<(usize, DateTime<Utc>)> = dom_timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| ts.map(|ts| (i, ts)))
        .collect();

    if dom.len() < 2 {
        let n_dom = dom_timestamps.len();
        let n_narr = narrations.len();
        return narrations
            .iter()
            .enumerate()
            .map(|(i, n)| Caption::new(((i * n_dom) / n_narr).min(n_dom - 1), n.text.clone()))
            .collect();
    }

    let mut narrs: Vec<&Narration> = narrations.iter().collect();
    narrs.sort_by_key(|n| n.timestamp);
    dom.sort_by_key(|(_, ts)| *ts);

    let mut out = Vec::with_capacity(narrs.len());
    let mut j = 0usize;
    for n in narrs {
        while j + 1 < dom.len() {
            let d0 = (n.timestamp - dom[j].1).num_milliseconds().abs();
            let d1 = (n.timestamp - dom[j + 1].1).num_milliseconds().abs();
            if d1 <= d0 {
                j += 1;
            } else {
                break;
            }
        }
        out.push(Caption::new(dom[j].0, n.text.clone()));
    }
    out
}

/// [`align_narrations`] against the events of a session log
pub fn align_to_events(events: &[SessionEvent], narrations: &[Narration]) -> Vec<Caption> {
    let stamps: Vec<Option<DateTime<Utc>>> = events.iter().map(|e| Some(e.timestamp)).collect();
    align_narrations(&stamps, narrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn narration(secs: i64, text: &str) -> Narration {
        Narration {
            timestamp: at(secs),
            text: text.to_string(),
        }
    }

    // ========================================================================
    // Parsing Tests
    // ========================================================================

    #[test]
    fn test_parse_valid() {
        let track = CaptionTrack::parse(r#"[{"index":1,"text":"Hello"},{"index":4,"text":"Bye"}]"#);
        assert_eq!(track.len(), 2);
        assert_eq!(track.get(1), Some("Hello"));
        assert_eq!(track.get(0), None);
    }

    #[test]
    fn test_parse_malformed_is_empty() {
        assert!(CaptionTrack::parse("not json").is_empty());
        assert!(CaptionTrack::parse(r#"{"index":1}"#).is_empty());
        assert!(CaptionTrack::parse(r#"[{"index":-1,"text":"x"}]"#).is_empty());
        assert!(CaptionTrack::parse("").is_empty());
    }

    #[test]
    fn test_try_parse_reports_error() {
        let err = CaptionTrack::try_parse("[").unwrap_err();
        assert!(err.to_string().contains("Caption parse failed"));
    }

    #[test]
    fn test_duplicate_index_last_wins() {
        let track = CaptionTrack::parse(r#"[{"index":2,"text":"a"},{"index":2,"text":"b"}]"#);
        assert_eq!(track.len(), 1);
        assert_eq!(track.get(2), Some("b"));
    }

    #[test]
    fn test_to_captions_sorted() {
        let track = CaptionTrack::new(vec![Caption::new(5, "e"), Caption::new(1, "a")]);
        let idx: Vec<usize> = track.to_captions().iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![1, 5]);
    }

    // ========================================================================
    // Alignment Tests
    // ========================================================================

    #[test]
    fn test_align_empty_inputs() {
        assert!(align_narrations(&[], &[narration(0, "x")]).is_empty());
        assert!(align_narrations(&[Some(at(0))], &[]).is_empty());
    }

    #[test]
    fn test_align_nearest_timestamp() {
        let dom = vec![Some(at(0)), Some(at(10)), Some(at(20)), Some(at(30))];
        let narrs = vec![narration(11, "second"), narration(29, "last"), narration(-5, "first")];

        let captions = align_narrations(&dom, &narrs);
        assert_eq!(
            captions,
            vec![
                Caption::new(0, "first"),
                Caption::new(1, "second"),
                Caption::new(3, "last"),
            ]
        );
    }

    #[test]
    fn test_align_tie_prefers_later_entry() {
        let dom = vec![Some(at(0)), Some(at(10))];
        let captions = align_narrations(&dom, &[narration(5, "mid")]);
        assert_eq!(captions, vec![Caption::new(1, "mid")]);
    }

    #[test]
    fn test_align_skips_unknown_timestamps() {
        let dom = vec![Some(at(0)), None, Some(at(20))];
        let captions = align_narrations(&dom, &[narration(12, "x")]);
        assert_eq!(captions, vec![Caption::new(2, "x")]);
    }

    #[test]
    fn test_align_proportional_fallback() {
        let dom = vec![None; 10];
        let narrs = vec![narration(0, "a"), narration(1, "b"), narration(2, "c"), narration(3, "d")];

        let idx: Vec<usize> = align_narrations(&dom, &narrs).iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 2, 5, 7]);
    }

    #[test]
    fn test_align_proportional_clamps() {
        let dom = vec![Some(at(0))];
        let narrs = vec![narration(0, "a"), narration(1, "b")];
        let idx: Vec<usize> = align_narrations(&dom, &narrs).iter().map(|c| c.index).collect();
        assert_eq!(idx, vec![0, 0]);
    }

    #[test]
    fn test_read_narrations_lenient() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narr.jsonl");
        std::fs::write(
            &path,
            "{\"timestamp\":\"2024-05-01T10:00:00Z\",\"text\":\"hi\"}\ngarbage\n\
             {\"timestamp\":\"2024-05-01T10:00:05\",\"text\":\"local\"}\n",
        )
        .unwrap();
        let narrs = read_narrations(&path).unwrap();
        assert_eq!(narrs.len(), 2);
        assert_eq!(narrs[0].text, "hi");
        assert_eq!(
            narrs[1].timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 5).unwrap()
        );
    }
}
