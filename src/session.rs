//! Session event model
//!
//! A session log line looks like
//!
//! ```text
//! {"session_id":"…","timestamp":"2024-05-01T10:00:00Z","type":"dom_event","payload":{"kind":"keydown","key":"a"}}
//! ```
//!
//! The `type` tag and the payload shape must agree. [`SessionEvent`] goes
//! through a raw wire form on (de)serialization so a mismatch is rejected as a
//! malformed line instead of being silently reinterpreted.
//!
//! Timestamps are RFC 3339. A timestamp without an offset
//! (`2024-05-01T10:00:00`) is read as UTC.

use crate::error::SessionLogError;
use crate::locator::{ElementSnapshot, Locator, LocatorSynthesizer};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Maximum number of characters of visible text kept for a click
pub const MAX_CLICK_TEXT_CHARS: usize = 120;

/// Event type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Main-frame navigation
    Navigated,
    /// Page load event
    PageLoad,
    /// User input on the page
    DomEvent,
    /// Capture-side failure
    Error,
}

/// Payload of a `navigated` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigatedPayload {
    /// Destination URL
    pub url: String,
    /// Document title, if known at navigation time
    #[serde(default)]
    pub title: Option<String>,
}

/// Payload of a `page_load` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLoadPayload {
    /// Document title
    #[serde(default)]
    pub title: Option<String>,
}

/// Payload of a click
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickPayload {
    /// Lower-case tag name
    pub tag: String,
    /// CSS locator candidate
    #[serde(default)]
    pub css: Option<String>,
    /// XPath locator candidate
    pub xpath: String,
    /// `id` attribute
    #[serde(default)]
    pub id: Option<String>,
    /// Space-separated class list
    #[serde(default)]
    pub classes: Option<String>,
    /// `name` attribute
    #[serde(default)]
    pub name: Option<String>,
    /// `aria-label` attribute
    #[serde(default, rename = "ariaLabel")]
    pub aria_label: Option<String>,
    /// Visible text, at most [`MAX_CLICK_TEXT_CHARS`] characters
    #[serde(default)]
    pub text: String,
}

impl ClickPayload {
    /// Build a click payload from an in-page element snapshot
    pub fn from_snapshot(snapshot: &ElementSnapshot) -> Self {
        let locator = LocatorSynthesizer::synthesize(snapshot);
        let classes = if snapshot.classes.is_empty() {
            None
        } else {
            Some(snapshot.classes.join(" "))
        };

        Self {
            tag: snapshot.tag.to_ascii_lowercase(),
            css: locator.css,
            xpath: locator.xpath,
            id: snapshot.id.clone().filter(|s| !s.is_empty()),
            classes,
            name: snapshot.name.clone(),
            aria_label: snapshot.aria_label.clone(),
            text: truncate_chars(&snapshot.text, MAX_CLICK_TEXT_CHARS),
        }
    }

    /// The locator recorded for this click
    pub fn locator(&self) -> Locator {
        Locator {
            css: self.css.clone(),
            xpath: self.xpath.clone(),
        }
    }
}

/// Payload of a key press. Only the key identity is kept, no modifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeydownPayload {
    /// `KeyboardEvent.key`
    pub key: String,
}

/// Payload of a `dom_event`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DomEventPayload {
    /// Mouse click
    Click(ClickPayload),
    /// Key press
    Keydown(KeydownPayload),
}

/// Payload of an `error` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Failure description
    pub message: String,
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// See [`NavigatedPayload`]
    Navigated(NavigatedPayload),
    /// See [`PageLoadPayload`]
    PageLoad(PageLoadPayload),
    /// See [`DomEventPayload`]
    DomEvent(DomEventPayload),
    /// See [`ErrorPayload`]
    Error(ErrorPayload),
}

impl Payload {
    /// The type tag matching this payload
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::Navigated(_) => EventType::Navigated,
            Payload::PageLoad(_) => EventType::PageLoad,
            Payload::DomEvent(_) => EventType::DomEvent,
            Payload::Error(_) => EventType::Error,
        }
    }
}

/// One captured event. Created once at capture time, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct SessionEvent {
    /// Session identifier, constant across a log
    pub session_id: String,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Typed payload
    pub payload: Payload,
}

impl SessionEvent {
    /// Create an event stamped with the current time
    pub fn now<S: Into<String>>(session_id: S, payload: Payload) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The event's type tag
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Shorthand for a `navigated` event
    pub fn navigated<S: Into<String>>(session_id: S, url: &str, title: Option<String>) -> Self {
        Self::now(
            session_id,
            Payload::Navigated(NavigatedPayload {
                url: url.to_string(),
                title,
            }),
        )
    }

    /// Shorthand for a `page_load` event
    pub fn page_load<S: Into<String>>(session_id: S, title: Option<String>) -> Self {
        Self::now(session_id, Payload::PageLoad(PageLoadPayload { title }))
    }

    /// Shorthand for a click `dom_event`
    pub fn click<S: Into<String>>(session_id: S, snapshot: &ElementSnapshot) -> Self {
        Self::now(
            session_id,
            Payload::DomEvent(DomEventPayload::Click(ClickPayload::from_snapshot(snapshot))),
        )
    }

    /// Shorthand for a keydown `dom_event`
    pub fn keydown<S: Into<String>>(session_id: S, key: &str) -> Self {
        Self::now(
            session_id,
            Payload::DomEvent(DomEventPayload::Keydown(KeydownPayload {
                key: key.to_string(),
            })),
        )
    }

    /// Shorthand for an `error` event
    pub fn error<S: Into<String>, M: Into<String>>(session_id: S, message: M) -> Self {
        Self::now(
            session_id,
            Payload::Error(ErrorPayload {
                message: message.into(),
            }),
        )
    }
}

/// Wire form of [`SessionEvent`]
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    session_id: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    event_type: EventType,
    payload: Value,
}

impl TryFrom<RawEvent> for SessionEvent {
    type Error = SessionLogError;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let RawEvent {
            session_id,
            timestamp,
            event_type,
            payload,
        } = raw;
        let invalid =
            |e: serde_json::Error| SessionLogError::InvalidEvent(format!("{:?}: {}", event_type, e));

        let payload = match event_type {
            EventType::Navigated => Payload::Navigated(serde_json::from_value(payload).map_err(invalid)?),
            EventType::PageLoad => Payload::PageLoad(serde_json::from_value(payload).map_err(invalid)?),
            EventType::DomEvent => Payload::DomEvent(serde_json::from_value(payload).map_err(invalid)?),
            EventType::Error => Payload::Error(serde_json::from_value(payload).map_err(invalid)?),
        };

        Ok(Self {
            session_id,
            timestamp,
            payload,
        })
    }
}

impl From<SessionEvent> for RawEvent {
    fn from(event: SessionEvent) -> Self {
        let event_type = event.event_type();
        let payload = match event.payload {
            Payload::Navigated(p) => serde_json::to_value(p),
            Payload::PageLoad(p) => serde_json::to_value(p),
            Payload::DomEvent(p) => serde_json::to_value(p),
            Payload::Error(p) => serde_json::to_value(p),
        }
        .unwrap_or(Value::Null);

        Self {
            session_id: event.session_id,
            timestamp: event.timestamp,
            event_type,
            payload,
        }
    }
}

/// Parse an RFC 3339 timestamp, reading one without an offset as UTC
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Keep at most `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::PathSegment;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_keydown_wire_shape() {
        let event = SessionEvent::keydown("s1", "Enter");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["type"], "dom_event");
        assert_eq!(value["payload"]["kind"], "keydown");
        assert_eq!(value["payload"]["key"], "Enter");
        assert!(value["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_click_wire_shape() {
        let snap = ElementSnapshot {
            tag: "BUTTON".to_string(),
            id: Some("go".to_string()),
            classes: vec!["btn".into(), "primary".into()],
            aria_label: Some("Go".to_string()),
            text: "Go".to_string(),
            path: vec![PathSegment::new("BUTTON", 1), PathSegment::new("BODY", 1)],
            ..Default::default()
        };
        let event = SessionEvent::click("s1", &snap);
        let value = serde_json::to_value(&event).unwrap();
        let payload = &value["payload"];

        assert_eq!(payload["kind"], "click");
        assert_eq!(payload["tag"], "button");
        assert_eq!(payload["css"], "#go");
        assert_eq!(payload["xpath"], "/BODY[1]/BUTTON[1]");
        assert_eq!(payload["classes"], "btn primary");
        assert_eq!(payload["ariaLabel"], "Go");
        assert!(payload["name"].is_null());
    }

    #[test]
    fn test_parse_navigated_line() {
        let line = r#"{"session_id":"abc","timestamp":"2024-05-01T10:00:00.000Z","type":"navigated","payload":{"url":"https://example.com/","title":"Example"}}"#;
        let event: SessionEvent = serde_json::from_str(line).unwrap();

        assert_eq!(event.event_type(), EventType::Navigated);
        match event.payload {
            Payload::Navigated(p) => {
                assert_eq!(p.url, "https://example.com/");
                assert_eq!(p.title.as_deref(), Some("Example"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_parse_page_load_null_title() {
        let line = r#"{"session_id":"abc","timestamp":"2024-05-01T10:00:00Z","type":"page_load","payload":{"title":null}}"#;
        let event: SessionEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.payload, Payload::PageLoad(PageLoadPayload { title: None }));
    }

    #[test]
    fn test_timestamp_without_offset_is_utc() {
        use chrono::TimeZone;

        let line = r#"{"session_id":"abc","timestamp":"2024-05-01T10:00:00","type":"page_load","payload":{"title":null}}"#;
        let event: SessionEvent = serde_json::from_str(line).unwrap();
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());

        let offset = r#"{"session_id":"abc","timestamp":"2024-05-01T12:00:00+02:00","type":"page_load","payload":{"title":null}}"#;
        let event: SessionEvent = serde_json::from_str(offset).unwrap();
        assert_eq!(event.timestamp, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());

        let garbage = r#"{"session_id":"abc","timestamp":"yesterday","type":"page_load","payload":{"title":null}}"#;
        assert!(serde_json::from_str::<SessionEvent>(garbage).is_err());
    }

    #[test]
    fn test_type_payload_mismatch_rejected() {
        let line = r#"{"session_id":"abc","timestamp":"2024-05-01T10:00:00Z","type":"navigated","payload":{"kind":"keydown","key":"a"}}"#;
        assert!(serde_json::from_str::<SessionEvent>(line).is_err());
    }

    #[test]
    fn test_unknown_dom_kind_rejected() {
        let line = r#"{"session_id":"abc","timestamp":"2024-05-01T10:00:00Z","type":"dom_event","payload":{"kind":"scroll"}}"#;
        assert!(serde_json::from_str::<SessionEvent>(line).is_err());
    }

    #[test]
    fn test_click_text_truncated() {
        let snap = ElementSnapshot {
            tag: "p".to_string(),
            text: "é".repeat(300),
            ..Default::default()
        };
        let payload = ClickPayload::from_snapshot(&snap);
        assert_eq!(payload.text.chars().count(), MAX_CLICK_TEXT_CHARS);
    }

    #[test]
    fn test_truncate_chars_short_input() {
        assert_eq!(truncate_chars("abc", 120), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_click_locator_roundtrip() {
        let snap = ElementSnapshot {
            tag: "a".to_string(),
            classes: vec!["nav".into()],
            path: vec![PathSegment::new("A", 4)],
            ..Default::default()
        };
        let payload = ClickPayload::from_snapshot(&snap);
        let locator = payload.locator();
        assert_eq!(locator.css.as_deref(), Some("a.nav"));
        assert_eq!(locator.xpath, "/A[4]");
    }
}
