//! Locator synthesis
//!
//! At click time the in-page listener collects a small set of facts about the
//! clicked element (an [`ElementSnapshot`]). This module turns those facts into
//! a [`Locator`]: two independently derived candidates, a CSS selector and an
//! absolute XPath, so that replay can tolerate some DOM drift between capture
//! and replay.
//!
//! Synthesis is a pure function of the snapshot. The same element state always
//! yields the same locator.

use serde::{Deserialize, Serialize};

/// Maximum number of `tag:nth-of-type(n)` segments in a positional CSS chain
pub const MAX_CHAIN_DEPTH: usize = 4;

/// Class lists longer than this fall back to a positional chain
pub const MAX_SHORT_CLASSES: usize = 2;

/// JavaScript function collecting an [`ElementSnapshot`] for an element.
///
/// Evaluates to a function taking an element and returning a plain object that
/// deserializes into [`ElementSnapshot`].
pub const SNAPSHOT_FN: &str = r#"
    function (el) {
        const path = [];
        let node = el;
        while (node && node.nodeType === 1) {
            let nth = 1;
            let sib = node.previousElementSibling;
            while (sib) {
                if (sib.tagName === node.tagName) nth++;
                sib = sib.previousElementSibling;
            }
            path.push({ tag: node.tagName, nth: nth });
            node = node.parentElement;
        }
        const classes = typeof el.className === 'string'
            ? el.className.split(/\s+/).filter(Boolean)
            : Array.from(el.classList || []);
        return {
            tag: (el.tagName || '').toLowerCase(),
            id: el.id || null,
            classes: classes,
            name: el.getAttribute('name'),
            ariaLabel: el.getAttribute('aria-label'),
            text: (el.innerText || el.textContent || '').trim(),
            path: path
        };
    }
"#;

/// A resilient description of a DOM element, usable to re-find it later
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// CSS candidate, tried first
    pub css: Option<String>,
    /// Absolute XPath candidate, always present
    pub xpath: String,
}

/// One selector to try during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate<'a> {
    /// CSS selector
    Css(&'a str),
    /// XPath expression
    XPath(&'a str),
}

impl Candidate<'_> {
    /// The raw selector string
    pub fn as_str(&self) -> &str {
        match self {
            Candidate::Css(s) | Candidate::XPath(s) => s,
        }
    }
}

impl Locator {
    /// Candidates in replay priority order: CSS first, then XPath
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        let mut out = Vec::with_capacity(2);
        if let Some(css) = self.css.as_deref().filter(|s| !s.is_empty()) {
            out.push(Candidate::Css(css));
        }
        out.push(Candidate::XPath(&self.xpath));
        out
    }
}

/// One level of an element's ancestry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSegment {
    /// Tag name as reported by the DOM (`tagName`)
    pub tag: String,
    /// 1-based position among siblings sharing the same tag
    pub nth: u32,
}

impl PathSegment {
    /// Create a new segment
    pub fn new<S: Into<String>>(tag: S, nth: u32) -> Self {
        Self {
            tag: tag.into(),
            nth,
        }
    }
}

/// Facts about a clicked element, collected in-page by [`SNAPSHOT_FN`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    /// Lower-case tag name
    pub tag: String,
    /// `id` attribute
    #[serde(default)]
    pub id: Option<String>,
    /// Class list
    #[serde(default)]
    pub classes: Vec<String>,
    /// `name` attribute
    #[serde(default)]
    pub name: Option<String>,
    /// `aria-label` attribute
    #[serde(default)]
    pub aria_label: Option<String>,
    /// Visible text (untruncated)
    #[serde(default)]
    pub text: String,
    /// Ancestry, the element itself first and the document root last
    #[serde(default)]
    pub path: Vec<PathSegment>,
}

/// Builds [`Locator`]s from [`ElementSnapshot`]s
pub struct LocatorSynthesizer;

impl LocatorSynthesizer {
    /// Synthesize a locator for the snapshot
    pub fn synthesize(element: &ElementSnapshot) -> Locator {
        Locator {
            css: Self::css_for(element),
            xpath: Self::xpath_for(element),
        }
    }

    /// CSS candidate: id, else short class list, else positional chain
    fn css_for(element: &ElementSnapshot) -> Option<String> {
        if let Some(id) = element.id.as_deref().filter(|id| !id.is_empty()) {
            return Some(format!("#{}", css_escape(id)));
        }

        let tag = element.tag.to_ascii_lowercase();
        let classes: Vec<&str> = element
            .classes
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect();

        if !tag.is_empty() && (1..=MAX_SHORT_CLASSES).contains(&classes.len()) {
            let mut css = tag;
            for class in classes {
                css.push('.');
                css.push_str(&css_escape(class));
            }
            return Some(css);
        }

        Self::positional_chain(&element.path)
    }

    /// `tag:nth-of-type(n)` segments for the element and its nearest ancestors
    fn positional_chain(path: &[PathSegment]) -> Option<String> {
        let segments: Vec<String> = path
            .iter()
            .take(MAX_CHAIN_DEPTH)
            .filter(|seg| !seg.tag.is_empty())
            .map(|seg| {
                format!(
                    "{}:nth-of-type({})",
                    seg.tag.to_ascii_lowercase(),
                    seg.nth.max(1)
                )
            })
            .collect();

        if segments.is_empty() {
            return None;
        }

        Some(segments.into_iter().rev().collect::<Vec<_>>().join(" > "))
    }

    /// Absolute `/TAG[n]` path from the document root to the element
    fn xpath_for(element: &ElementSnapshot) -> String {
        let xpath: String = element
            .path
            .iter()
            .rev()
            .filter(|seg| !seg.tag.is_empty())
            .map(|seg| format!("/{}[{}]", seg.tag.to_ascii_uppercase(), seg.nth.max(1)))
            .collect();

        if !xpath.is_empty() {
            return xpath;
        }

        // No ancestry captured: fall back to a tag-only search.
        if element.tag.is_empty() {
            "//*".to_string()
        } else {
            format!("//{}", element.tag.to_ascii_uppercase())
        }
    }
}

/// Serialize an identifier the way CSSOM `CSS.escape()` does
pub fn css_escape(ident: &str) -> String {
    let chars: Vec<char> = ident.chars().collect();
    let mut out = String::with_capacity(ident.len());

    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if c == '\0' {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1F).contains(&code)
            || code == 0x7F
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{:x} ", code));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }

    out
}
