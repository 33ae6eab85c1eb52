//! Caption overlay scripts
//!
//! The overlay is a single fixed-position node at the bottom of the viewport.
//! It ignores pointer events so it never intercepts a replayed click.

/// DOM id of the overlay node
pub const OVERLAY_ELEMENT_ID: &str = "__rk_replay_caption";

const SHOW_TEMPLATE: &str = r#"
    (() => {
        const text = __TEXT__;
        let el = document.getElementById('__ID__');
        if (!el) {
            el = document.createElement('div');
            el.id = '__ID__';
            el.setAttribute('aria-hidden', 'true');
            Object.assign(el.style, {
                position: 'fixed',
                left: '50%',
                bottom: '24px',
                transform: 'translateX(-50%)',
                maxWidth: '80vw',
                padding: '8px 14px',
                borderRadius: '6px',
                background: 'rgba(0, 0, 0, 0.75)',
                color: '#fff',
                font: '16px/1.4 system-ui, sans-serif',
                textAlign: 'center',
                pointerEvents: 'none',
                zIndex: '2147483647'
            });
            (document.body || document.documentElement).appendChild(el);
        }
        el.textContent = text;
        return true;
    })()
"#;

const REMOVE_TEMPLATE: &str = r#"
    (() => {
        const el = document.getElementById('__ID__');
        if (el) el.remove();
        return true;
    })()
"#;

/// Builds the scripts that manage the caption overlay
pub struct OverlayScript;

impl OverlayScript {
    /// Script creating the overlay if needed and setting its text
    pub fn show(text: &str) -> String {
        // A JSON string is a valid JS string literal.
        let literal = serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string());
        SHOW_TEMPLATE
            .replace("__ID__", OVERLAY_ELEMENT_ID)
            .replace("__TEXT__", &literal)
    }

    /// Script removing the overlay if present
    pub fn remove() -> String {
        REMOVE_TEMPLATE.replace("__ID__", OVERLAY_ELEMENT_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_show_embeds_text_as_literal() {
        let script = OverlayScript::show("Hello");
        assert!(script.contains(r#"const text = "Hello";"#));
        assert!(script.contains(OVERLAY_ELEMENT_ID));
        assert!(!script.contains("__ID__"));
    }

    #[test]
    fn test_show_escapes_quotes_and_newlines() {
        let script = OverlayScript::show("it's \"quoted\"\n</script>");
        assert!(script.contains(r#""it's \"quoted\"\n</script>""#));
    }

    #[test]
    fn test_show_does_not_intercept_clicks() {
        assert!(OverlayScript::show("x").contains("pointerEvents: 'none'"));
    }

    #[test]
    fn test_remove_targets_overlay() {
        let script = OverlayScript::remove();
        assert!(script.contains(OVERLAY_ELEMENT_ID));
        assert!(script.contains("el.remove()"));
    }
}
