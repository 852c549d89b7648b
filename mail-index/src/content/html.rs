//! HTML body to searchable text
//!
//! Quoted reply history is removed before conversion so that a long thread
//! does not index the same text once per message. Link targets and images
//! carry no searchable content and are dropped as well.

use regex::Regex;
use std::sync::OnceLock;

/// Class names mail clients put on previously-quoted content
const QUOTE_CLASS_MARKERS: &[&str] = &["gmail_quote", "protonmail_quote", "mail-quoted"];

/// Elements that never have a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const TEXT_WIDTH: usize = 200;

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| {
        // Quoted attribute values may contain '>'
        Regex::new(
            r#"(?s)<!--.*?-->|<(/?)([a-zA-Z][a-zA-Z0-9:-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#,
        )
        .expect("valid tag regex")
    })
}

fn class_pattern() -> &'static Regex {
    static CLASS: OnceLock<Regex> = OnceLock::new();
    CLASS.get_or_init(|| {
        Regex::new(r#"(?i)\bclass\s*=\s*["']([^"']*)["']"#).expect("valid class regex")
    })
}

fn cite_pattern() -> &'static Regex {
    static CITE: OnceLock<Regex> = OnceLock::new();
    CITE.get_or_init(|| Regex::new(r#"(?i)\btype\s*=\s*["']?cite\b"#).expect("valid cite regex"))
}

fn data_quoted_pattern() -> &'static Regex {
    static DATA_QUOTED: OnceLock<Regex> = OnceLock::new();
    DATA_QUOTED.get_or_init(|| Regex::new(r"(?i)\bdata-quoted\b").expect("valid attribute regex"))
}

fn is_quoted(name: &str, attrs: &str) -> bool {
    if name == "blockquote" && cite_pattern().is_match(attrs) {
        return true;
    }
    if data_quoted_pattern().is_match(attrs) {
        return true;
    }
    class_pattern()
        .captures(attrs)
        .and_then(|caps| caps.get(1))
        .is_some_and(|classes| {
            classes
                .as_str()
                .split_whitespace()
                .any(|class| QUOTE_CLASS_MARKERS.iter().any(|marker| class.contains(marker)))
        })
}

/// Remove quoted sub-trees, anchors (keeping their text), images and comments
pub fn strip_html_noise(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    // Name and nesting depth of the quoted element being skipped
    let mut skipping: Option<(String, usize)> = None;

    for caps in tag_pattern().captures_iter(html) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if skipping.is_none() {
            out.push_str(&html[last..whole.start()]);
        }
        last = whole.end();

        // Comments have no tag name
        let Some(name) = caps.get(2) else {
            continue;
        };
        let name = name.as_str().to_ascii_lowercase();
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        let attrs = caps.get(3).map_or("", |m| m.as_str());
        let self_closing =
            attrs.trim_end().ends_with('/') || VOID_ELEMENTS.contains(&name.as_str());

        if let Some((skip_name, mut depth)) = skipping.take() {
            if name == skip_name && !self_closing {
                if closing {
                    depth -= 1;
                } else {
                    depth += 1;
                }
            }
            if depth > 0 {
                skipping = Some((skip_name, depth));
            }
            continue;
        }

        if !closing && !self_closing && is_quoted(&name, attrs) {
            skipping = Some((name, 1));
            continue;
        }

        if name == "a" || name == "img" {
            continue;
        }

        out.push_str(whole.as_str());
    }

    if skipping.is_none() {
        out.push_str(&html[last..]);
    }
    out
}

fn strip_all_tags(html: &str) -> String {
    tag_pattern().replace_all(html, " ").into_owned()
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Convert an HTML body into plain searchable text
pub fn html_to_search_text(html: &str) -> String {
    let cleaned = strip_html_noise(html);
    let text = html2text::from_read(cleaned.as_bytes(), TEXT_WIDTH)
        .unwrap_or_else(|_| strip_all_tags(&cleaned));
    normalize_whitespace(&text)
}
