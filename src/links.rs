//! Link extraction from free-form text.

use crate::types::Reference;
use regex::Regex;
use std::sync::OnceLock;

/// URL token grammar: scheme followed by path-ish characters, with an
/// optional `:port` part.
const LINK_PATTERN: &str = r"https?://[\w./?=&%-]+(?::\d+[\w./?=&%-]*)?";

fn link_regex() -> &'static Regex {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    LINK_RE.get_or_init(|| Regex::new(LINK_PATTERN).expect("link pattern is valid"))
}

/// Extracts every link from `text`, left to right.
///
/// Duplicates are kept: a link pasted twice is processed twice. `None` and
/// text without links both yield an empty list.
///
/// # Example
///
/// ```
/// use linkbundle::extract_links;
///
/// let refs = extract_links(Some("check https://x.example/a and https://x.example/b"));
/// assert_eq!(refs.len(), 2);
/// assert_eq!(refs[0].as_str(), "https://x.example/a");
/// ```
pub fn extract_links(text: Option<&str>) -> Vec<Reference> {
    let Some(text) = text else {
        return Vec::new();
    };
    link_regex()
        .find_iter(text)
        .map(|m| Reference(m.as_str().to_string()))
        .collect()
}

#[cfg(test)]
impl Reference {
    /// Parses a single link, accepting it only if the whole string matches the
    /// link grammar.
    pub(crate) fn parse(candidate: &str) -> Option<Reference> {
        let candidate = candidate.trim();
        link_regex()
            .find(candidate)
            .filter(|m| m.start() == 0 && m.end() == candidate.len())
            .map(|m| Reference(m.as_str().to_string()))
    }
}
