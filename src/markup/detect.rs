//! Tag Detector - decide whether a text blob looks like pseudo-XML
//!
//! Detection is only a gate in front of the rewrite pass, so it errs on the
//! side of saying yes: a false positive costs one no-op rewrite, a false
//! negative leaves markup unrendered.
//!
//! # Predicates
//!
//! Evaluated in priority order, first hit wins:
//!
//! 1. [`has_xml_marker`] - `<?xml` prolog or `<!DOCTYPE`
//! 2. [`Detector::has_known_tag`] - `<name` / `</name` for a name in the known tag set
//! 3. [`has_matching_pair`] - any `<name ...>` later closed by `</name>` (permissive only)
//! 4. [`has_balanced_nesting`] - balanced, nested generic tags (permissive only)
//!
//! # Precondition
//!
//! Input must already be entity-decoded. `&lt;thinking&gt;` never matches;
//! callers that read escaped text should run [`decode_entities`] first.

use regex::Regex;
use serde::Deserialize;

/// Default vocabulary of tag names that trigger detection
pub const DEFAULT_KNOWN_TAGS: &[&str] = &[
    // Document structure
    "document",
    "section",
    "content",
    // Citation workflows
    "endnote_library",
    "text_with_citations",
    "converted_text",
    "unmatched_citations",
    "notes",
    // Generic content
    "output",
    "result",
    "response",
    "data",
    "code",
    "example",
    "summary",
    "details",
    // Analysis
    "analysis",
    "evaluation",
    "recommendation",
    // Status
    "error",
    "warning",
    "status",
    "message",
    // Assistant output
    "thinking",
    "antthinking",
    "function_calls",
    "invoke",
    "parameter",
    "function_results",
    "search_results",
    "search_quality_reflection",
    "search_quality_score",
    "result_reflection",
    "assistant_profile",
    "system-reminder",
    "artifact",
];

/// How much structure the detector is willing to guess at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorMode {
    /// Prolog/doctype and known tags only; text without a known tag name is
    /// never accepted
    #[default]
    Strict,
    /// Also accept generic open/close pairs and balanced nesting
    Permissive,
}

impl DetectorMode {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "permissive" => Self::Permissive,
            _ => Self::Strict,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Permissive => "permissive",
        }
    }
}

/// Which predicate accepted the text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    XmlMarker,
    KnownTag,
    MatchingPair,
    BalancedNesting,
}

impl Detection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::XmlMarker => "xml-marker",
            Self::KnownTag => "known-tag",
            Self::MatchingPair => "matching-pair",
            Self::BalancedNesting => "balanced-nesting",
        }
    }
}

/// Compiled detection gate
#[derive(Debug, Clone)]
pub struct Detector {
    mode: DetectorMode,
    known_tags: Vec<String>,
    known_tag_pattern: Regex,
    structure: StructurePatterns,
}

impl Detector {
    /// Build a detector for `known_tags` (names are matched case-insensitively)
    pub fn new<S: AsRef<str>>(known_tags: &[S], mode: DetectorMode) -> anyhow::Result<Self> {
        let mut names: Vec<String> = Vec::with_capacity(known_tags.len());
        for tag in known_tags {
            let tag = tag.as_ref().trim().to_ascii_lowercase();
            if !tag.is_empty() && !names.contains(&tag) {
                names.push(tag);
            }
        }
        if names.is_empty() {
            anyhow::bail!("known tag set is empty");
        }

        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let known_tag_pattern = Regex::new(&format!(r"(?i)</?(?:{})(?:\s|>|/>)", alternation))?;

        Ok(Self {
            mode,
            known_tags: names,
            known_tag_pattern,
            structure: StructurePatterns::new()?,
        })
    }

    /// Detector over [`DEFAULT_KNOWN_TAGS`] plus `extra` names
    pub fn with_defaults(extra: &[String], mode: DetectorMode) -> anyhow::Result<Self> {
        let mut tags: Vec<String> = DEFAULT_KNOWN_TAGS.iter().map(|s| s.to_string()).collect();
        tags.extend(extra.iter().cloned());
        Self::new(&tags, mode)
    }

    pub fn mode(&self) -> DetectorMode {
        self.mode
    }

    /// Known tag names, lowercased, in declaration order
    pub fn known_tags(&self) -> &[String] {
        &self.known_tags
    }

    /// Whether `text` plausibly contains markup worth rewriting
    ///
    /// `None` and empty input are "no markup".
    pub fn contains_markup(&self, text: Option<&str>) -> bool {
        self.matched_predicate(text).is_some()
    }

    /// The first predicate that accepts `text`, in priority order
    pub fn matched_predicate(&self, text: Option<&str>) -> Option<Detection> {
        let text = text.filter(|t| !t.is_empty())?;

        if has_xml_marker(text) {
            return Some(Detection::XmlMarker);
        }
        if self.has_known_tag(text) {
            return Some(Detection::KnownTag);
        }
        if self.mode == DetectorMode::Strict {
            return None;
        }
        if self.structure.has_matching_pair(text) {
            return Some(Detection::MatchingPair);
        }
        if self.structure.has_balanced_nesting(text) {
            return Some(Detection::BalancedNesting);
        }
        None
    }

    /// `<name` or `</name` for any known tag, followed by whitespace, `>` or `/>`
    pub fn has_known_tag(&self, text: &str) -> bool {
        self.known_tag_pattern.is_match(text)
    }
}

/// `<?xml` prolog or a doctype declaration
pub fn has_xml_marker(text: &str) -> bool {
    if text.contains("<?xml") {
        return true;
    }
    text.find("<!").is_some_and(|_| text.to_ascii_lowercase().contains("<!doctype"))
}

/// Any `<name ...>` that is later closed by a literal `</name>`
///
/// Convenience wrapper that compiles its patterns on every call; prefer
/// [`Detector`] in loops.
#[allow(dead_code)]
pub fn has_matching_pair(text: &str) -> bool {
    StructurePatterns::new()
        .map(|p| p.has_matching_pair(text))
        .unwrap_or(false)
}

/// At least two opening tags, as many closing tags, and one opening tag
/// directly nested in another
#[allow(dead_code)]
pub fn has_balanced_nesting(text: &str) -> bool {
    StructurePatterns::new()
        .map(|p| p.has_balanced_nesting(text))
        .unwrap_or(false)
}

/// Generic structural probes that do not depend on the known tag set
#[derive(Debug, Clone)]
struct StructurePatterns {
    opening_named: Regex,
    opening_any: Regex,
    closing_any: Regex,
    nested: Regex,
}

impl StructurePatterns {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            opening_named: Regex::new(r"<([A-Za-z_][A-Za-z0-9_.:\-]*)(?:\s[^<>]*)?>")?,
            opening_any: Regex::new(r"<[a-zA-Z][a-zA-Z0-9_]*[^>]*>")?,
            closing_any: Regex::new(r"</[a-zA-Z][a-zA-Z0-9_]*>")?,
            nested: Regex::new(r"<[a-zA-Z][a-zA-Z0-9_]*[^>]*>[^<]*<[a-zA-Z][a-zA-Z0-9_]*[^>]*>")?,
        })
    }

    // The regex crate has no backreferences, so the "same name" half of the
    // pair is checked by searching the remainder for the literal closing tag.
    fn has_matching_pair(&self, text: &str) -> bool {
        // ASCII lowercasing keeps byte offsets stable
        let lower = text.to_ascii_lowercase();
        self.opening_named.captures_iter(&lower).any(|caps| {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                return false;
            };
            if whole.as_str().ends_with("/>") {
                return false;
            }
            let closing = format!("</{}>", name.as_str());
            lower[whole.end()..].contains(&closing)
        })
    }

    fn has_balanced_nesting(&self, text: &str) -> bool {
        let opening = self.opening_any.find_iter(text).count();
        let closing = self.closing_any.find_iter(text).count();
        opening >= 2 && opening == closing && self.nested.is_match(text)
    }
}

/// Decode the handful of entities chat UIs use for angle-bracket text
///
/// Unknown entities are left as-is.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        match candidate.find(';').filter(|&end| end <= 10) {
            Some(end) => match decode_entity(&candidate[1..end]) {
                Some(ch) => {
                    out.push(ch);
                    rest = &candidate[end + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> Detector {
        Detector::with_defaults(&[], DetectorMode::Permissive).unwrap()
    }

    #[test]
    fn test_empty_and_missing_input() {
        let d = detector();
        assert!(!d.contains_markup(None));
        assert!(!d.contains_markup(Some("")));
    }

    #[test]
    fn test_plain_text_is_not_markup() {
        let d = detector();
        assert!(!d.contains_markup(Some("Just a regular answer with 3 < 4 and 5 > 2.")));
        assert!(!d.contains_markup(Some("Use `Vec<T>` for owned slices")));
    }

    #[test]
    fn test_xml_marker_wins_first() {
        let d = detector();
        assert_eq!(
            d.matched_predicate(Some("<?xml version=\"1.0\"?><root/>")),
            Some(Detection::XmlMarker)
        );
        assert_eq!(
            d.matched_predicate(Some("<!DOCTYPE html>")),
            Some(Detection::XmlMarker)
        );
    }

    #[test]
    fn test_known_tags_match_case_insensitively() {
        let d = detector();
        assert!(d.contains_markup(Some("before <thinking>hmm</thinking> after")));
        assert!(d.contains_markup(Some("<ERROR>boom</ERROR>")));
        assert!(d.contains_markup(Some("stray closing </function_calls>")));
        assert!(d.contains_markup(Some("<ASSISTANT_PROFILE version=\"2\">")));
        assert_eq!(
            d.matched_predicate(Some("<error>Request failed: 404</error>")),
            Some(Detection::KnownTag)
        );
    }

    #[test]
    fn test_known_tag_needs_boundary() {
        let d = Detector::with_defaults(&[], DetectorMode::Strict).unwrap();
        // "<errors>" is not "<error>"
        assert!(!d.contains_markup(Some("see <errors> list")));
    }

    #[test]
    fn test_unterminated_thinking_is_still_detected() {
        let d = detector();
        assert!(d.contains_markup(Some("<thinking>hello")));
    }

    #[test]
    fn test_matching_pair_only_in_permissive_mode() {
        let text = "<widget kind=\"x\">body</widget>";
        assert_eq!(detector().matched_predicate(Some(text)), Some(Detection::MatchingPair));

        let strict = Detector::with_defaults(&[], DetectorMode::Strict).unwrap();
        assert!(!strict.contains_markup(Some(text)));
    }

    #[test]
    fn test_default_mode_ignores_unknown_tags() {
        assert_eq!(DetectorMode::default(), DetectorMode::Strict);
        assert_eq!(DetectorMode::from_str("anything"), DetectorMode::Strict);
        assert_eq!(DetectorMode::from_str("Permissive"), DetectorMode::Permissive);

        let d = Detector::with_defaults(&[], DetectorMode::default()).unwrap();
        assert!(!d.contains_markup(Some("<widget>x</widget>")));
        assert!(d.contains_markup(Some("<thinking>x</thinking>")));
    }

    #[test]
    fn test_matching_pair_requires_same_name() {
        assert!(!has_matching_pair("<alpha>text</beta>"));
        assert!(has_matching_pair("<alpha>\nmulti\nline\n</alpha>"));
        assert!(!has_matching_pair("<alpha/> and </alpha>"));
    }

    #[test]
    fn test_balanced_nesting() {
        assert!(has_balanced_nesting("<a1><b2>x</b2></a1>"));
        assert!(!has_balanced_nesting("<a1>x</a1>"));
        assert!(!has_balanced_nesting("<a1><b2>x</b2>"));
    }

    #[test]
    fn test_extra_known_tags() {
        let d = Detector::with_defaults(&["Scratchpad".to_string()], DetectorMode::Strict).unwrap();
        assert!(d.known_tags().contains(&"scratchpad".to_string()));
        assert!(d.contains_markup(Some("<scratchpad>notes")));
    }

    #[test]
    fn test_empty_tag_set_is_rejected() {
        let empty: [&str; 0] = [];
        assert!(Detector::new(&empty, DetectorMode::Strict).is_err());
    }

    #[test]
    fn test_encoded_input_needs_decoding() {
        let d = Detector::with_defaults(&[], DetectorMode::Strict).unwrap();
        let encoded = "&lt;thinking&gt;hmm&lt;/thinking&gt;";
        assert!(!d.contains_markup(Some(encoded)));
        assert!(d.contains_markup(Some(&decode_entities(encoded))));
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a &amp;&amp; b"), "a && b");
        assert_eq!(decode_entities("&#60;x&#x3E;"), "<x>");
        assert_eq!(decode_entities("&unknown; & done"), "&unknown; & done");
        assert_eq!(decode_entities("no entities"), "no entities");
    }
}
