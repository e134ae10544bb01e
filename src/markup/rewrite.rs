//! Rule-Based Rewriter - apply a [`RuleTable`] to one message's text
//!
//! # Nesting
//!
//! With [`NestingPolicy::InnermostFirst`] (the default) the text is read once,
//! left to right, keeping a stack of open ruled tags. A closing tag pairs with
//! the nearest open tag of the same name; anything opened after that tag and
//! still open becomes plain text of the pair. Nested tags are therefore
//! rewritten inside-out and the outer block receives the already-rendered
//! inner block as its content. Generated markup is never scanned again.
//!
//! [`NestingPolicy::DeclaredOrder`] keeps the legacy behaviour: one
//! non-greedy pass per rule in table order. Nested tags of a later rule end
//! up inside earlier blocks and may produce malformed markup.
//!
//! # Clean-up
//!
//! Leftover markers of known tags that have no rule are stripped
//! ([`StripPolicy::KnownTags`]), or every leftover tag is
//! ([`StripPolicy::AllTags`]). Markers of ruled tags that failed to pair are
//! left alone. Void-element rules run before the strip.
//!
//! HTML output escapes everything that is not generated markup, so message
//! text can never inject elements into the document. Markdown output is
//! instead normalized (blank-line collapsing, headers on their own paragraph,
//! trimmed).

use super::counter::{block_id, TagCounters};
use super::rules::{parse_attributes, OutputFormat, RenderContext, RuleTable, StripPolicy, TagRule};
use crate::util::escape_html;
use regex::{Captures, Match, Regex};
use serde::Deserialize;

/// Default cap on message size (bytes); larger messages are not rewritten
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 2 * 1024 * 1024;

/// Order in which nested tags are rewritten
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NestingPolicy {
    /// Inside-out, in document order
    #[default]
    InnermostFirst,
    /// One pass per rule in declared order
    DeclaredOrder,
}

impl NestingPolicy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "declared-order" | "declared" => Self::DeclaredOrder,
            _ => Self::InnermostFirst,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InnermostFirst => "innermost-first",
            Self::DeclaredOrder => "declared-order",
        }
    }
}

/// A block produced by a block-style rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedBlock {
    /// Block id (`{tag}-{n}`), unique within one message
    pub id: String,
    pub tag: String,
    pub title: String,
    /// Trimmed inner content as placed in the block body (escaped for HTML)
    pub body: String,
    pub copyable: bool,
    /// Body hidden until toggled
    pub collapsed: bool,
}

/// Result of one rewrite pass
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub text: String,
    /// Whether a rule or the fallback strip touched the input
    pub changed: bool,
    /// Number of tag pairs replaced by rules
    pub replaced: usize,
    /// Number of leftover markers removed by the fallback strip
    pub stripped: usize,
    /// Blocks generated during the pass, in creation order
    pub blocks: Vec<GeneratedBlock>,
}

impl RewriteOutcome {
    pub fn block(&self, id: &str) -> Option<&GeneratedBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }
}

/// A ruled opening tag still waiting for its closing tag
struct OpenTag<'t> {
    tag: String,
    /// The opening tag as written
    marker: &'t str,
    attributes: Vec<(String, String)>,
    /// Output produced since the opening tag
    buffer: String,
}

/// Where output goes right now: the innermost open tag, or the top level
fn innermost<'a>(open: &'a mut [OpenTag<'_>], root: &'a mut String) -> &'a mut String {
    match open.last_mut() {
        Some(tag) => &mut tag.buffer,
        None => root,
    }
}

/// Compiled rewriter for one rule table
#[derive(Debug, Clone)]
pub struct Rewriter {
    table: RuleTable,
    nesting: NestingPolicy,
    max_message_bytes: usize,
    /// `<name ...>` or `</name>` for any ruled name (None when the table is empty)
    markers: Option<Regex>,
    /// Whole-pair patterns per ruled name, declared order
    pairs: Vec<(String, Regex)>,
    /// Fallback strip (None when there is nothing to strip)
    strip: Option<Regex>,
    /// Escape text that is not generated markup
    escape: bool,
    markdown: Option<MarkdownCleanup>,
}

impl Rewriter {
    /// Compile `table`; known tags without a rule are stripped after the rules
    pub fn new<S: AsRef<str>>(
        table: RuleTable,
        known_tags: &[S],
        nesting: NestingPolicy,
        max_message_bytes: usize,
    ) -> anyhow::Result<Self> {
        let ruled: Vec<String> = table.ruled_tags().iter().map(|t| t.to_string()).collect();

        let markers = if ruled.is_empty() {
            None
        } else {
            let names = alternation(&ruled);
            Some(Regex::new(&format!(
                r"(?i)<(?:/\s*(?P<close>{0})\s*|(?P<open>{0})(?P<attrs>\s[^<>]*)?)>",
                names
            ))?)
        };

        let mut pairs = Vec::with_capacity(ruled.len());
        for tag in &ruled {
            let name = regex::escape(tag);
            pairs.push((
                tag.clone(),
                Regex::new(&format!(r"(?is)<{0}(\s[^<>]*)?>(.*?)</\s*{0}\s*>", name))?,
            ));
        }

        let strip = match table.strip_policy() {
            StripPolicy::AllTags => Some(Regex::new(r"</?[A-Za-z!?][^<>]*>")?),
            StripPolicy::KnownTags => {
                // Known but unhandled: ruled tags that failed to pair stay put
                let mut names: Vec<String> = Vec::new();
                for tag in known_tags {
                    let tag = tag.as_ref().trim().to_ascii_lowercase();
                    if !tag.is_empty() && !ruled.contains(&tag) && !names.contains(&tag) {
                        names.push(tag);
                    }
                }
                if names.is_empty() {
                    None
                } else {
                    Some(Regex::new(&format!(
                        r"(?i)</?(?:{})(?:\s[^<>]*)?/?>",
                        alternation(&names)
                    ))?)
                }
            }
        };

        let (escape, markdown) = match table.format() {
            OutputFormat::Markdown => (false, Some(MarkdownCleanup::new()?)),
            OutputFormat::Html => (true, None),
        };

        Ok(Self {
            table,
            nesting,
            max_message_bytes,
            markers,
            pairs,
            strip,
            escape,
            markdown,
        })
    }

    pub fn nesting(&self) -> NestingPolicy {
        self.nesting
    }

    /// Run one rewrite pass over `text`
    ///
    /// `counters` must be reset by the caller at the start of each message's
    /// processing pass.
    pub fn rewrite(&self, text: &str, counters: &mut TagCounters) -> anyhow::Result<RewriteOutcome> {
        self.rewrite_scoped(text, None, counters)
    }

    /// Like [`rewrite`](Self::rewrite), with the element ids written into the
    /// output prefixed by `scope` so several messages can share a document.
    /// [`GeneratedBlock::id`] stays unprefixed.
    pub fn rewrite_scoped(
        &self,
        text: &str,
        scope: Option<&str>,
        counters: &mut TagCounters,
    ) -> anyhow::Result<RewriteOutcome> {
        if self.max_message_bytes > 0 && text.len() > self.max_message_bytes {
            anyhow::bail!(
                "message is {} bytes, over the {} byte rewrite limit",
                text.len(),
                self.max_message_bytes
            );
        }

        let mut outcome = RewriteOutcome::default();
        let mut current = match self.nesting {
            NestingPolicy::InnermostFirst => self.apply_innermost(text, scope, counters, &mut outcome),
            NestingPolicy::DeclaredOrder => self.apply_declared(text, scope, counters, &mut outcome),
        };

        if self.escape {
            // Literal text was cleaned up and escaped during the pass
            outcome.changed = outcome.replaced > 0 || outcome.stripped > 0;
        } else {
            for rule in self.table.void_rules() {
                if rule.pattern.is_match(&current) {
                    current = rule
                        .pattern
                        .replace_all(&current, rule.replacement.as_str())
                        .into_owned();
                }
            }
            if let Some(strip) = &self.strip {
                outcome.stripped = strip.find_iter(&current).count();
                if outcome.stripped > 0 {
                    current = strip.replace_all(&current, "").into_owned();
                }
            }
            if let Some(cleanup) = &self.markdown {
                current = cleanup.apply(&current);
            }
            outcome.changed = current != text;
        }

        outcome.text = current;
        Ok(outcome)
    }

    /// Prepare text that belongs to no tag pair for output
    ///
    /// Identity for Markdown, whose clean-up runs over the whole result.
    fn literal(&self, segment: &str, outcome: &mut RewriteOutcome) -> String {
        if !self.escape {
            return segment.to_string();
        }
        let mut text = std::borrow::Cow::Borrowed(segment);
        for rule in self.table.void_rules() {
            if rule.pattern.is_match(&text) {
                text = rule
                    .pattern
                    .replace_all(&text, rule.replacement.as_str())
                    .into_owned()
                    .into();
            }
        }
        if let Some(strip) = &self.strip {
            let found = strip.find_iter(&text).count();
            if found > 0 {
                outcome.stripped += found;
                text = strip.replace_all(&text, "").into_owned().into();
            }
        }
        escape_html(&text)
    }

    fn attributes(&self, raw: Option<Match>) -> Vec<(String, String)> {
        let mut attributes = raw.map(|m| parse_attributes(m.as_str())).unwrap_or_default();
        if self.escape {
            for (_, value) in attributes.iter_mut() {
                *value = escape_html(value);
            }
        }
        attributes
    }

    fn apply_innermost(
        &self,
        text: &str,
        scope: Option<&str>,
        counters: &mut TagCounters,
        outcome: &mut RewriteOutcome,
    ) -> String {
        let Some(markers) = &self.markers else {
            return self.literal(text, outcome);
        };

        let mut root = String::with_capacity(text.len());
        let mut open: Vec<OpenTag> = Vec::new();
        let mut last = 0;

        for caps in markers.captures_iter(text) {
            let Some(marker) = caps.get(0) else {
                continue;
            };
            let before = self.literal(&text[last..marker.start()], outcome);
            innermost(&mut open, &mut root).push_str(&before);
            last = marker.end();

            if let Some(name) = caps.name("open") {
                let attrs = caps.name("attrs");
                if is_self_closing(attrs) {
                    let kept = self.literal(marker.as_str(), outcome);
                    innermost(&mut open, &mut root).push_str(&kept);
                } else {
                    open.push(OpenTag {
                        tag: name.as_str().to_ascii_lowercase(),
                        marker: marker.as_str(),
                        attributes: self.attributes(attrs),
                        buffer: String::new(),
                    });
                }
                continue;
            }

            let tag = caps
                .name("close")
                .map(|m| m.as_str().to_ascii_lowercase())
                .unwrap_or_default();
            let depth = open.iter().rposition(|o| o.tag == tag);
            let (Some(depth), Some(rule)) = (depth, self.table.rule_for(&tag)) else {
                // Stray closing tag
                let kept = self.literal(marker.as_str(), outcome);
                innermost(&mut open, &mut root).push_str(&kept);
                continue;
            };

            let unclosed = open.split_off(depth + 1);
            let Some(mut pair) = open.pop() else {
                continue;
            };
            for inner in unclosed {
                self.unclosed(inner, &mut pair.buffer, outcome);
            }
            let content = pair.buffer.trim();
            let rendered = render_match(rule, content, content, &pair.attributes, scope, counters, outcome);
            innermost(&mut open, &mut root).push_str(&rendered);
        }

        let rest = self.literal(&text[last..], outcome);
        innermost(&mut open, &mut root).push_str(&rest);
        for tag in open {
            self.unclosed(tag, &mut root, outcome);
        }
        root
    }

    /// An opening tag that never closed goes out as text
    fn unclosed(&self, tag: OpenTag, out: &mut String, outcome: &mut RewriteOutcome) {
        out.push_str(&self.literal(tag.marker, outcome));
        out.push_str(&tag.buffer);
    }

    fn apply_declared(
        &self,
        text: &str,
        scope: Option<&str>,
        counters: &mut TagCounters,
        outcome: &mut RewriteOutcome,
    ) -> String {
        let mut current: String = if self.escape {
            text.chars().filter(|c| !is_shield(*c)).collect()
        } else {
            text.to_string()
        };

        for (tag, pattern) in &self.pairs {
            let Some(rule) = self.table.rule_for(tag) else {
                continue;
            };
            if !pattern.is_match(&current) {
                continue;
            }
            current = pattern
                .replace_all(&current, |caps: &Captures| {
                    if is_self_closing(caps.get(1)) {
                        return caps[0].to_string();
                    }
                    let attributes = self.attributes(caps.get(1));
                    let inner = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                    if !self.escape {
                        return render_match(rule, inner, inner, &attributes, scope, counters, outcome);
                    }
                    // Later passes and the final escape see the content but not the markup
                    let body = unshield(&escape_html(inner));
                    let rendered =
                        render_match(rule, CONTENT_SLOT, &body, &attributes, scope, counters, outcome);
                    shield(&rendered).replace(CONTENT_SLOT, inner)
                })
                .into_owned();
        }

        if self.escape {
            unshield(&self.literal(&current, outcome))
        } else {
            current
        }
    }
}

fn render_match(
    rule: &TagRule,
    content: &str,
    body: &str,
    attributes: &[(String, String)],
    scope: Option<&str>,
    counters: &mut TagCounters,
    outcome: &mut RewriteOutcome,
) -> String {
    let index = counters.next(&rule.tag);
    let ctx = RenderContext {
        tag: &rule.tag,
        content,
        attributes,
        index,
        scope,
    };
    let rendered = rule.render.render(&ctx);

    if let Some(style) = rule.render.block_style() {
        outcome.blocks.push(GeneratedBlock {
            id: block_id(&rule.tag, index),
            tag: rule.tag.clone(),
            title: style.title.clone(),
            body: body.to_string(),
            copyable: style.copyable,
            collapsed: style.collapsed,
        });
    }
    outcome.replaced += 1;
    rendered
}

/// `<name .../>` never opens a block
fn is_self_closing(attrs: Option<Match>) -> bool {
    attrs.is_some_and(|attrs| attrs.as_str().trim_end().ends_with('/'))
}

// Generated markup in declared-order passes is held in private-use
// characters until the final escape has run.
const SHIELD: [(char, char); 5] = [
    ('<', '\u{E000}'),
    ('>', '\u{E001}'),
    ('&', '\u{E002}'),
    ('"', '\u{E003}'),
    ('\'', '\u{E004}'),
];
const CONTENT_SLOT: &str = "\u{E005}";

fn is_shield(c: char) -> bool {
    ('\u{E000}'..='\u{E005}').contains(&c)
}

fn shield(markup: &str) -> String {
    markup
        .chars()
        .map(|c| SHIELD.iter().find(|(plain, _)| *plain == c).map_or(c, |(_, s)| *s))
        .collect()
}

fn unshield(text: &str) -> String {
    text.chars()
        .map(|c| SHIELD.iter().find(|(_, s)| *s == c).map_or(c, |(plain, _)| *plain))
        .collect()
}

fn alternation(names: &[String]) -> String {
    names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|")
}

/// Post-processing for Markdown output
#[derive(Debug, Clone)]
struct MarkdownCleanup {
    excess_newlines: Regex,
    inline_header: Regex,
    tight_header: Regex,
}

impl MarkdownCleanup {
    fn new() -> anyhow::Result<Self> {
        Ok(Self {
            excess_newlines: Regex::new(r"\n{3,}")?,
            inline_header: Regex::new(r"([^\n#\s])[ \t]*(###)")?,
            tight_header: Regex::new(r"([^\n])\n(###)")?,
        })
    }

    fn apply(&self, text: &str) -> String {
        let text = self.excess_newlines.replace_all(text, "\n\n");
        let text = self.inline_header.replace_all(&text, "$1\n\n$2");
        let text = self.tight_header.replace_all(&text, "$1\n\n$2");
        let text = self.excess_newlines.replace_all(&text, "\n\n");
        text.trim().to_string()
    }
}
