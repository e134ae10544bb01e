//! Tag rules - what each recognized tag turns into
//!
//! A [`RuleTable`] is an ordered list of `(tag, renderer)` pairs plus the
//! clean-up policy for whatever is left afterwards. Renderers are plain data
//! so tables can be cloned, printed, and loaded from TOML.
//!
//! # Example Config
//!
//! ```toml
//! [[rules]]
//! type = "block"
//! tag = "scratchpad"
//! title = "Scratchpad"
//! icon = "📝"
//! collapsed = true
//!
//! [[rules]]
//! type = "template"
//! tag = "cite"
//! template = "<span class=\"cite\">{content}</span>"
//! ```

use super::counter::block_id;
use crate::util::escape_html;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Output format and clean-up policy
// ============================================================================

/// What the rewrite pass produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Styled, collapsible HTML blocks
    #[default]
    Html,
    /// Plain Markdown
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "markdown" | "md" => Self::Markdown,
            _ => Self::Html,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
        }
    }
}

/// What happens to tag markers no rule consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripPolicy {
    /// Remove markers of known or ruled tags only (generated HTML survives)
    KnownTags,
    /// Remove anything that looks like a tag
    AllTags,
}

// ============================================================================
// Renderers
// ============================================================================

/// Look of a collapsible HTML block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStyle {
    /// Header text
    pub title: String,
    /// Glyph shown before the title
    pub icon: String,
    /// Whether the header carries a copy affordance
    pub copyable: bool,
    /// Whether the body starts hidden
    pub collapsed: bool,
    /// CSS modifier (`tr-block--{variant}`)
    pub variant: String,
}

impl BlockStyle {
    pub fn new(title: &str, icon: &str, variant: &str) -> Self {
        Self {
            title: title.to_string(),
            icon: icon.to_string(),
            copyable: false,
            collapsed: false,
            variant: variant.to_string(),
        }
    }

    pub fn copyable(mut self) -> Self {
        self.copyable = true;
        self
    }

    pub fn collapsed(mut self) -> Self {
        self.collapsed = true;
        self
    }
}

/// Glyph of the toggle button when the body is visible
pub const GLYPH_EXPANDED: &str = "▼";
/// Glyph of the toggle button when the body is hidden
pub const GLYPH_COLLAPSED: &str = "▶";
/// Glyph of the copy button at rest
pub const GLYPH_COPY: &str = "📋";

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Content,
    Id,
    Index,
    Tag,
    Attr(String),
}

/// User-supplied template with `{content}`, `{id}`, `{index}`, `{tag}` and
/// `{attr:NAME}` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template, rejecting unknown placeholders
    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            literal.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                // No closing brace: the rest is literal
                literal.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let name = &after[..close];
            let segment = match name {
                "content" => Segment::Content,
                "id" => Segment::Id,
                "index" => Segment::Index,
                "tag" => Segment::Tag,
                _ => match name.strip_prefix("attr:") {
                    Some(attr) if !attr.is_empty() => Segment::Attr(attr.to_ascii_lowercase()),
                    _ => anyhow::bail!("unknown placeholder {{{}}} in template {:?}", name, source),
                },
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(segment);
            rest = &after[close + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn render(&self, ctx: &RenderContext) -> String {
        let mut out = String::with_capacity(self.source.len() + ctx.content.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Content => out.push_str(ctx.content),
                Segment::Id => out.push_str(&ctx.id()),
                Segment::Index => out.push_str(&ctx.index.to_string()),
                Segment::Tag => out.push_str(ctx.tag),
                Segment::Attr(name) => out.push_str(ctx.attribute(name).unwrap_or("")),
            }
        }
        out
    }
}

/// How a matched tag is turned into output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renderer {
    /// Collapsible HTML block
    Block(BlockStyle),
    /// Markdown section: header line, blank line, content
    Heading { prefix: String },
    /// Content between two fixed strings
    Wrap { before: String, after: String },
    /// Markdown inline code, fenced when the content spans lines
    InlineCode,
    /// Markdown fenced code block (absorbs an inner inline-code rewrite)
    CodeBlock,
    /// Free-form template
    Template(Template),
}

/// Everything a renderer may look at
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// Tag name, lowercased
    pub tag: &'a str,
    /// Inner content, already trimmed
    pub content: &'a str,
    /// Attributes of the opening tag (names lowercased)
    pub attributes: &'a [(String, String)],
    /// 1-based occurrence of this tag within the pass
    pub index: u32,
    /// Prefix for element ids when several messages share one document
    pub scope: Option<&'a str>,
}

impl RenderContext<'_> {
    /// Element id of the generated block
    pub fn id(&self) -> String {
        block_id(self.tag, self.index)
    }

    /// Element id as written into the document (`{scope}--{tag}-{n}`)
    pub fn dom_id(&self) -> String {
        match self.scope {
            Some(scope) => format!("{}--{}", scope, self.id()),
            None => self.id(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl Renderer {
    /// Produce the replacement markup for one match
    pub fn render(&self, ctx: &RenderContext) -> String {
        match self {
            Self::Block(style) => render_block(style, ctx),
            Self::Heading { prefix } => format!("{}\n\n{}\n\n", prefix, ctx.content),
            Self::Wrap { before, after } => format!("{}{}{}", before, ctx.content, after),
            Self::InlineCode => {
                if ctx.content.contains('\n') {
                    format!("```\n{}\n```\n", ctx.content)
                } else {
                    format!("`{}`", ctx.content)
                }
            }
            Self::CodeBlock => {
                let body = ctx
                    .content
                    .strip_prefix('`')
                    .and_then(|c| c.strip_suffix('`'))
                    .filter(|c| !c.contains('`'))
                    .unwrap_or(ctx.content);
                if body.starts_with("```") {
                    format!("{}\n", body)
                } else {
                    format!("```\n{}\n```\n", body)
                }
            }
            Self::Template(template) => template.render(ctx),
        }
    }

    /// Whether the output is a block that shows up in [`GeneratedBlock`] lists
    ///
    /// [`GeneratedBlock`]: super::rewrite::GeneratedBlock
    pub fn block_style(&self) -> Option<&BlockStyle> {
        match self {
            Self::Block(style) => Some(style),
            _ => None,
        }
    }
}

/// Render a collapsible block
///
/// Only `div`, `span` and `button` elements are emitted. None of them is in
/// the known tag set, so a second rewrite pass leaves the block alone.
fn render_block(style: &BlockStyle, ctx: &RenderContext) -> String {
    let id = escape_html(&ctx.dom_id());
    let (glyph, expanded, hidden) = if style.collapsed {
        (GLYPH_COLLAPSED, "false", " hidden")
    } else {
        (GLYPH_EXPANDED, "true", "")
    };

    let copy_button = if style.copyable {
        format!(
            r#"<button class="tr-copy" type="button" data-action="copy" data-target="{id}-body" title="Copy">{GLYPH_COPY}</button>"#
        )
    } else {
        String::new()
    };

    format!(
        concat!(
            r#"<div class="tr-block tr-block--{variant}" id="{id}" data-tag="{tag}">"#,
            r#"<div class="tr-block__header">"#,
            r#"<button class="tr-toggle" type="button" data-action="toggle" data-target="{id}-body" aria-expanded="{expanded}">{glyph}</button>"#,
            r#"<span class="tr-block__icon">{icon}</span>"#,
            r#"<span class="tr-block__title">{title}</span>"#,
            "{copy}",
            "</div>",
            r#"<div class="tr-block__body" id="{id}-body"{hidden}>{content}</div>"#,
            "</div>"
        ),
        variant = escape_html(&style.variant),
        id = id,
        tag = ctx.tag,
        expanded = expanded,
        glyph = glyph,
        icon = escape_html(&style.icon),
        title = escape_html(&style.title),
        copy = copy_button,
        hidden = hidden,
        content = ctx.content,
    )
}

// ============================================================================
// Rules and tables
// ============================================================================

/// One entry of the rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRule {
    /// Tag name, lowercased
    pub tag: String,
    pub render: Renderer,
}

impl TagRule {
    pub fn new(tag: &str, render: Renderer) -> Self {
        Self {
            tag: tag.trim().to_ascii_lowercase(),
            render,
        }
    }

    fn block(tag: &str, style: BlockStyle) -> Self {
        Self::new(tag, Renderer::Block(style))
    }

    fn heading(tag: &str, prefix: &str) -> Self {
        Self::new(
            tag,
            Renderer::Heading {
                prefix: prefix.to_string(),
            },
        )
    }

    fn wrap(tag: &str, before: &str, after: &str) -> Self {
        Self::new(
            tag,
            Renderer::Wrap {
                before: before.to_string(),
                after: after.to_string(),
            },
        )
    }
}

/// Regex replacement for void elements (`<br>`, `<img ...>`) that have no
/// closing tag and so never form a pair
#[derive(Debug, Clone)]
pub struct VoidRule {
    pub pattern: Regex,
    pub replacement: String,
}

/// Ordered rules plus the clean-up applied after them
#[derive(Debug, Clone)]
pub struct RuleTable {
    format: OutputFormat,
    rules: Vec<TagRule>,
    void_rules: Vec<VoidRule>,
    strip: StripPolicy,
}

impl RuleTable {
    /// Empty table for `format`
    pub fn empty(format: OutputFormat) -> Self {
        let strip = match format {
            OutputFormat::Html => StripPolicy::KnownTags,
            OutputFormat::Markdown => StripPolicy::AllTags,
        };
        Self {
            format,
            rules: Vec::new(),
            void_rules: Vec::new(),
            strip,
        }
    }

    /// Built-in table for `format`
    pub fn for_format(format: OutputFormat) -> anyhow::Result<Self> {
        match format {
            OutputFormat::Html => Ok(Self::html_blocks()),
            OutputFormat::Markdown => Self::markdown(),
        }
    }

    /// Collapsible HTML blocks for assistant output tags
    pub fn html_blocks() -> Self {
        let mut table = Self::empty(OutputFormat::Html);
        table.rules = vec![
            TagRule::block("thinking", BlockStyle::new("Thinking", "💭", "thinking").collapsed()),
            TagRule::block("antthinking", BlockStyle::new("Thinking", "💭", "thinking").collapsed()),
            TagRule::block(
                "function_calls",
                BlockStyle::new("Function Calls", "⚙", "function").copyable(),
            ),
            TagRule::block(
                "function_results",
                BlockStyle::new("Function Results", "📤", "function").copyable(),
            ),
            TagRule::block("error", BlockStyle::new("Error", "⚠", "error").copyable()),
            TagRule::block("warning", BlockStyle::new("Warning", "⚠", "warning")),
            TagRule::block(
                "search_results",
                BlockStyle::new("Search Results", "🔍", "search").collapsed(),
            ),
            TagRule::block(
                "result_reflection",
                BlockStyle::new("Result Reflection", "🪞", "reflection").collapsed(),
            ),
            TagRule::block(
                "search_quality_reflection",
                BlockStyle::new("Search Quality Reflection", "🪞", "reflection").collapsed(),
            ),
            TagRule::block(
                "search_quality_score",
                BlockStyle::new("Search Quality Score", "📊", "reflection"),
            ),
            TagRule::block(
                "assistant_profile",
                BlockStyle::new("Assistant Profile", "👤", "profile").collapsed(),
            ),
            TagRule::block("artifact", BlockStyle::new("Artifact", "📄", "artifact")),
            TagRule::block(
                "system-reminder",
                BlockStyle::new("System Reminder", "📌", "reminder").collapsed(),
            ),
        ];
        table
    }

    /// XML/HTML to Markdown conversion
    pub fn markdown() -> anyhow::Result<Self> {
        let mut table = Self::empty(OutputFormat::Markdown);
        table.rules = vec![
            // Structured output sections
            TagRule::heading("converted_text", "### Converted Text"),
            TagRule::heading("unmatched_citations", "### Unmatched Citations"),
            TagRule::heading("notes", "### Notes"),
            TagRule::heading("endnote_library", "### Endnote Library"),
            TagRule::heading("text_with_citations", "### Original Text"),
            TagRule::heading("thinking", "#### Thinking"),
            TagRule::heading("error", "#### Error"),
            TagRule::heading("function_calls", "#### Function Calls"),
            // Headers
            TagRule::wrap("h1", "# ", "\n"),
            TagRule::wrap("h2", "## ", "\n"),
            TagRule::wrap("h3", "### ", "\n"),
            TagRule::wrap("h4", "#### ", "\n"),
            // Text formatting
            TagRule::wrap("strong", "**", "**"),
            TagRule::wrap("b", "**", "**"),
            TagRule::wrap("em", "*", "*"),
            TagRule::wrap("i", "*", "*"),
            TagRule::new("code", Renderer::InlineCode),
            TagRule::new("pre", Renderer::CodeBlock),
            // Lists
            TagRule::wrap("ul", "", "\n"),
            TagRule::wrap("ol", "", "\n"),
            TagRule::wrap("li", "- ", "\n"),
            // Links
            TagRule::new("a", Renderer::Template(Template::parse("[{content}]({attr:href})")?)),
            // Paragraphs
            TagRule::wrap("p", "", "\n\n"),
            // Tables
            TagRule::wrap("table", "", "\n"),
            TagRule::wrap("tr", "", " |\n"),
            TagRule::wrap("th", "| ", " "),
            TagRule::wrap("td", "| ", " "),
            // Blockquotes
            TagRule::wrap("blockquote", "> ", "\n"),
        ];
        table.void_rules = vec![
            VoidRule {
                pattern: Regex::new(r#"(?i)<img\s[^>]*?src="([^"]*)"[^>]*?alt="([^"]*)"[^>]*>"#)?,
                replacement: "![$2]($1)".to_string(),
            },
            VoidRule {
                pattern: Regex::new(r"(?i)<br\s*/?>")?,
                replacement: "\n".to_string(),
            },
        ];
        Ok(table)
    }

    /// Put `rules` ahead of the existing ones (they win for their tag names)
    pub fn with_rules_prepended(mut self, rules: Vec<TagRule>) -> Self {
        if rules.is_empty() {
            return self;
        }
        let mut merged = rules;
        merged.append(&mut self.rules);
        self.rules = merged;
        self
    }

    /// Append one rule
    #[allow(dead_code)]
    pub fn push(&mut self, rule: TagRule) {
        self.rules.push(rule);
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn strip_policy(&self) -> StripPolicy {
        self.strip
    }

    pub fn void_rules(&self) -> &[VoidRule] {
        &self.void_rules
    }

    /// First declared rule for `tag`
    pub fn rule_for(&self, tag: &str) -> Option<&TagRule> {
        self.rules.iter().find(|r| r.tag.eq_ignore_ascii_case(tag))
    }

    /// Distinct ruled tag names in declared order
    pub fn ruled_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            if !tags.contains(&rule.tag.as_str()) {
                tags.push(&rule.tag);
            }
        }
        tags
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parse `name="value"` pairs out of an opening tag's attribute text
pub fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = raw.trim().trim_end_matches('/').trim_end();

    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let value = if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(quote @ ('"' | '\'')) => {
                    let body = &after_eq[1..];
                    let end = body.find(quote).unwrap_or(body.len());
                    rest = body.get(end + 1..).unwrap_or("").trim_start();
                    body[..end].to_string()
                }
                Some(_) => {
                    let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                    rest = after_eq[end..].trim_start();
                    after_eq[..end].to_string()
                }
                None => {
                    rest = "";
                    String::new()
                }
            }
        } else {
            String::new()
        };

        if !name.is_empty() {
            attributes.push((name, value));
        } else if !rest.is_empty() {
            // Stray '=' or garbage: skip one char to guarantee progress
            let skip = rest.chars().next().map(char::len_utf8).unwrap_or(1);
            rest = &rest[skip..];
        }
    }
    attributes
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a single rule (from TOML)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RuleConfig {
    Block {
        tag: String,
        title: String,
        #[serde(default = "default_icon")]
        icon: String,
        #[serde(default)]
        copyable: bool,
        #[serde(default)]
        collapsed: bool,
        #[serde(default = "default_variant")]
        variant: String,
    },
    Heading {
        tag: String,
        prefix: String,
    },
    Wrap {
        tag: String,
        #[serde(default)]
        before: String,
        #[serde(default)]
        after: String,
    },
    Template {
        tag: String,
        template: String,
    },
}

fn default_icon() -> String {
    "▣".to_string()
}

fn default_variant() -> String {
    "custom".to_string()
}

impl RuleConfig {
    pub fn tag(&self) -> &str {
        match self {
            Self::Block { tag, .. }
            | Self::Heading { tag, .. }
            | Self::Wrap { tag, .. }
            | Self::Template { tag, .. } => tag,
        }
    }
}

/// Compile configured rules, in order
pub fn compile_rules(configs: &[RuleConfig]) -> anyhow::Result<Vec<TagRule>> {
    let mut rules = Vec::with_capacity(configs.len());

    for config in configs {
        let tag = config.tag().trim();
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || "_-.:".contains(c)) {
            anyhow::bail!("invalid tag name {:?} in rule config", config.tag());
        }

        let render = match config {
            RuleConfig::Block {
                title,
                icon,
                copyable,
                collapsed,
                variant,
                ..
            } => Renderer::Block(BlockStyle {
                title: title.clone(),
                icon: icon.clone(),
                copyable: *copyable,
                collapsed: *collapsed,
                variant: variant.clone(),
            }),
            RuleConfig::Heading { prefix, .. } => Renderer::Heading {
                prefix: prefix.clone(),
            },
            RuleConfig::Wrap { before, after, .. } => Renderer::Wrap {
                before: before.clone(),
                after: after.clone(),
            },
            RuleConfig::Template { template, .. } => Renderer::Template(
                Template::parse(template)
                    .map_err(|e| anyhow::anyhow!("rule for <{}>: {}", tag, e))?,
            ),
        };
        tracing::debug!(tag = %tag, "Loaded tag rule");
        rules.push(TagRule::new(tag, render));
    }

    Ok(rules)
}
