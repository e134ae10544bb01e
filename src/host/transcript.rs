//! File-backed host: a chat transcript on disk, rendered to a document
//!
//! Accepted input shapes:
//!
//! ```text
//! {"conversation_id": "c-1", "messages": [{"id": "m1", "role": "assistant", "content": "..."}]}
//! [{"role": "user", "content": "..."}, ...]
//! {"role": "user", "content": "..."}      ← JSON Lines, one message per line
//! ```
//!
//! `content` is either a string or a list of content blocks, of which the
//! `text` blocks are joined.

use super::page;
use super::MessageHost;
use crate::markup::{ElementIds, OutputFormat, RewriteOutcome};
use crate::util::escape_html;
use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TranscriptDocument {
    #[serde(default)]
    conversation_id: Option<String>,
    messages: Vec<TranscriptMessage>,
}

#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default = "default_role")]
    role: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    streaming: bool,
}

fn default_role() -> String {
    "assistant".to_string()
}

/// Flatten string or content-block `content` to text
fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        }
        _ => None,
    }
}

/// Parse a whole document, a bare array, or JSON Lines
fn parse_transcript(source: &str) -> anyhow::Result<(Option<String>, Vec<TranscriptMessage>)> {
    let trimmed = source.trim_start();

    if trimmed.starts_with('[') {
        let messages: Vec<TranscriptMessage> =
            serde_json::from_str(source).context("Invalid transcript array")?;
        return Ok((None, messages));
    }

    if trimmed.starts_with('{') {
        if let Ok(doc) = serde_json::from_str::<TranscriptDocument>(source) {
            return Ok((doc.conversation_id, doc.messages));
        }
    }

    let mut messages = Vec::new();
    for (n, line) in source.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let message: TranscriptMessage = serde_json::from_str(line)
            .with_context(|| format!("Invalid transcript line {}", n + 1))?;
        messages.push(message);
    }
    Ok((None, messages))
}

// ============================================================================
// Host
// ============================================================================

/// One message container
#[derive(Debug, Clone)]
pub struct HostMessage {
    pub id: String,
    pub role: String,
    pub text: Option<String>,
    pub streaming: bool,
    /// Rewritten markup, if the engine replaced the content
    pub rendered: Option<String>,
}

/// Transcript file as a message host
#[derive(Debug)]
pub struct TranscriptHost {
    source: PathBuf,
    present: bool,
    format: OutputFormat,
    conversation_id: Option<String>,
    messages: Vec<HostMessage>,
}

impl TranscriptHost {
    /// Open a transcript file
    ///
    /// A missing file is not an error: the host reports its container as
    /// absent. A file that exists but cannot be read or parsed is.
    pub fn open(path: &Path, format: OutputFormat) -> anyhow::Result<Self> {
        let mut host = Self {
            source: path.to_path_buf(),
            present: false,
            format,
            conversation_id: None,
            messages: Vec::new(),
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => host.load_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Transcript not found");
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Cannot read transcript {}", path.display()))
            }
        }
        Ok(host)
    }

    /// Build a host from transcript text (no backing file)
    pub fn from_str(source: &str, format: OutputFormat) -> anyhow::Result<Self> {
        let mut host = Self {
            source: PathBuf::new(),
            present: false,
            format,
            conversation_id: None,
            messages: Vec::new(),
        };
        host.load_str(source)?;
        Ok(host)
    }

    /// Re-read the backing file
    ///
    /// Messages whose text did not change keep their rendered markup, since
    /// the tracker will skip them. Returns true when the conversation id
    /// changed (the caller should reset its processed state).
    pub fn reload(&mut self) -> anyhow::Result<bool> {
        let contents = std::fs::read_to_string(&self.source)
            .with_context(|| format!("Cannot read transcript {}", self.source.display()))?;
        let previous_conversation = self.conversation_id.clone();
        self.load_str(&contents)?;
        Ok(self.conversation_id != previous_conversation)
    }

    fn load_str(&mut self, source: &str) -> anyhow::Result<()> {
        let (conversation_id, raw) = parse_transcript(source)?;

        let mut previous: HashMap<String, HostMessage> = self
            .messages
            .drain(..)
            .map(|m| (m.id.clone(), m))
            .collect();
        let same_conversation = conversation_id == self.conversation_id;

        let mut ids = ElementIds::new();
        self.messages = raw
            .into_iter()
            .map(|m| {
                let id = ids.ensure(m.id.as_deref());
                let text = content_text(&m.content);
                let rendered = previous
                    .remove(&id)
                    .filter(|old| same_conversation && old.text == text)
                    .and_then(|old| old.rendered);
                HostMessage {
                    id,
                    role: m.role,
                    text,
                    streaming: m.streaming,
                    rendered,
                }
            })
            .collect();

        self.conversation_id = conversation_id;
        self.present = true;

        tracing::debug!(
            conversation = self.conversation_id.as_deref().unwrap_or("-"),
            messages = self.messages.len(),
            "Transcript loaded"
        );
        Ok(())
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    #[allow(dead_code)]
    pub fn messages(&self) -> &[HostMessage] {
        &self.messages
    }

    fn message(&self, id: &str) -> Option<&HostMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    // ------------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------------

    /// Render all messages as one document
    ///
    /// HTML output escapes messages the engine left alone. `standalone`
    /// wraps the HTML in a full page with stylesheet and script.
    pub fn render_document(&self, standalone: bool) -> String {
        match self.format {
            OutputFormat::Html => {
                let body = self.render_html_messages();
                if standalone {
                    page::html_page(self.title(), &body)
                } else {
                    body
                }
            }
            OutputFormat::Markdown => self.render_markdown(),
        }
    }

    fn title(&self) -> &str {
        self.conversation_id.as_deref().unwrap_or("Transcript")
    }

    fn render_html_messages(&self) -> String {
        let mut out = String::new();
        for m in &self.messages {
            let body = match (&m.rendered, &m.text) {
                (Some(rendered), _) => rendered.clone(),
                (None, Some(text)) => escape_html(text),
                (None, None) => String::new(),
            };
            out.push_str(&format!(
                concat!(
                    r#"<div class="tr-message tr-message--{role}" id="{id}" data-streaming="{streaming}">"#,
                    r#"<div class="tr-message__role">{role_label}</div>"#,
                    r#"<div class="tr-message__content">{body}</div>"#,
                    "</div>\n"
                ),
                role = escape_html(&m.role),
                id = escape_html(&m.id),
                streaming = m.streaming,
                role_label = escape_html(&m.role),
                body = body,
            ));
        }
        out
    }

    fn render_markdown(&self) -> String {
        let mut sections = Vec::with_capacity(self.messages.len());
        for m in &self.messages {
            let body = m
                .rendered
                .as_deref()
                .or(m.text.as_deref())
                .unwrap_or_default();
            sections.push(format!("**{}**\n\n{}", m.role, body.trim()));
        }
        let mut out = sections.join("\n\n---\n\n");
        out.push('\n');
        out
    }

    /// Write the rendered document to `path`
    pub fn write_document(&self, path: &Path, standalone: bool) -> anyhow::Result<()> {
        std::fs::write(path, self.render_document(standalone))
            .with_context(|| format!("Cannot write output {}", path.display()))
    }
}

impl MessageHost for TranscriptHost {
    fn container_present(&self) -> bool {
        self.present
    }

    fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.id.clone()).collect()
    }

    fn text_of(&self, id: &str) -> Option<&str> {
        self.message(id).and_then(|m| m.text.as_deref())
    }

    fn is_streaming(&self, id: &str) -> bool {
        self.message(id).map(|m| m.streaming).unwrap_or(false)
    }

    fn replace_rendered(&mut self, id: &str, outcome: &RewriteOutcome) -> anyhow::Result<()> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .with_context(|| format!("No message with id {}", id))?;
        message.rendered = Some(outcome.text.clone());
        Ok(())
    }
}
