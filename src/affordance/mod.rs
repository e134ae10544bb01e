//! Interactive affordances attached to generated blocks
//!
//! Every block has a toggle that flips its body's visibility and the glyph
//! on its header button. Copyable blocks (function calls and results, errors)
//! also have a copy button: it places the block's trimmed text on the
//! clipboard, shows a check mark, and reverts to the copy glyph after
//! [`COPY_REVERT`].
//!
//! Time is passed in explicitly (`now`), so the revert is driven by whoever
//! owns the clock.

pub mod clipboard;

pub use clipboard::{ClipboardSink, StdoutSink, SystemClipboard};

use crate::markup::detect::decode_entities;
use crate::markup::rules::{GLYPH_COLLAPSED, GLYPH_COPY, GLYPH_EXPANDED};
use crate::markup::GeneratedBlock;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// How long the copied indicator stays before the icon reverts
pub const COPY_REVERT: Duration = Duration::from_secs(2);

/// Shown on the copy button right after a successful copy
pub const GLYPH_COPIED: &str = "✓";

// ─────────────────────────────────────────────────────────────────────────────
// Toggle
// ─────────────────────────────────────────────────────────────────────────────

/// Collapse/expand state of one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleAffordance {
    block_id: String,
    expanded: bool,
}

impl ToggleAffordance {
    pub fn new(block_id: &str, collapsed: bool) -> Self {
        Self {
            block_id: block_id.to_string(),
            expanded: !collapsed,
        }
    }

    /// Toggle in the block's initial state
    pub fn for_block(block: &GeneratedBlock) -> Self {
        Self::new(&block.id, block.collapsed)
    }

    /// Flip visibility; returns the new expanded state
    pub fn toggle(&mut self) -> bool {
        self.expanded = !self.expanded;
        tracing::trace!(block = %self.block_id, expanded = self.expanded, "Block toggled");
        self.expanded
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn glyph(&self) -> &'static str {
        if self.expanded {
            GLYPH_EXPANDED
        } else {
            GLYPH_COLLAPSED
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Copy
// ─────────────────────────────────────────────────────────────────────────────

/// Copy button state of one copyable block
#[derive(Debug, Clone)]
pub struct CopyAffordance {
    block_id: String,
    text: String,
    copied_at: Option<Instant>,
}

impl CopyAffordance {
    /// Copy affordance for `block`, if the block is copyable
    pub fn for_block(block: &GeneratedBlock) -> Option<Self> {
        block.copyable.then(|| Self {
            block_id: block.id.clone(),
            text: block_text(&block.body),
            copied_at: None,
        })
    }

    /// Text that a copy places on the clipboard
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Copy to `sink` and switch to the copied glyph
    ///
    /// On failure the glyph stays as it was.
    pub fn copy(&mut self, sink: &mut dyn ClipboardSink, now: Instant) -> anyhow::Result<()> {
        sink.set_text(&self.text)?;
        self.copied_at = Some(now);
        tracing::debug!(block = %self.block_id, bytes = self.text.len(), "Block copied");
        Ok(())
    }

    /// Revert the glyph once [`COPY_REVERT`] has passed; returns true if it
    /// reverted on this tick
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.copied_at {
            Some(at) if now.saturating_duration_since(at) >= COPY_REVERT => {
                self.copied_at = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_copied(&self) -> bool {
        self.copied_at.is_some()
    }

    pub fn glyph(&self) -> &'static str {
        if self.is_copied() {
            GLYPH_COPIED
        } else {
            GLYPH_COPY
        }
    }
}

/// Plain text of a block body: markup removed, entities decoded, trimmed
pub fn block_text(body: &str) -> String {
    static TAGS: OnceLock<Option<Regex>> = OnceLock::new();
    let stripped = match TAGS.get_or_init(|| Regex::new(r"<[^<>]+>").ok()) {
        Some(tags) => tags.replace_all(body, ""),
        None => body.into(),
    };
    decode_entities(&stripped).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::clipboard::MemoryClipboard;
    use super::*;

    fn block(copyable: bool, body: &str) -> GeneratedBlock {
        GeneratedBlock {
            id: "error-1".to_string(),
            tag: "error".to_string(),
            title: "Error".to_string(),
            body: body.to_string(),
            copyable,
            collapsed: false,
        }
    }

    #[test]
    fn test_toggle_flips_glyph() {
        let mut toggle = ToggleAffordance::new("thinking-1", true);
        assert!(!toggle.is_expanded());
        assert_eq!(toggle.glyph(), "▶");

        assert!(toggle.toggle());
        assert_eq!(toggle.glyph(), "▼");

        assert!(!toggle.toggle());
        assert_eq!(toggle.glyph(), "▶");
    }

    #[test]
    fn test_toggle_starts_from_block_state() {
        let mut collapsed = block(false, "x");
        collapsed.collapsed = true;
        assert_eq!(ToggleAffordance::for_block(&collapsed).glyph(), GLYPH_COLLAPSED);
        assert!(ToggleAffordance::for_block(&block(false, "x")).is_expanded());
    }

    #[test]
    fn test_only_copyable_blocks_get_copy() {
        assert!(CopyAffordance::for_block(&block(false, "x")).is_none());
        assert!(CopyAffordance::for_block(&block(true, "x")).is_some());
    }

    #[test]
    fn test_copy_then_revert_after_two_seconds() {
        let mut copy = CopyAffordance::for_block(&block(true, "  Request failed: 404\n")).unwrap();
        let mut sink = MemoryClipboard::default();
        let start = Instant::now();

        copy.copy(&mut sink, start).unwrap();
        assert_eq!(sink.contents(), Some("Request failed: 404"));
        assert_eq!(copy.glyph(), GLYPH_COPIED);

        assert!(!copy.tick(start + Duration::from_millis(1999)));
        assert_eq!(copy.glyph(), GLYPH_COPIED);

        assert!(copy.tick(start + COPY_REVERT));
        assert_eq!(copy.glyph(), GLYPH_COPY);
        assert!(!copy.tick(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_failed_copy_keeps_glyph() {
        let mut copy = CopyAffordance::for_block(&block(true, "x")).unwrap();
        let mut sink = MemoryClipboard::failing();
        assert!(copy.copy(&mut sink, Instant::now()).is_err());
        assert!(!copy.is_copied());
        assert_eq!(copy.glyph(), GLYPH_COPY);
    }

    #[test]
    fn test_recopy_restarts_revert_window() {
        let mut copy = CopyAffordance::for_block(&block(true, "x")).unwrap();
        let mut sink = MemoryClipboard::default();
        let start = Instant::now();

        copy.copy(&mut sink, start).unwrap();
        copy.copy(&mut sink, start + Duration::from_millis(1500)).unwrap();
        assert!(!copy.tick(start + Duration::from_millis(2500)));
        assert!(copy.tick(start + Duration::from_millis(3500)));
    }

    #[test]
    fn test_block_text_strips_nested_markup() {
        let body = r#"<div class="tr-block"><span>inner</span></div> a &lt; b &amp;&amp; c "#;
        assert_eq!(block_text(body), "inner a < b && c");
    }
}
