//! Processing-state tracker
//!
//! Remembers which message containers have already been rewritten so that
//! repeated observer callbacks do not rewrite the same message again. A
//! message is reprocessed when its streaming flag differs from the one it was
//! last marked with, which lets a streaming message be rewritten again once it
//! finalizes. Callers that can see the text also get it reprocessed when the
//! text changed.
//!
//! State lives for one observing session and is cleared only through
//! [`ProcessedTracker::reset`] (e.g. when the conversation changes).

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// What we remember about a processed container
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProcessedState {
    streaming: bool,
    /// Digest of the source text at the time of processing (if recorded)
    digest: Option<String>,
}

/// Set of processed container ids with their last streaming flag
#[derive(Debug, Default)]
pub struct ProcessedTracker {
    processed: HashMap<String, ProcessedState>,
}

impl ProcessedTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the container needs a rewrite pass
    ///
    /// True if it was never marked, or was marked with a different streaming
    /// flag than `streaming_now`.
    pub fn should_process(&self, element_id: &str, streaming_now: bool) -> bool {
        match self.processed.get(element_id) {
            Some(state) => state.streaming != streaming_now,
            None => true,
        }
    }

    /// Like [`should_process`](Self::should_process), but a container is also
    /// reprocessed when its text changed since it was marked (a streaming
    /// message growing, or a finished one edited in place).
    ///
    /// Containers marked without a digest compare on the flag alone.
    pub fn should_process_content(&self, element_id: &str, streaming_now: bool, text: &str) -> bool {
        match self.processed.get(element_id) {
            None => true,
            Some(state) if state.streaming != streaming_now => true,
            Some(state) => match &state.digest {
                Some(digest) => *digest != content_digest(text),
                None => false,
            },
        }
    }

    /// Record the container as processed, overwriting any previous flag
    pub fn mark_processed(&mut self, element_id: &str, streaming_now: bool) {
        self.processed.insert(
            element_id.to_string(),
            ProcessedState {
                streaming: streaming_now,
                digest: None,
            },
        );
    }

    /// Record the container as processed along with a digest of its text
    pub fn mark_processed_content(&mut self, element_id: &str, streaming_now: bool, text: &str) {
        self.processed.insert(
            element_id.to_string(),
            ProcessedState {
                streaming: streaming_now,
                digest: Some(content_digest(text)),
            },
        );
    }

    /// Forget everything (new conversation)
    pub fn reset(&mut self) {
        self.processed.clear();
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// Short SHA-256 of the source text
fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = hasher.finalize();
    hash[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hands out opaque ids for containers that arrive without one
#[derive(Debug, Default)]
pub struct ElementIds {
    next: u64,
}

impl ElementIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `existing` if it is a usable id, otherwise mint a new one
    pub fn ensure(&mut self, existing: Option<&str>) -> String {
        match existing.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                self.next += 1;
                format!("tr-msg-{}", self.next)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_element_is_processed() {
        let tracker = ProcessedTracker::new();
        assert!(tracker.should_process("msg-1", false));
        assert!(tracker.should_process("msg-1", true));
    }

    #[test]
    fn test_streaming_transition() {
        let mut tracker = ProcessedTracker::new();
        tracker.mark_processed("msg-1", true);

        // Same flag, same content: skip
        assert!(!tracker.should_process("msg-1", true));
        // Streaming finished: reprocess
        assert!(tracker.should_process("msg-1", false));

        tracker.mark_processed("msg-1", false);
        assert!(!tracker.should_process("msg-1", false));
    }

    #[test]
    fn test_mark_overwrites_flag() {
        let mut tracker = ProcessedTracker::new();
        tracker.mark_processed("msg-1", false);
        tracker.mark_processed("msg-1", true);
        assert!(!tracker.should_process("msg-1", true));
        assert!(tracker.should_process("msg-1", false));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_streaming_content_growth_reprocesses() {
        let mut tracker = ProcessedTracker::new();
        tracker.mark_processed_content("msg-1", true, "<thinking>par");

        assert!(!tracker.should_process_content("msg-1", true, "<thinking>par"));
        assert!(tracker.should_process_content("msg-1", true, "<thinking>partial</thinking>"));
    }

    #[test]
    fn test_finalized_content_edit_reprocesses() {
        let mut tracker = ProcessedTracker::new();
        tracker.mark_processed_content("msg-1", false, "<error>a</error>");
        assert!(!tracker.should_process_content("msg-1", false, "<error>a</error>"));
        assert!(tracker.should_process_content("msg-1", false, "<error>a, edited</error>"));

        // No digest recorded: the flag decides
        tracker.mark_processed("msg-2", false);
        assert!(!tracker.should_process_content("msg-2", false, "anything"));
    }

    #[test]
    fn test_reset_forgets_everything() {
        let mut tracker = ProcessedTracker::new();
        tracker.mark_processed("a", false);
        tracker.mark_processed("b", true);
        tracker.reset();
        assert!(tracker.is_empty());
        assert!(tracker.should_process("a", false));
    }

    #[test]
    fn test_element_ids() {
        let mut ids = ElementIds::new();
        assert_eq!(ids.ensure(Some("msg-7")), "msg-7");
        assert_eq!(ids.ensure(None), "tr-msg-1");
        assert_eq!(ids.ensure(Some("  ")), "tr-msg-2");
    }
}
