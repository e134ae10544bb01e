//! Per-pass tag occurrence counters
//!
//! Generated blocks need unique element ids within one message
//! (`thinking-1`, `thinking-2`, ...). Counters are owned by the caller and
//! reset at the start of every message's processing pass.

use std::collections::HashMap;

/// Mapping from tag name to the last suffix handed out for it
#[derive(Debug, Default, Clone)]
pub struct TagCounters {
    counts: HashMap<String, u32>,
}

impl TagCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next 1-based suffix for `tag`
    ///
    /// Tag names are case-insensitive, so `<Thinking>` and `<thinking>`
    /// share a counter.
    pub fn next(&mut self, tag: &str) -> u32 {
        let count = self.counts.entry(tag.to_ascii_lowercase()).or_insert(0);
        *count += 1;
        *count
    }

    /// Current count for `tag` (0 if never seen this pass)
    #[allow(dead_code)]
    pub fn current(&self, tag: &str) -> u32 {
        self.counts
            .get(&tag.to_ascii_lowercase())
            .copied()
            .unwrap_or(0)
    }

    /// Start a new pass
    pub fn reset(&mut self) {
        self.counts.clear();
    }
}

/// Element id for the `index`-th block of `tag`
pub fn block_id(tag: &str, index: u32) -> String {
    format!("{}-{}", tag.to_ascii_lowercase(), index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_tag() {
        let mut counters = TagCounters::new();
        assert_eq!(counters.next("thinking"), 1);
        assert_eq!(counters.next("error"), 1);
        assert_eq!(counters.next("thinking"), 2);
        assert_eq!(counters.current("thinking"), 2);
        assert_eq!(counters.current("warning"), 0);
    }

    #[test]
    fn test_counters_ignore_case() {
        let mut counters = TagCounters::new();
        counters.next("Thinking");
        assert_eq!(counters.next("THINKING"), 2);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut counters = TagCounters::new();
        counters.next("thinking");
        counters.next("thinking");
        counters.reset();
        assert_eq!(counters.next("thinking"), 1);
    }

    #[test]
    fn test_block_id_format() {
        assert_eq!(block_id("function_calls", 3), "function_calls-3");
        assert_eq!(block_id("ASSISTANT_PROFILE", 1), "assistant_profile-1");
    }
}
