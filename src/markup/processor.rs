//! Message processor - detection gate, rewrite pass, and bookkeeping for one
//! message container
//!
//! # Fail-Safe Contract
//!
//! A failure while rewriting or applying a message is logged and swallowed.
//! The container keeps its original content and is NOT marked processed, so
//! the next scan retries it. Nothing is ever surfaced to the reader.

use super::counter::TagCounters;
use super::detect::{decode_entities, Detector};
use super::rewrite::{RewriteOutcome, Rewriter};
use super::rules::{compile_rules, RuleTable};
use super::tracker::ProcessedTracker;
use crate::config::MarkupConfig;
use crate::util::truncate_utf8_safe;

/// What happened to one container during a scan
#[derive(Debug)]
pub enum ProcessOutcome {
    /// Already processed with the same streaming flag (and content)
    Skipped,
    /// Detection gate said no; marked processed without a rewrite
    NoMarkup,
    /// Rewrite pass ran but produced identical text
    Unchanged,
    /// Content replaced
    Rewritten(RewriteOutcome),
    /// Rewrite or replacement failed (logged); content untouched, not marked
    Failed,
}

impl ProcessOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::NoMarkup => "no-markup",
            Self::Unchanged => "unchanged",
            Self::Rewritten(_) => "rewritten",
            Self::Failed => "failed",
        }
    }
}

/// Owns the detector, the rewriter and all per-session state
pub struct MessageProcessor {
    detector: Detector,
    rewriter: Rewriter,
    tracker: ProcessedTracker,
    counters: TagCounters,
    decode_entities: bool,
}

impl MessageProcessor {
    pub fn new(detector: Detector, rewriter: Rewriter) -> Self {
        Self {
            detector,
            rewriter,
            tracker: ProcessedTracker::new(),
            counters: TagCounters::new(),
            decode_entities: false,
        }
    }

    /// Build detector, rule table and rewriter from configuration
    ///
    /// Configured rules are placed ahead of the built-in table for the
    /// output format, so they win for the tags they name.
    pub fn from_config(config: &MarkupConfig) -> anyhow::Result<Self> {
        let custom = compile_rules(&config.rules)?;
        let custom_tags: Vec<String> = custom.iter().map(|r| r.tag.clone()).collect();

        let mut extra_known = config.known_tags.clone();
        extra_known.extend(custom_tags);
        let detector = Detector::with_defaults(&extra_known, config.detector_mode)?;

        let table = RuleTable::for_format(config.format)?.with_rules_prepended(custom);
        let rule_count = table.len();
        let rewriter = Rewriter::new(
            table,
            detector.known_tags(),
            config.nesting,
            config.max_message_bytes,
        )?;

        tracing::debug!(
            format = config.format.as_str(),
            rules = rule_count,
            known_tags = detector.known_tags().len(),
            mode = detector.mode().as_str(),
            nesting = rewriter.nesting().as_str(),
            "Message processor ready"
        );

        let mut processor = Self::new(detector, rewriter);
        processor.decode_entities = config.decode_entities;
        Ok(processor)
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn tracker(&self) -> &ProcessedTracker {
        &self.tracker
    }

    /// Forget all processed containers (new conversation)
    pub fn reset(&mut self) {
        tracing::debug!(tracked = self.tracker.len(), "Resetting processed-element state");
        self.tracker.reset();
    }

    /// Gate, rewrite, and hand the result to `apply`
    ///
    /// `apply` replaces the container's rendered content; the container is
    /// marked processed only if it succeeds.
    pub fn process<F>(
        &mut self,
        element_id: &str,
        text: Option<&str>,
        streaming: bool,
        apply: F,
    ) -> ProcessOutcome
    where
        F: FnOnce(&RewriteOutcome) -> anyhow::Result<()>,
    {
        let needs_pass = match text {
            Some(raw) => self.tracker.should_process_content(element_id, streaming, raw),
            None => self.tracker.should_process(element_id, streaming),
        };
        if !needs_pass {
            return ProcessOutcome::Skipped;
        }
        let raw = text.unwrap_or("");

        let decoded;
        let source = if self.decode_entities {
            decoded = decode_entities(raw);
            decoded.as_str()
        } else {
            raw
        };

        let Some(detection) = self.detector.matched_predicate(Some(source)) else {
            self.mark(element_id, streaming, text);
            return ProcessOutcome::NoMarkup;
        };

        tracing::debug!(
            element = element_id,
            streaming,
            predicate = detection.as_str(),
            preview = truncate_utf8_safe(source, 80),
            "Markup detected"
        );

        self.counters.reset();
        let outcome = match self
            .rewriter
            .rewrite_scoped(source, Some(element_id), &mut self.counters)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(element = element_id, error = %e, "Rewrite failed, leaving message as-is");
                return ProcessOutcome::Failed;
            }
        };

        if !outcome.changed {
            self.mark(element_id, streaming, text);
            return ProcessOutcome::Unchanged;
        }

        match apply(&outcome) {
            Ok(()) => {
                self.mark(element_id, streaming, text);
                tracing::debug!(
                    element = element_id,
                    replaced = outcome.replaced,
                    stripped = outcome.stripped,
                    blocks = outcome.blocks.len(),
                    "Message rewritten"
                );
                ProcessOutcome::Rewritten(outcome)
            }
            Err(e) => {
                tracing::warn!(element = element_id, error = %e, "Could not apply rewrite, leaving message as-is");
                ProcessOutcome::Failed
            }
        }
    }

    fn mark(&mut self, element_id: &str, streaming: bool, text: Option<&str>) {
        match text {
            Some(raw) => self
                .tracker
                .mark_processed_content(element_id, streaming, raw),
            None => self.tracker.mark_processed(element_id, streaming),
        }
    }

    /// One-off rewrite of free text with fresh counters (no tracking)
    ///
    /// Returns `None` when the detection gate rejects the text.
    pub fn render_text(&self, text: &str) -> anyhow::Result<Option<RewriteOutcome>> {
        let decoded;
        let source = if self.decode_entities {
            decoded = decode_entities(text);
            decoded.as_str()
        } else {
            text
        };
        if !self.detector.contains_markup(Some(source)) {
            return Ok(None);
        }
        let mut counters = TagCounters::new();
        self.rewriter.rewrite(source, &mut counters).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> MessageProcessor {
        MessageProcessor::from_config(&MarkupConfig::default()).unwrap()
    }

    fn accept(_: &RewriteOutcome) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_rewrites_then_skips() {
        let mut p = processor();
        let text = Some("<error>Request failed: 404</error>");

        match p.process("msg-1", text, false, accept) {
            ProcessOutcome::Rewritten(outcome) => {
                assert_eq!(outcome.blocks[0].body, "Request failed: 404");
            }
            other => panic!("Expected Rewritten, got {:?}", other),
        }
        assert!(matches!(p.process("msg-1", text, false, accept), ProcessOutcome::Skipped));
    }

    #[test]
    fn test_plain_text_is_marked_without_rewrite() {
        let mut p = processor();
        assert!(matches!(
            p.process("msg-1", Some("hello there"), false, accept),
            ProcessOutcome::NoMarkup
        ));
        assert!(matches!(
            p.process("msg-1", Some("hello there"), false, accept),
            ProcessOutcome::Skipped
        ));
        assert!(matches!(p.process("msg-2", None, false, accept), ProcessOutcome::NoMarkup));
    }

    #[test]
    fn test_counters_reset_between_messages() {
        let mut p = processor();
        let two = Some("<thinking>a</thinking><thinking>b</thinking>");
        let ids = match p.process("msg-1", two, false, accept) {
            ProcessOutcome::Rewritten(o) => o.blocks.into_iter().map(|b| b.id).collect::<Vec<_>>(),
            other => panic!("Expected Rewritten, got {:?}", other),
        };
        assert_eq!(ids, vec!["thinking-1", "thinking-2"]);

        match p.process("msg-2", Some("<thinking>c</thinking>"), false, accept) {
            ProcessOutcome::Rewritten(o) => assert_eq!(o.blocks[0].id, "thinking-1"),
            other => panic!("Expected Rewritten, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_apply_is_retried() {
        let mut p = processor();
        let text = Some("<error>x</error>");

        let outcome = p.process("msg-1", text, false, |_| Err(anyhow::anyhow!("host went away")));
        assert!(matches!(outcome, ProcessOutcome::Failed));
        assert!(p.tracker().should_process("msg-1", false));

        assert!(matches!(
            p.process("msg-1", text, false, accept),
            ProcessOutcome::Rewritten(_)
        ));
    }

    #[test]
    fn test_rewrite_error_leaves_message_unmarked() {
        let config = MarkupConfig {
            max_message_bytes: 4,
            ..MarkupConfig::default()
        };
        let mut p = MessageProcessor::from_config(&config).unwrap();
        let outcome = p.process("msg-1", Some("<error>big</error>"), false, accept);
        assert!(matches!(outcome, ProcessOutcome::Failed));
        assert_eq!(outcome.as_str(), "failed");
        assert!(p.tracker().should_process("msg-1", false));
    }

    #[test]
    fn test_streaming_message_is_reprocessed_on_finalize() {
        let mut p = processor();
        let partial = Some("<thinking>still going");
        assert!(matches!(p.process("msg-1", partial, true, accept), ProcessOutcome::Unchanged));
        assert!(matches!(p.process("msg-1", partial, true, accept), ProcessOutcome::Skipped));

        let done = Some("<thinking>still going</thinking>");
        assert!(matches!(p.process("msg-1", done, true, accept), ProcessOutcome::Rewritten(_)));
        assert!(matches!(p.process("msg-1", done, false, accept), ProcessOutcome::Rewritten(_)));
        assert!(matches!(p.process("msg-1", done, false, accept), ProcessOutcome::Skipped));
    }

    #[test]
    fn test_block_ids_are_scoped_to_the_message() {
        let mut p = processor();
        for id in ["m1", "m2"] {
            match p.process(id, Some("<thinking>t</thinking>"), false, accept) {
                ProcessOutcome::Rewritten(o) => {
                    assert_eq!(o.blocks[0].id, "thinking-1");
                    assert!(o.text.contains(&format!(r#"id="{}--thinking-1""#, id)));
                }
                other => panic!("Expected Rewritten, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_edited_final_message_is_rewritten_again() {
        let mut p = processor();
        assert!(matches!(
            p.process("m1", Some("<error>a</error>"), false, accept),
            ProcessOutcome::Rewritten(_)
        ));
        match p.process("m1", Some("<error>a, edited</error>"), false, accept) {
            ProcessOutcome::Rewritten(o) => assert_eq!(o.blocks[0].body, "a, edited"),
            other => panic!("Expected Rewritten, got {:?}", other),
        }
    }

    #[test]
    fn test_entity_decoding_is_opt_in() {
        let encoded = "&lt;error&gt;boom&lt;/error&gt;";
        assert!(processor().render_text(encoded).unwrap().is_none());

        let config = MarkupConfig {
            decode_entities: true,
            ..MarkupConfig::default()
        };
        let p = MessageProcessor::from_config(&config).unwrap();
        let outcome = p.render_text(encoded).unwrap().unwrap();
        assert_eq!(outcome.blocks[0].body, "boom");
    }

    #[test]
    fn test_reset_forgets_processed_messages() {
        let mut p = processor();
        p.process("msg-1", Some("plain"), false, accept);
        p.reset();
        assert!(matches!(p.process("msg-1", Some("plain"), false, accept), ProcessOutcome::NoMarkup));
    }

    #[test]
    fn test_custom_rule_wins() {
        use crate::markup::rules::RuleConfig;

        let config = MarkupConfig {
            rules: vec![RuleConfig::Template {
                tag: "error".to_string(),
                template: "[ERR {content}]".to_string(),
            }],
            ..MarkupConfig::default()
        };
        let p = MessageProcessor::from_config(&config).unwrap();
        let outcome = p.render_text("<error>x</error>").unwrap().unwrap();
        assert_eq!(outcome.text, "[ERR x]");
    }
}
