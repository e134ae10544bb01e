//! Tag-rewrite engine
//!
//! Turns pseudo-XML tags in chat messages (`<thinking>`, `<function_calls>`,
//! `<error>`, ...) into styled, collapsible HTML blocks or Markdown.
//!
//! # Architecture
//!
//! ```text
//! text → Detector (gate) → Rewriter [RuleTable, TagCounters] → rewritten text
//!                                   ↑
//!        ProcessedTracker decides whether a container is looked at at all
//! ```
//!
//! [`MessageProcessor`] wires the pieces together for one observing session.

pub mod counter;
pub mod detect;
pub mod processor;
pub mod rewrite;
pub mod rules;
pub mod tracker;

pub use processor::{MessageProcessor, ProcessOutcome};
pub use rewrite::{GeneratedBlock, RewriteOutcome};
pub use rules::OutputFormat;
pub use tracker::ElementIds;
