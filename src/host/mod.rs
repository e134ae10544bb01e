//! Host integration
//!
//! The rewrite engine never touches a document directly. It asks a
//! [`MessageHost`] for message containers in document order, reads their
//! text, and hands rewritten markup back. [`TranscriptHost`] is the
//! file-backed host used by the CLI; [`Scanner`] runs one re-scan pass over
//! any host.

pub mod page;
pub mod scan;
pub mod transcript;

pub use scan::{ScanReport, Scanner};
pub use transcript::TranscriptHost;

use crate::markup::RewriteOutcome;

/// What the engine needs from the page it decorates
pub trait MessageHost {
    /// Whether the message container exists at all
    ///
    /// When it does not, nothing is observed or processed.
    fn container_present(&self) -> bool;

    /// Ids of all message containers, in document order
    ///
    /// Containers without an id of their own get one assigned.
    fn message_ids(&self) -> Vec<String>;

    /// Current text content of a container
    fn text_of(&self, id: &str) -> Option<&str>;

    /// Whether the container's content is still being appended to
    fn is_streaming(&self, id: &str) -> bool;

    /// Replace the container's rendered content
    fn replace_rendered(&mut self, id: &str, outcome: &RewriteOutcome) -> anyhow::Result<()>;
}
