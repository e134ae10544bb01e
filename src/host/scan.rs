//! One re-scan pass over a host

use super::MessageHost;
use crate::markup::{MessageProcessor, ProcessOutcome};

/// Tally of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub rewritten: usize,
    pub unchanged: usize,
    pub no_markup: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanReport {
    pub fn total(&self) -> usize {
        self.rewritten + self.unchanged + self.no_markup + self.skipped + self.failed
    }

    fn record(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::Skipped => self.skipped += 1,
            ProcessOutcome::NoMarkup => self.no_markup += 1,
            ProcessOutcome::Unchanged => self.unchanged += 1,
            ProcessOutcome::Rewritten(_) => self.rewritten += 1,
            ProcessOutcome::Failed => self.failed += 1,
        }
    }
}

/// Runs the message processor over every container of a host
pub struct Scanner {
    processor: MessageProcessor,
}

impl Scanner {
    pub fn new(processor: MessageProcessor) -> Self {
        Self { processor }
    }

    /// Forget processed containers (new conversation)
    pub fn reset(&mut self) {
        self.processor.reset();
    }

    /// Process all containers in document order
    pub fn scan<H: MessageHost>(&mut self, host: &mut H) -> ScanReport {
        let mut report = ScanReport::default();

        if !host.container_present() {
            tracing::warn!("Message container not present, nothing to scan");
            return report;
        }

        for id in host.message_ids() {
            let text = host.text_of(&id).map(str::to_owned);
            let streaming = host.is_streaming(&id);

            let outcome = self.processor.process(&id, text.as_deref(), streaming, |rewritten| {
                host.replace_rendered(&id, rewritten)
            });

            tracing::trace!(element = %id, outcome = outcome.as_str(), "Scanned message");
            report.record(&outcome);
        }

        tracing::debug!(
            rewritten = report.rewritten,
            unchanged = report.unchanged,
            no_markup = report.no_markup,
            skipped = report.skipped,
            failed = report.failed,
            tracked = self.processor.tracker().len(),
            "Scan complete"
        );
        report
    }
}
