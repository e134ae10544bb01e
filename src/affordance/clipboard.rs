//! Clipboard sinks for the copy affordance
//!
//! Uses `arboard` crate for cross-platform support (Windows, macOS, Linux).
//! On Linux the copied text is served by the process that set it, so the
//! system sink keeps its handle until it is dropped.

use anyhow::{Context, Result};
use arboard::Clipboard;
use std::io::Write;

/// Somewhere copied text can go
pub trait ClipboardSink {
    fn set_text(&mut self, text: &str) -> Result<()>;
}

/// The system clipboard
///
/// Common failure cases: no display server (headless Linux), permission denied.
#[derive(Default)]
pub struct SystemClipboard {
    clipboard: Option<Clipboard>,
}

impl ClipboardSink for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        if self.clipboard.is_none() {
            self.clipboard = Some(Clipboard::new().context("Failed to access clipboard")?);
        }
        let Some(clipboard) = self.clipboard.as_mut() else {
            anyhow::bail!("Failed to access clipboard");
        };
        clipboard
            .set_text(text)
            .context("Failed to set clipboard text")?;
        Ok(())
    }
}

/// Standard output, for headless sessions and piping
pub struct StdoutSink;

impl ClipboardSink for StdoutSink {
    fn set_text(&mut self, text: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text).context("Failed to write to stdout")?;
        Ok(())
    }
}

/// In-memory clipboard
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Option<String>,
    fail: bool,
}

#[cfg(test)]
impl MemoryClipboard {
    /// A clipboard that rejects every write
    pub fn failing() -> Self {
        Self {
            contents: None,
            fail: true,
        }
    }

    pub fn contents(&self) -> Option<&str> {
        self.contents.as_deref()
    }
}

#[cfg(test)]
impl ClipboardSink for MemoryClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        if self.fail {
            anyhow::bail!("clipboard unavailable");
        }
        self.contents = Some(text.to_string());
        Ok(())
    }
}
