//! Configuration for the tag renderer
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/tagrender/config.toml)
//! 3. Built-in defaults (lowest priority)

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod markup;
mod observability;
mod serialization;
mod watch;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use markup::{FileDetector, FileRewriter, MarkupConfig};
pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use watch::{FileWatch, WatchConfig};

use crate::markup::rules::{OutputFormat, RuleConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Detector, rewriter and rule settings
    pub markup: MarkupConfig,

    /// Observer settings for watch mode
    pub watch: WatchConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (every field optional)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    /// Output format: "html" or "markdown"
    pub format: Option<String>,

    /// Optional [detector] section
    pub detector: Option<FileDetector>,

    /// Optional [rewriter] section
    pub rewriter: Option<FileRewriter>,

    /// Optional [[rules]] entries
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    /// Optional [watch] section
    pub watch: Option<FileWatch>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Get the config file path: ~/.config/tagrender/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("tagrender").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        // Don't overwrite existing config
        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Silently fail - config is optional
            }
        }

        // Write config (ignore errors - config is optional)
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Read and parse a config file
    ///
    /// A missing file means defaults. A file that exists but cannot be read
    /// or parsed is an error: a broken config should fail fast, not silently
    /// fall back to defaults while the user debugs the wrong thing.
    pub(crate) fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).with_context(|| {
                format!(
                    "Failed to parse configuration file {}\n  \
                     Tip: check for missing quotes, invalid booleans (use true/false), \
                     or typos in section names",
                    path.display()
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
            Err(e) => Err(e)
                .with_context(|| format!("Cannot read configuration file {}", path.display())),
        }
    }

    /// Load configuration: env vars > file (explicit path or default location) > defaults
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match explicit_path {
            // An explicitly named file has to exist
            Some(path) if !path.exists() => {
                anyhow::bail!("Configuration file {} not found", path.display())
            }
            Some(path) => Self::load_file_config(path)?,
            None => match Self::config_path() {
                Some(path) => Self::load_file_config(&path)?,
                None => FileConfig::default(),
            },
        };
        Ok(Self::from_parts(file, |key| std::env::var(key).ok()))
    }

    /// Merge a parsed file with environment overrides
    pub(crate) fn from_parts<F>(file: FileConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut markup =
            MarkupConfig::from_file(file.format, file.detector, file.rewriter, file.rules);
        let mut watch = WatchConfig::from_file(file.watch);
        let mut logging = LoggingConfig::from_file(file.logging);

        // Output format: env > file > default
        if let Some(format) = env("TAGRENDER_FORMAT") {
            markup.format = OutputFormat::from_str(&format);
        }

        // Debounce window: env > file > default
        if let Some(ms) = env("TAGRENDER_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            watch.debounce_ms = ms;
        }

        // Log level: env > file > default (RUST_LOG still wins at subscriber level)
        if let Some(level) = env("TAGRENDER_LOG_LEVEL") {
            logging.level = level;
        }

        Self {
            markup,
            watch,
            logging,
        }
    }
}
