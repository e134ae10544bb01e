//! Rewrite engine configuration: output format, detector, rewriter, rules

use crate::markup::detect::DetectorMode;
use crate::markup::rewrite::{NestingPolicy, DEFAULT_MAX_MESSAGE_BYTES};
use crate::markup::rules::{OutputFormat, RuleConfig};
use serde::Deserialize;

/// Everything the message processor is built from
#[derive(Debug, Clone)]
pub struct MarkupConfig {
    /// HTML blocks or Markdown
    pub format: OutputFormat,

    /// How far the detection gate guesses at structure
    pub detector_mode: DetectorMode,

    /// Extra names added to the built-in known tag set
    pub known_tags: Vec<String>,

    /// Decode HTML entities before detection (for hosts that hand out escaped text)
    pub decode_entities: bool,

    /// Order in which nested tags are rewritten
    pub nesting: NestingPolicy,

    /// Messages larger than this are left alone (0 = no limit)
    pub max_message_bytes: usize,

    /// Custom rules, placed ahead of the built-in table
    pub rules: Vec<RuleConfig>,
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Html,
            detector_mode: DetectorMode::Strict,
            known_tags: Vec::new(),
            decode_entities: false,
            nesting: NestingPolicy::InnermostFirst,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            rules: Vec::new(),
        }
    }
}

/// `[detector]` as loaded from file
#[derive(Debug, Deserialize, Default)]
pub struct FileDetector {
    pub mode: Option<String>,
    pub known_tags: Option<Vec<String>>,
    pub decode_entities: Option<bool>,
}

/// `[rewriter]` as loaded from file
#[derive(Debug, Deserialize, Default)]
pub struct FileRewriter {
    pub nesting: Option<String>,
    pub max_message_bytes: Option<usize>,
}

impl MarkupConfig {
    /// Create from file sections with defaults
    pub fn from_file(
        format: Option<String>,
        detector: Option<FileDetector>,
        rewriter: Option<FileRewriter>,
        rules: Vec<RuleConfig>,
    ) -> Self {
        let detector = detector.unwrap_or_default();
        let rewriter = rewriter.unwrap_or_default();
        let defaults = Self::default();

        Self {
            format: format
                .map(|s| OutputFormat::from_str(&s))
                .unwrap_or(defaults.format),
            detector_mode: detector
                .mode
                .map(|s| DetectorMode::from_str(&s))
                .unwrap_or(defaults.detector_mode),
            known_tags: detector.known_tags.unwrap_or(defaults.known_tags),
            decode_entities: detector.decode_entities.unwrap_or(defaults.decode_entities),
            nesting: rewriter
                .nesting
                .map(|s| NestingPolicy::from_str(&s))
                .unwrap_or(defaults.nesting),
            max_message_bytes: rewriter
                .max_message_bytes
                .unwrap_or(defaults.max_message_bytes),
            rules,
        }
    }
}
