//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;
use crate::markup::rules::RuleConfig;
use serde::Serialize;

/// Quote a string the way TOML expects it
fn quoted(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

/// Wrapper so `[[rules]]` comes out as an array of tables
#[derive(Serialize)]
struct RulesSection<'a> {
    rules: &'a [RuleConfig],
}

impl Config {
    /// Serialize custom rules to `[[rules]]` tables
    pub(super) fn rules_to_toml(&self) -> String {
        if self.markup.rules.is_empty() {
            // Show example comments when no custom rules configured
            return r#"
# [[rules]]
# type = "block"           # block, heading, wrap, template
# tag = "scratchpad"
# title = "Scratchpad"
# icon = "✎"
# copyable = true
# collapsed = false
#
# [[rules]]
# type = "template"
# tag = "cite"
# template = "<span class=\"tr-cite\">{content} ({attr:source})</span>"
"#
            .to_string();
        }

        match toml::to_string(&RulesSection {
            rules: &self.markup.rules,
        }) {
            Ok(rules) => format!("\n{}", rules),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize custom rules");
                String::new()
            }
        }
    }

    /// Generate TOML representation of config
    pub fn to_toml(&self) -> String {
        let known_tags = toml::Value::Array(
            self.markup
                .known_tags
                .iter()
                .map(|t| toml::Value::String(t.clone()))
                .collect(),
        );

        let mut output = format!(
            r#"# tagrender configuration

# Output format: html (collapsible blocks) or markdown
format = {format}

# Detection gate: which messages are worth rewriting
[detector]
mode = {mode}  # strict (markers and known tags only), permissive
known_tags = {known_tags}  # added to the built-in set
decode_entities = {decode}

# Tag rewriting
[rewriter]
nesting = {nesting}  # innermost-first, declared-order
max_message_bytes = {max_bytes}  # 0 = no limit

# Watch mode (tagrender watch)
[watch]
debounce_ms = {debounce}
poll_interval_ms = {poll}
standalone = {standalone}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = {log_level}
# File logging (in addition to stderr)
file_enabled = {log_file_enabled}
file_dir = {log_file_dir}
file_rotation = {log_file_rotation}  # hourly, daily, never
file_prefix = {log_file_prefix}
"#,
            format = quoted(self.markup.format.as_str()),
            mode = quoted(self.markup.detector_mode.as_str()),
            known_tags = known_tags,
            decode = self.markup.decode_entities,
            nesting = quoted(self.markup.nesting.as_str()),
            max_bytes = self.markup.max_message_bytes,
            debounce = self.watch.debounce_ms,
            poll = self.watch.poll_interval_ms,
            standalone = self.watch.standalone,
            log_level = quoted(&self.logging.level),
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = quoted(&self.logging.file_dir.display().to_string()),
            log_file_rotation = quoted(self.logging.file_rotation.as_str()),
            log_file_prefix = quoted(&self.logging.file_prefix),
        );

        output.push_str(
            "\n# ─────────────────────────────────────────────────────────────────────────────\n\
             # CUSTOM RULES (checked before the built-in table, first match per tag wins)\n\
             # ─────────────────────────────────────────────────────────────────────────────\n",
        );
        output.push_str(&self.rules_to_toml());
        output
    }
}
