//! Configuration tests
//!
//! These tests guard the config file format: whatever `to_toml()` writes must
//! parse back into the same settings.

use super::*;
use crate::markup::detect::DetectorMode;
use crate::markup::rewrite::NestingPolicy;
use std::collections::HashMap;

fn no_env(_: &str) -> Option<String> {
    None
}

fn parse(toml_str: &str) -> FileConfig {
    toml::from_str(toml_str).expect("config should parse")
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip tests
// ─────────────────────────────────────────────────────────────────────────────

/// Verify that serialized config can be parsed back.
#[test]
fn test_config_roundtrip_default() {
    let config = Config::default();
    let toml_str = config.to_toml();

    let parsed: Result<FileConfig, _> = toml::from_str(&toml_str);
    assert!(
        parsed.is_ok(),
        "Default config should round-trip.\nTOML:\n{}\nError: {:?}",
        toml_str,
        parsed.err()
    );
}

/// Custom rules survive a write/read cycle as `[[rules]]` tables
#[test]
fn test_config_roundtrip_with_rules() {
    let mut config = Config::default();
    config.markup.rules = vec![
        RuleConfig::Block {
            tag: "scratchpad".to_string(),
            title: "Scratch \"pad\"".to_string(),
            icon: "✎".to_string(),
            copyable: true,
            collapsed: true,
            variant: "custom".to_string(),
        },
        RuleConfig::Template {
            tag: "cite".to_string(),
            template: "<em>{content}</em> ({attr:source})".to_string(),
        },
    ];

    let toml_str = config.to_toml();
    let file = parse(&toml_str);
    assert_eq!(file.rules, config.markup.rules, "TOML:\n{}", toml_str);
}

/// Every non-default value comes back after serialization
#[test]
fn test_config_roundtrip_non_defaults() {
    let mut config = Config::default();
    config.markup.format = OutputFormat::Markdown;
    config.markup.detector_mode = DetectorMode::Permissive;
    config.markup.known_tags = vec!["scratchpad".to_string(), "memo".to_string()];
    config.markup.decode_entities = true;
    config.markup.nesting = NestingPolicy::DeclaredOrder;
    config.markup.max_message_bytes = 4096;
    config.watch.debounce_ms = 250;
    config.watch.poll_interval_ms = 50;
    config.watch.standalone = false;
    config.logging.level = "debug".to_string();
    config.logging.file_enabled = true;
    config.logging.file_dir = std::path::PathBuf::from("C:\\logs\\tagrender");
    config.logging.file_rotation = LogRotation::Hourly;
    config.logging.file_prefix = "tr".to_string();

    let restored = Config::from_parts(parse(&config.to_toml()), no_env);

    assert_eq!(restored.markup.format, OutputFormat::Markdown);
    assert_eq!(restored.markup.detector_mode, DetectorMode::Permissive);
    assert_eq!(restored.markup.known_tags, config.markup.known_tags);
    assert!(restored.markup.decode_entities);
    assert_eq!(restored.markup.nesting, NestingPolicy::DeclaredOrder);
    assert_eq!(restored.markup.max_message_bytes, 4096);
    assert_eq!(restored.watch, config.watch);
    assert_eq!(restored.logging.level, "debug");
    assert!(restored.logging.file_enabled);
    assert_eq!(restored.logging.file_dir, config.logging.file_dir);
    assert_eq!(restored.logging.file_rotation, LogRotation::Hourly);
    assert_eq!(restored.logging.file_prefix, "tr");
}

// ─────────────────────────────────────────────────────────────────────────────
// Precedence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_empty_file_gives_defaults() {
    let config = Config::from_parts(parse(""), no_env);
    let defaults = Config::default();

    assert_eq!(config.markup.format, defaults.markup.format);
    assert_eq!(config.markup.nesting, NestingPolicy::InnermostFirst);
    assert_eq!(config.watch, defaults.watch);
    assert_eq!(config.logging.level, "info");
    assert!(config.markup.rules.is_empty());
}

#[test]
fn test_env_overrides_file() {
    let file = parse(
        r#"
format = "html"

[watch]
debounce_ms = 500

[logging]
level = "warn"
"#,
    );
    let env: HashMap<&str, &str> = [
        ("TAGRENDER_FORMAT", "markdown"),
        ("TAGRENDER_DEBOUNCE_MS", "40"),
        ("TAGRENDER_LOG_LEVEL", "trace"),
    ]
    .into_iter()
    .collect();

    let config = Config::from_parts(file, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.markup.format, OutputFormat::Markdown);
    assert_eq!(config.watch.debounce_ms, 40);
    assert_eq!(config.logging.level, "trace");
}

#[test]
fn test_unparseable_env_debounce_keeps_file_value() {
    let file = parse("[watch]\ndebounce_ms = 500\n");
    let config = Config::from_parts(file, |key| {
        (key == "TAGRENDER_DEBOUNCE_MS").then(|| "soon".to_string())
    });
    assert_eq!(config.watch.debounce_ms, 500);
}

#[test]
fn test_zero_poll_interval_falls_back() {
    let config = Config::from_parts(parse("[watch]\npoll_interval_ms = 0\n"), no_env);
    assert_eq!(config.watch.poll_interval_ms, WatchConfig::default().poll_interval_ms);
}

#[test]
fn test_unknown_rule_type_is_rejected() {
    let parsed: Result<FileConfig, _> =
        toml::from_str("[[rules]]\ntype = \"explode\"\ntag = \"x\"\n");
    assert!(parsed.is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading from disk
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_missing_file_is_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let file = Config::load_file_config(&dir.path().join("absent.toml")).unwrap();
    assert!(file.format.is_none());
    assert!(file.rules.is_empty());
}

#[test]
fn test_broken_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "format = \n[detector\n").unwrap();

    let err = Config::load_file_config(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("config.toml"));
}
