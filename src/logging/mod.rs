// Logging module - tracing subscriber setup
//
// stderr gets human-readable output (stdout is reserved for rendered text in
// `render --output -` and `detect`). An optional JSON file layer writes
// rotating structured logs for later parsing.

use crate::config::{LogRotation, LoggingConfig};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the default filter directive for a configured level
///
/// Precedence: RUST_LOG env var > config file / TAGRENDER_LOG_LEVEL > "info"
pub fn default_filter(level: &str) -> String {
    format!("tagrender={}", level)
}

/// Initialize the global tracing subscriber
///
/// Returns the file writer guard when file logging is active. The guard must
/// be kept alive for the duration of the program so buffered logs flush.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.level).into());

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if !config.file_enabled {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    }

    // Create log directory if it doesn't exist
    if let Err(e) = std::fs::create_dir_all(&config.file_dir) {
        eprintln!(
            "Warning: Could not create log directory {:?}: {}",
            config.file_dir, e
        );
        // Fall back to stderr-only logging
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return None;
    }

    // Create rolling file appender based on configured rotation
    let file_appender = match config.file_rotation {
        LogRotation::Hourly => {
            tracing_appender::rolling::hourly(&config.file_dir, &config.file_prefix)
        }
        LogRotation::Daily => tracing_appender::rolling::daily(&config.file_dir, &config.file_prefix),
        LogRotation::Never => tracing_appender::rolling::never(&config.file_dir, &config.file_prefix),
    };

    // Wrap in non-blocking writer (writes happen in background thread)
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // File layer uses JSON format for structured log parsing
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_to_crate() {
        assert_eq!(default_filter("debug"), "tagrender=debug");
    }

    #[test]
    fn test_default_filter_parses() {
        let directive = default_filter("warn");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
