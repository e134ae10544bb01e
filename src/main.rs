// tagrender - pseudo-XML tag renderer for chat transcripts
//
// Finds tags like <thinking>, <function_calls> and <error> in chat messages
// and rewrites them into collapsible HTML blocks or Markdown.
//
// Architecture:
// - Markup: detection gate, ordered rule table, rewriter, processed-state tracking
// - Host: message containers (a transcript file) the engine reads and decorates
// - Watch: poller + debouncer re-rendering a transcript as it changes
// - Affordance: toggle and copy behaviour of generated blocks
// - Config: env > file > defaults, TOML at ~/.config/tagrender/config.toml

mod affordance;
mod cli;
mod config;
mod host;
mod logging;
mod markup;
mod util;
mod watch;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Ensure config template exists (helps users discover options)
    // Skipped for `config` itself so --reset can ask before writing
    if cli.config.is_none() && !matches!(cli.command, Commands::Config { .. }) {
        Config::ensure_config_exists();
    }

    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing/logging
    // The guard must be kept alive for the duration of the program to ensure logs flush
    let _file_guard = logging::init_tracing(&config.logging);

    tracing::debug!(
        version = config::VERSION,
        format = config.markup.format.as_str(),
        "tagrender starting"
    );

    cli::run(cli.command, config).await
}
