// CLI module - command-line argument parsing and handlers
//
// Subcommands:
// - render: rewrite a transcript or text file once
// - detect: report whether text would be rewritten at all
// - watch: keep a rendered copy of a transcript up to date
// - copy: put a copyable block's text on the clipboard (or list blocks)
// - config --show|--path|--reset: configuration management

use crate::affordance::{
    block_text, ClipboardSink, CopyAffordance, StdoutSink, SystemClipboard, ToggleAffordance,
};
use crate::config::{Config, VERSION};
use crate::host::{Scanner, TranscriptHost};
use crate::markup::{MessageProcessor, OutputFormat, RewriteOutcome};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// tagrender - render pseudo-XML tags in chat transcripts
#[derive(Parser)]
#[command(name = "tagrender")]
#[command(version = VERSION)]
#[command(
    about = "Render pseudo-XML tags in chat messages as collapsible blocks or Markdown",
    long_about = None
)]
pub struct Cli {
    /// Config file (default: ~/.config/tagrender/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rewrite a transcript (.json/.jsonl) or a plain text file once
    Render {
        /// Input file, or - for stdin (plain text)
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: html or markdown (overrides config)
        #[arg(long)]
        format: Option<String>,

        /// Emit the rendered messages only, without the surrounding HTML page
        #[arg(long)]
        fragment: bool,
    },

    /// Check whether text contains markup worth rewriting
    Detect {
        /// Input file, or - for stdin
        input: PathBuf,
    },

    /// Watch a transcript and re-render it on every change
    Watch {
        /// Transcript file (.json or .jsonl)
        transcript: PathBuf,

        /// Rendered output file
        #[arg(short, long)]
        output: PathBuf,

        /// Output format: html or markdown (overrides config)
        #[arg(long)]
        format: Option<String>,
    },

    /// Copy the text of a generated block (lists blocks without --block)
    Copy {
        /// Text file, or - for stdin
        input: PathBuf,

        /// Block id, e.g. error-1
        #[arg(long)]
        block: Option<String>,

        /// Print instead of using the system clipboard
        #[arg(long)]
        stdout: bool,

        /// When listing, expand every block and show its text
        #[arg(long)]
        expand: bool,
    },

    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Run a parsed command with loaded configuration
pub async fn run(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Render {
            input,
            output,
            format,
            fragment,
        } => {
            apply_format(&mut config, format.as_deref());
            handle_render(&input, output.as_deref(), !fragment, &config)
        }
        Commands::Detect { input } => handle_detect(&input, &config),
        Commands::Watch {
            transcript,
            output,
            format,
        } => {
            apply_format(&mut config, format.as_deref());
            crate::watch::run(&transcript, &output, &config).await
        }
        Commands::Copy {
            input,
            block,
            stdout,
            expand,
        } => handle_copy(&input, block.as_deref(), stdout, expand, &config).await,
        Commands::Config { show, reset, path } => {
            if path {
                handle_config_path()
            } else if show {
                handle_config_show(&config);
                Ok(())
            } else if reset {
                handle_config_reset()
            } else {
                // No flag provided, show help
                println!("Usage: tagrender config [--show|--reset|--path]");
                println!();
                println!("Options:");
                println!("  --show    Display effective configuration");
                println!("  --reset   Reset config file to defaults");
                println!("  --path    Show config file path");
                Ok(())
            }
        }
    }
}

fn apply_format(config: &mut Config, format: Option<&str>) {
    if let Some(format) = format {
        config.markup.format = OutputFormat::from_str(format);
    }
}

/// Read a file, or stdin for `-`
fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("Cannot read {}", input.display()))
}

fn is_transcript(input: &Path) -> bool {
    matches!(
        input.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) if path != Path::new("-") => std::fs::write(path, text)
            .with_context(|| format!("Cannot write output {}", path.display())),
        _ => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// render / detect / copy
// ─────────────────────────────────────────────────────────────────────────────

fn handle_render(input: &Path, output: Option<&Path>, standalone: bool, config: &Config) -> Result<()> {
    let processor = MessageProcessor::from_config(&config.markup)?;
    let source = read_input(input)?;

    let rendered = if is_transcript(input) {
        let mut host = TranscriptHost::from_str(&source, config.markup.format)
            .with_context(|| format!("Cannot parse transcript {}", input.display()))?;
        let mut scanner = Scanner::new(processor);
        let report = scanner.scan(&mut host);
        tracing::info!(
            messages = report.total(),
            rewritten = report.rewritten,
            failed = report.failed,
            "Rendered transcript"
        );
        host.render_document(standalone)
    } else {
        match processor.render_text(&source)? {
            Some(outcome) => {
                tracing::info!(
                    replaced = outcome.replaced,
                    stripped = outcome.stripped,
                    blocks = outcome.blocks.len(),
                    "Rendered text"
                );
                outcome.text
            }
            None => {
                tracing::info!("No markup detected, passing text through");
                source
            }
        }
    };

    write_output(output, &rendered)
}

fn handle_detect(input: &Path, config: &Config) -> Result<()> {
    let processor = MessageProcessor::from_config(&config.markup)?;
    let mut text = read_input(input)?;
    if config.markup.decode_entities {
        text = crate::markup::detect::decode_entities(&text);
    }

    match processor.detector().matched_predicate(Some(&text)) {
        Some(detection) => println!("true ({})", detection.as_str()),
        None => println!("false"),
    }
    Ok(())
}

/// One header line per block, with the text of expanded blocks below it
fn block_listing(outcome: &RewriteOutcome, expand: bool) -> String {
    let mut out = String::new();
    for b in &outcome.blocks {
        let mut toggle = ToggleAffordance::for_block(b);
        if expand && !toggle.is_expanded() {
            toggle.toggle();
        }
        let copy = CopyAffordance::for_block(b).map(|c| c.glyph()).unwrap_or(" ");
        out.push_str(&format!("{} {} {:<24} {}\n", toggle.glyph(), copy, b.id, b.title));
        if expand && toggle.is_expanded() {
            for line in block_text(&b.body).lines() {
                out.push_str(&format!("    {}\n", line));
            }
        }
    }
    out
}

async fn handle_copy(
    input: &Path,
    block: Option<&str>,
    to_stdout: bool,
    expand: bool,
    config: &Config,
) -> Result<()> {
    let processor = MessageProcessor::from_config(&config.markup)?;
    let source = read_input(input)?;
    let Some(outcome) = processor.render_text(&source)? else {
        anyhow::bail!("No markup detected in {}", input.display());
    };

    let Some(block_id) = block else {
        print!("{}", block_listing(&outcome, expand));
        return Ok(());
    };

    let generated = outcome
        .block(block_id)
        .with_context(|| format!("No block with id {}", block_id))?;
    let mut copy = CopyAffordance::for_block(generated)
        .with_context(|| format!("Block {} is not copyable", block_id))?;

    let mut sink: Box<dyn ClipboardSink> = if to_stdout {
        Box::new(StdoutSink)
    } else {
        Box::new(SystemClipboard::default())
    };
    copy.copy(sink.as_mut(), Instant::now())?;

    if !to_stdout {
        eprintln!("{} Copied {} ({} bytes)", copy.glyph(), block_id, copy.text().len());
        // The clipboard handle lives in `sink`; hold it until the indicator reverts
        while !copy.tick(Instant::now()) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracing::debug!(block = block_id, glyph = copy.glyph(), "Copy indicator reverted");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// config
// ─────────────────────────────────────────────────────────────────────────────

fn handle_config_path() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;
    println!("{}", path.display());
    Ok(())
}

fn handle_config_show(config: &Config) {
    println!("# Effective configuration (env > file > defaults)");
    println!();
    print!("{}", config.to_toml());

    // Show source info
    println!();
    if let Some(path) = Config::config_path() {
        if path.exists() {
            println!("# Source: {}", path.display());
        } else {
            println!("# Source: defaults (no config file)");
        }
    }
}

fn handle_config_reset() -> Result<()> {
    let path = Config::config_path().context("Could not determine config path")?;

    // Confirm if file exists
    if path.exists() {
        eprint!(
            "Config file exists at {}. Overwrite? [y/N] ",
            path.display()
        );
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    // Create parent directory
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Error creating directory {}", parent.display()))?;
    }

    // Write the default config (using Config's single source of truth)
    std::fs::write(&path, Config::default().to_toml())
        .with_context(|| format!("Error writing config {}", path.display()))?;

    println!("Config reset to defaults: {}", path.display());
    Ok(())
}
