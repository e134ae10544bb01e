//! Watch mode: observe a transcript and keep a rendered copy up to date
//!
//! ```text
//! poll_transcript ──Mutation──► mpsc ──► debounce ──quiet──► Session::refresh
//!   (mtime/len)                         (last-scheduled-wins)   reload → scan → write
//! ```
//!
//! Everything after the channel runs on one task, so the processor state is
//! never touched concurrently.

use crate::config::{Config, WatchConfig};
use crate::host::{MessageHost, ScanReport, Scanner, TranscriptHost};
use crate::markup::MessageProcessor;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Channel capacity between poller and debouncer
const MUTATION_BUFFER: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Mutation source
// ─────────────────────────────────────────────────────────────────────────────

/// A change notification from the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Changed { len: u64 },
    Removed,
}

/// What the poller compares between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn stamp(path: &Path) -> Option<FileStamp> {
    std::fs::metadata(path).ok().map(|meta| FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

/// Poll `path` and send a [`Mutation`] whenever its mtime or length changes
///
/// Returns when the receiving side is dropped.
pub async fn poll_transcript(path: PathBuf, interval: Duration, tx: mpsc::Sender<Mutation>) {
    let mut last = stamp(&path);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let current = stamp(&path);
        if current == last {
            continue;
        }

        let mutation = match current {
            Some(s) => Mutation::Changed { len: s.len },
            None => Mutation::Removed,
        };
        tracing::trace!(path = %path.display(), ?mutation, "Transcript changed");
        last = current;

        if tx.send(mutation).await.is_err() {
            break;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debounce
// ─────────────────────────────────────────────────────────────────────────────

/// Coalesce bursts of notifications into single calls of `on_quiet`
///
/// Each notification pushes the deadline `window` into the future; a pending
/// deadline is replaced, never added to. `on_quiet` runs once the window
/// passes without a new notification. When the channel closes, a pending
/// burst is flushed before returning. Returns the number of `on_quiet` calls.
pub async fn debounce<T, S, F>(
    mut rx: mpsc::Receiver<T>,
    window: Duration,
    shutdown: S,
    mut on_quiet: F,
) -> usize
where
    S: Future<Output = ()>,
    F: FnMut(),
{
    tokio::pin!(shutdown);
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut pending = false;
    let mut fired = 0;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!(pending, "Debouncer shutting down");
                break;
            }
            received = rx.recv() => match received {
                Some(_) => {
                    deadline.as_mut().reset(Instant::now() + window);
                    pending = true;
                }
                None => {
                    if pending {
                        on_quiet();
                        fired += 1;
                    }
                    break;
                }
            },
            _ = &mut deadline, if pending => {
                pending = false;
                on_quiet();
                fired += 1;
            }
        }
    }

    fired
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// One observing session: transcript in, rendered document out
pub struct Session {
    host: TranscriptHost,
    scanner: Scanner,
    output: PathBuf,
    standalone: bool,
}

impl Session {
    pub fn new(host: TranscriptHost, scanner: Scanner, output: PathBuf, standalone: bool) -> Self {
        Self {
            host,
            scanner,
            output,
            standalone,
        }
    }

    /// Scan the current host state and write the document
    pub fn render(&mut self) -> anyhow::Result<ScanReport> {
        let report = self.scanner.scan(&mut self.host);
        self.host.write_document(&self.output, self.standalone)?;
        Ok(report)
    }

    /// Reload the transcript, then scan and write
    ///
    /// A new conversation id clears the processed set first.
    pub fn refresh(&mut self) -> anyhow::Result<ScanReport> {
        if self.host.reload()? {
            tracing::info!(
                conversation = self.host.conversation_id().unwrap_or("-"),
                "Conversation changed, resetting processed state"
            );
            self.scanner.reset();
        }
        self.render()
    }

    /// Refresh, logging instead of failing
    ///
    /// A transcript caught mid-write fails to parse; the next change retries.
    fn refresh_logged(&mut self) {
        match self.refresh() {
            Ok(report) => tracing::info!(
                rewritten = report.rewritten,
                skipped = report.skipped,
                failed = report.failed,
                output = %self.output.display(),
                "Re-rendered transcript"
            ),
            Err(e) => tracing::warn!(error = %e, "Refresh failed, keeping previous output"),
        }
    }
}

/// Run watch mode until Ctrl-C
///
/// If the transcript does not exist at startup, the observer is not
/// installed and this returns immediately.
pub async fn run(transcript: &Path, output: &Path, config: &Config) -> anyhow::Result<()> {
    let host = TranscriptHost::open(transcript, config.markup.format)?;
    if !host.container_present() {
        tracing::error!(
            path = %transcript.display(),
            "Transcript not found, observer not installed"
        );
        return Ok(());
    }

    let scanner = Scanner::new(MessageProcessor::from_config(&config.markup)?);
    let mut session = Session::new(host, scanner, output.to_path_buf(), config.watch.standalone);

    let report = session.render()?;
    tracing::info!(
        rewritten = report.rewritten,
        messages = report.total(),
        output = %output.display(),
        "Initial render complete"
    );

    observe(session, transcript.to_path_buf(), &config.watch).await;
    Ok(())
}

async fn observe(mut session: Session, transcript: PathBuf, config: &WatchConfig) {
    let (tx, rx) = mpsc::channel(MUTATION_BUFFER);
    let poller = tokio::spawn(poll_transcript(
        transcript.clone(),
        Duration::from_millis(config.poll_interval_ms),
        tx,
    ));

    tracing::info!(
        path = %transcript.display(),
        debounce_ms = config.debounce_ms,
        "Watching transcript (Ctrl-C to stop)"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    let refreshes = debounce(
        rx,
        Duration::from_millis(config.debounce_ms),
        shutdown,
        || session.refresh_logged(),
    )
    .await;

    poller.abort();
    tracing::info!(refreshes, "Watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkupConfig;

    // ─────────────────────────────────────────────────────────────────────
    // Debounce (paused clock)
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_refresh() {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(debounce(
            rx,
            Duration::from_millis(100),
            std::future::pending::<()>(),
            || {},
        ));

        for _ in 0..5 {
            tx.send(()).await.unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_fire_separately() {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(debounce(
            rx,
            Duration::from_millis(100),
            std::future::pending::<()>(),
            || {},
        ));

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(()).await.unwrap();
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(tx);

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_burst_flushes_on_close() {
        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(debounce(
            rx,
            Duration::from_millis(100),
            std::future::pending::<()>(),
            || {},
        ));

        tx.send(()).await.unwrap();
        drop(tx);

        assert_eq!(handle.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_burst() {
        let (tx, rx) = mpsc::channel::<()>(8);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(debounce(
            rx,
            Duration::from_millis(100),
            async {
                let _ = stop_rx.await;
            },
            || {},
        ));

        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop_tx.send(()).unwrap();

        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_channel_never_fires() {
        let (tx, rx) = mpsc::channel::<()>(8);
        let handle = tokio::spawn(debounce(
            rx,
            Duration::from_millis(100),
            std::future::pending::<()>(),
            || {},
        ));

        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tx);

        assert_eq!(handle.await.unwrap(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Poller
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_poller_reports_growth_and_removal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        std::fs::write(&path, "{}\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let poller = tokio::spawn(poll_transcript(path.clone(), Duration::from_millis(10), tx));
        // Let the poller take its baseline
        tokio::time::sleep(Duration::from_millis(50)).await;

        std::fs::write(&path, "{}\n{}\n").unwrap();
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some(Mutation::Changed { len: 6 }));

        std::fs::remove_file(&path).unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(second, Some(Mutation::Removed));

        poller.abort();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────

    fn session(dir: &Path, transcript: &str) -> (Session, PathBuf, PathBuf) {
        let input = dir.join("t.json");
        let output = dir.join("out.html");
        std::fs::write(&input, transcript).unwrap();

        let host = TranscriptHost::open(&input, crate::markup::OutputFormat::Html).unwrap();
        let scanner =
            Scanner::new(MessageProcessor::from_config(&MarkupConfig::default()).unwrap());
        (Session::new(host, scanner, output.clone(), false), input, output)
    }

    #[test]
    fn test_session_renders_and_refreshes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, input, output) = session(
            dir.path(),
            r#"{"conversation_id":"c1","messages":[{"id":"m1","content":"<thinking>a","streaming":true}]}"#,
        );

        let first = session.render().unwrap();
        assert_eq!(first.unchanged, 1);
        assert!(std::fs::read_to_string(&output).unwrap().contains("&lt;thinking&gt;a"));

        std::fs::write(
            &input,
            r#"{"conversation_id":"c1","messages":[{"id":"m1","content":"<thinking>a</thinking>"}]}"#,
        )
        .unwrap();
        let second = session.refresh().unwrap();
        assert_eq!(second.rewritten, 1);
        assert!(std::fs::read_to_string(&output).unwrap().contains(r#"id="m1--thinking-1""#));

        assert_eq!(session.refresh().unwrap().skipped, 1);
    }

    #[test]
    fn test_new_conversation_resets_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, input, _) = session(
            dir.path(),
            r#"{"conversation_id":"c1","messages":[{"id":"m1","content":"<error>x</error>"}]}"#,
        );
        assert_eq!(session.render().unwrap().rewritten, 1);

        std::fs::write(
            &input,
            r#"{"conversation_id":"c2","messages":[{"id":"m1","content":"<error>x</error>"}]}"#,
        )
        .unwrap();
        assert_eq!(session.refresh().unwrap().rewritten, 1);
    }

    #[test]
    fn test_refresh_error_on_half_written_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, input, _) = session(
            dir.path(),
            r#"{"conversation_id":"c1","messages":[]}"#,
        );
        std::fs::write(&input, r#"{"conversation_id":"c1","messa"#).unwrap();
        assert!(session.refresh().is_err());
    }

    #[tokio::test]
    async fn test_missing_transcript_is_degraded_mode() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.html");

        run(&dir.path().join("absent.json"), &output, &Config::default())
            .await
            .unwrap();
        assert!(!output.exists());
    }
}
