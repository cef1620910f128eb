//! Log-tail adapter: follows an append-only text file, checkpointing a
//! byte offset to a local path every N lines or T seconds so a restart
//! resumes without re-emitting already-seen lines.
//!
//! Grounded on `rootsignal-scout`'s checkpoint-and-resume run-log pattern
//! (persisted offset survives process restart); the tail-follow loop
//! itself is standard `tokio::fs` polling since the precedent has no
//! streaming-file-read analogue.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use zen_common::{Provenance, RawEvent};

use crate::{Adapter, AdapterError, AdapterHealth, HealthState};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHECKPOINT_EVERY_LINES: u64 = 100;
const CHECKPOINT_EVERY: Duration = Duration::from_secs(5);
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// How far back from `offset` to probe for the previously-checkpointed
/// line when verifying the file hasn't been rewritten underneath us.
const REWRITE_PROBE_BYTES: u64 = 8192;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Checkpoint {
    offset: u64,
    last_line_hash: Option<String>,
}

fn hash_line(line: &str) -> String {
    hex::encode(Sha256::digest(line.as_bytes()))
}

pub struct LogTailAdapter {
    source_name: String,
    file_path: PathBuf,
    checkpoint_path: PathBuf,
    config_version: u64,
    health: Arc<AdapterHealth>,
}

impl LogTailAdapter {
    pub fn new(
        source_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        checkpoint_path: impl Into<PathBuf>,
        config_version: u64,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            file_path: file_path.into(),
            checkpoint_path: checkpoint_path.into(),
            config_version,
            health: Arc::new(AdapterHealth::new()),
        }
    }

    async fn read_checkpoint(&self) -> Checkpoint {
        match tokio::fs::read_to_string(&self.checkpoint_path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
            Err(_) => Checkpoint::default(),
        }
    }

    async fn write_checkpoint(&self, offset: u64, last_line_hash: Option<String>) {
        if let Some(parent) = self.checkpoint_path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let checkpoint = Checkpoint { offset, last_line_hash };
        let Ok(serialized) = serde_json::to_string(&checkpoint) else {
            return;
        };
        let tmp = self.checkpoint_path.with_extension("tmp");
        if tokio::fs::write(&tmp, serialized).await.is_ok() {
            let _ = tokio::fs::rename(&tmp, &self.checkpoint_path).await;
        }
    }

    /// Detect a log file that was truncated and rewritten between restarts
    /// at the same byte offset: reread the line immediately preceding
    /// `checkpoint.offset` and compare its hash against what was recorded.
    /// A file shorter than the checkpoint, or a mismatched hash, means the
    /// content changed and the offset can't be trusted.
    async fn verify_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        let Some(expected_hash) = &checkpoint.last_line_hash else {
            return true;
        };
        if checkpoint.offset == 0 {
            return true;
        }
        let Ok(mut file) = tokio::fs::File::open(&self.file_path).await else {
            return false;
        };
        let probe_start = checkpoint.offset.saturating_sub(REWRITE_PROBE_BYTES);
        if file.seek(SeekFrom::Start(probe_start)).await.is_err() {
            return false;
        }
        let probe_len = (checkpoint.offset - probe_start) as usize;
        let mut buf = vec![0u8; probe_len];
        if file.read_exact(&mut buf).await.is_err() {
            return false;
        }
        let text = String::from_utf8_lossy(&buf);
        let last_line = text.trim_end_matches('\n').rsplit('\n').next().unwrap_or("");
        &hash_line(last_line) == expected_hash
    }
}

#[async_trait]
impl Adapter for LogTailAdapter {
    async fn run(&self, out: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), AdapterError> {
        let mut backoff = BACKOFF_BASE;
        let mut checkpoint = self.read_checkpoint().await;
        if !self.verify_checkpoint(&checkpoint).await {
            warn!(
                source = %self.source_name,
                offset = checkpoint.offset,
                "log-tail checkpoint no longer matches file content, rereading from start"
            );
            checkpoint = Checkpoint::default();
        }
        let mut offset = checkpoint.offset;
        let mut last_line_hash = checkpoint.last_line_hash;

        'outer: loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let file = match tokio::fs::File::open(&self.file_path).await {
                Ok(f) => f,
                Err(e) => {
                    self.health.mark_degraded(format!("open: {e}"));
                    warn!(source = %self.source_name, error = %e, "log-tail open failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                    continue;
                }
            };
            self.health.mark_ok();
            backoff = BACKOFF_BASE;

            let mut reader = BufReader::new(file);
            if reader.seek(SeekFrom::Start(offset)).await.is_err() {
                offset = 0;
                last_line_hash = None;
                let _ = reader.seek(SeekFrom::Start(0)).await;
            }

            let mut lines_since_checkpoint = 0u64;
            let mut last_checkpoint = tokio::time::Instant::now();
            let mut line = String::new();

            loop {
                if cancel.is_cancelled() {
                    self.write_checkpoint(offset, last_line_hash.clone()).await;
                    return Ok(());
                }

                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.write_checkpoint(offset, last_line_hash.clone()).await;
                                return Ok(());
                            }
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        }
                    }
                    Ok(n) => {
                        offset += n as u64;
                        let trimmed = line.trim_end_matches('\n');
                        if !trimmed.is_empty() {
                            last_line_hash = Some(hash_line(trimmed));
                            let event = RawEvent {
                                source_name: self.source_name.clone(),
                                received_at: chrono::Utc::now(),
                                payload: serde_json::json!({ "line": trimmed }),
                                provenance: Provenance::default(),
                                delivery_attempt: 1,
                                config_version: self.config_version,
                            };
                            if out.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        lines_since_checkpoint += 1;
                        if lines_since_checkpoint >= CHECKPOINT_EVERY_LINES
                            || last_checkpoint.elapsed() >= CHECKPOINT_EVERY
                        {
                            self.write_checkpoint(offset, last_line_hash.clone()).await;
                            lines_since_checkpoint = 0;
                            last_checkpoint = tokio::time::Instant::now();
                        }
                    }
                    Err(e) => {
                        self.health.mark_degraded(format!("read: {e}"));
                        warn!(source = %self.source_name, error = %e, "log-tail read error, reopening");
                        self.write_checkpoint(offset, last_line_hash.clone()).await;
                        continue 'outer;
                    }
                }
            }
        }
    }

    fn health(&self) -> HealthState {
        self.health.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resumes_from_persisted_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("app.log");
        let checkpoint_path = dir.path().join("app.log.checkpoint");
        tokio::fs::write(&log_path, "line1\nline2\nline3\n").await.unwrap();

        let adapter = LogTailAdapter::new("svc", &log_path, &checkpoint_path, 1);
        adapter.write_checkpoint(12, Some(hash_line("line2"))).await; // skip "line1\nline2\n"
        let checkpoint = adapter.read_checkpoint().await;
        assert_eq!(checkpoint.offset, 12);
        assert_eq!(checkpoint.last_line_hash, Some(hash_line("line2")));
    }

    #[tokio::test]
    async fn checkpoint_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_path = dir.path().join("c");
        let adapter = LogTailAdapter::new("svc", dir.path().join("f"), &checkpoint_path, 1);
        adapter.write_checkpoint(42, Some("deadbeef".to_string())).await;
        let checkpoint = adapter.read_checkpoint().await;
        assert_eq!(checkpoint.offset, 42);
        assert_eq!(checkpoint.last_line_hash, Some("deadbeef".to_string()));
    }

    /// Process crashes mid-file after 500 of 1000 lines were delivered and
    /// checkpointed. On restart, the adapter resumes right after the
    /// checkpointed line: no line is lost and none is redelivered.
    #[tokio::test]
    async fn crash_and_restart_resumes_without_losing_or_duplicating_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("app.log");
        let checkpoint_path = dir.path().join("app.log.checkpoint");

        let lines: Vec<String> = (1..=1000).map(|n| format!("line-{n}")).collect();
        let contents: String = lines.iter().map(|l| format!("{l}\n")).collect();
        tokio::fs::write(&log_path, &contents).await.unwrap();

        let prefix: String = lines[..500].iter().map(|l| format!("{l}\n")).collect();
        let crash_offset = prefix.len() as u64;
        let last_persisted_line = &lines[499];

        let adapter = LogTailAdapter::new("svc", &log_path, &checkpoint_path, 1);
        adapter.write_checkpoint(crash_offset, Some(hash_line(last_persisted_line))).await;

        let (tx, mut rx) = mpsc::channel(2048);
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { adapter.run(tx, run_cancel).await });

        let mut collected = Vec::new();
        loop {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(event)) => collected.push(event.payload["line"].as_str().unwrap().to_string()),
                Ok(None) => break,
                Err(_) => break,
            }
        }
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(collected.len(), 500, "no line lost and none redelivered across the restart");
        assert_eq!(collected, lines[500..].to_vec());
    }

    #[tokio::test]
    async fn verify_checkpoint_accepts_a_matching_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("app.log");
        let checkpoint_path = dir.path().join("app.log.checkpoint");
        tokio::fs::write(&log_path, "line1\nline2\n").await.unwrap();

        let adapter = LogTailAdapter::new("svc", &log_path, &checkpoint_path, 1);
        let checkpoint = Checkpoint {
            offset: 12,
            last_line_hash: Some(hash_line("line2")),
        };
        assert!(adapter.verify_checkpoint(&checkpoint).await);
    }

    #[tokio::test]
    async fn verify_checkpoint_rejects_a_rewritten_file_at_the_same_offset() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("app.log");
        let checkpoint_path = dir.path().join("app.log.checkpoint");
        tokio::fs::write(&log_path, "line1\nline2\n").await.unwrap();

        let adapter = LogTailAdapter::new("svc", &log_path, &checkpoint_path, 1);
        // Same byte offset (12) as above, but the file was truncated and
        // rewritten with different content in between restarts.
        let checkpoint = Checkpoint {
            offset: 12,
            last_line_hash: Some(hash_line("some-other-line")),
        };
        assert!(!adapter.verify_checkpoint(&checkpoint).await);
    }
}
