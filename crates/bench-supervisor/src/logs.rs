//! Live log tee from a running pod to a durable file

use bench_core::{ErrorContext, Orchestrator, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const LINE_BUFFER: usize = 1024;

/// Background task copying a pod's output into a log file.
///
/// Nothing is written after [`LogTee::cancel`] returns.
pub struct LogTee {
    path: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<Result<u64>>,
}

impl LogTee {
    /// Start following `pod`, appending each line to `path`
    pub async fn spawn(orchestrator: Arc<dyn Orchestrator>, pod: &str, path: &Path) -> Result<Self> {
        let file = tokio::fs::File::create(path)
            .await
            .with_context_fn(|| format!("failed to create log {}", path.display()))?;

        let cancel = CancellationToken::new();
        let (sender, receiver) = mpsc::channel(LINE_BUFFER);

        let stream_pod = pod.to_string();
        let stream_cancel = cancel.clone();
        let stream = tokio::spawn(async move {
            tokio::select! {
                result = orchestrator.stream_logs(&stream_pod, sender) => {
                    if let Err(e) = result {
                        warn!(pod = %stream_pod, error = %e, "log stream ended with error");
                    }
                }
                _ = stream_cancel.cancelled() => {}
            }
        });

        let handle = tokio::spawn(write_lines(receiver, BufWriter::new(file), cancel.clone(), stream));
        debug!(pod, path = %path.display(), "log tee started");

        Ok(Self {
            path: path.to_path_buf(),
            cancel,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the stream to end on its own, cancelling after `drain`.
    /// Returns the number of lines written.
    pub async fn finish(self, drain: Duration) -> u64 {
        let cancel = self.cancel.clone();
        let mut handle = self.handle;
        match tokio::time::timeout(drain, &mut handle).await {
            Ok(joined) => lines_written(joined),
            Err(_) => {
                debug!(path = %self.path.display(), "log stream still open after drain timeout, cancelling");
                cancel.cancel();
                lines_written(handle.await)
            }
        }
    }

    /// Stop streaming and wait until the writer has flushed
    pub async fn cancel(self) -> u64 {
        self.cancel.cancel();
        lines_written(self.handle.await)
    }
}

fn lines_written(joined: std::result::Result<Result<u64>, tokio::task::JoinError>) -> u64 {
    match joined {
        Ok(Ok(lines)) => lines,
        Ok(Err(e)) => {
            warn!(error = %e, "log tee failed");
            0
        }
        Err(e) => {
            warn!(error = %e, "log tee task panicked");
            0
        }
    }
}

async fn write_lines(
    mut receiver: mpsc::Receiver<String>,
    mut writer: BufWriter<tokio::fs::File>,
    cancel: CancellationToken,
    stream: JoinHandle<()>,
) -> Result<u64> {
    let mut lines = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = receiver.recv() => match line {
                Some(line) => {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    lines += 1;
                }
                None => break,
            },
        }
    }

    stream.abort();
    writer.flush().await?;
    debug!(lines, "log tee finished");
    Ok(lines)
}
