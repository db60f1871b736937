use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::container::{ContainerInstance, ContainerRuntime};
use crate::error::Result;
use crate::iteration::Outcome;
use crate::probe::ProbeResult;

/// Shared append handle. Safe for concurrent use from the drain task and
/// the poll loop; each call appends a whole chunk or line.
#[derive(Clone)]
pub struct LogSink {
    writer: Arc<Mutex<BufWriter<File>>>,
}

impl LogSink {
    pub async fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(chunk).await?;
        Ok(())
    }

    pub async fn write_line(&self, line: &str) -> Result<()> {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.write_chunk(format!("[{stamp}] {line}\n").as_bytes())
            .await
    }

    pub async fn record_probe(&self, probe: &ProbeResult) -> Result<()> {
        let stamp = probe
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let status = probe
            .http_status
            .map_or_else(|| "none".to_string(), |s| s.to_string());
        self.write_chunk(
            format!(
                "[{stamp}] probe endpoint={} status={status} success={}\n",
                probe.endpoint, probe.success
            )
            .as_bytes(),
        )
        .await
    }

    pub async fn flush(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        Ok(())
    }
}

/// Owns the per-iteration log artifact. The file exists from `create` and is
/// flushed by `finalize` on every exit path of an iteration.
pub struct LogCollector {
    path: PathBuf,
    sink: LogSink,
}

impl LogCollector {
    pub async fn create(dir: &Path, index: u32) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!("iteration-{index:02}-{stamp}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            sink: LogSink {
                writer: Arc::new(Mutex::new(BufWriter::new(file))),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sink(&self) -> LogSink {
        self.sink.clone()
    }

    pub async fn finalize(self, outcome: Outcome, duration_seconds: f64) -> Result<()> {
        self.sink
            .write_line(&format!(
                "iteration summary outcome={outcome} duration_s={duration_seconds:.1}"
            ))
            .await?;
        self.sink.flush().await
    }
}

/// Copies the container's combined output into the sink, chunk by chunk,
/// until the stream ends or the sink fails.
pub async fn drain_container_output(
    runtime: Arc<dyn ContainerRuntime>,
    instance: ContainerInstance,
    sink: LogSink,
) {
    let mut stream = match runtime.stream_output(&instance).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(id = %instance.id, "cannot stream container output: {e}");
            return;
        }
    };
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = sink.write_chunk(&bytes).await {
                    warn!(id = %instance.id, "log write failed, stopping drain: {e}");
                    break;
                }
            }
            Err(e) => {
                debug!(id = %instance.id, "container output stream ended: {e}");
                break;
            }
        }
    }
}
