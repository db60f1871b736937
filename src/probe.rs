use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use crate::container::{ContainerInstance, ContainerRuntime};
use crate::error::{Error, Result};
use crate::iteration::shutdown_requested;
use crate::logs::LogSink;

pub const METRICS_ENDPOINT: &str = "/metrics";
pub const MODELS_ENDPOINT: &str = "/v1/models";

/// One probe attempt against one endpoint. Transient; only the log line
/// derived from it is persisted.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: &'static str,
    pub http_status: Option<u16>,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Minimal shape of the OpenAI-compatible model listing.
#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    TimedOut,
    ContainerFailed,
    Interrupted,
}

pub struct HealthProber {
    client: reqwest::Client,
    base_url: String,
}

impl HealthProber {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Probe(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Liveness: the process is up and serving anything at all.
    pub async fn check_metrics(&self) -> ProbeResult {
        let timestamp = Utc::now();
        let url = format!("{}{METRICS_ENDPOINT}", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                ProbeResult {
                    endpoint: METRICS_ENDPOINT,
                    http_status: Some(status),
                    success: status == 200,
                    timestamp,
                }
            }
            Err(e) => {
                debug!("metrics probe not reachable: {e}");
                ProbeResult {
                    endpoint: METRICS_ENDPOINT,
                    http_status: None,
                    success: false,
                    timestamp,
                }
            }
        }
    }

    /// Readiness: the model is loaded and the API serves a valid listing.
    pub async fn check_readiness(&self) -> ProbeResult {
        let timestamp = Utc::now();
        let url = format!("{}{MODELS_ENDPOINT}", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let success = if status == 200 {
                    match response.json::<ModelList>().await {
                        Ok(listing) => {
                            let models: Vec<&str> =
                                listing.data.iter().map(|m| m.id.as_str()).collect();
                            debug!(?models, "model listing served");
                            true
                        }
                        Err(e) => {
                            debug!("model listing unparseable: {e}");
                            false
                        }
                    }
                } else {
                    false
                };
                ProbeResult {
                    endpoint: MODELS_ENDPOINT,
                    http_status: Some(status),
                    success,
                    timestamp,
                }
            }
            Err(e) => {
                debug!("readiness probe not reachable: {e}");
                ProbeResult {
                    endpoint: MODELS_ENDPOINT,
                    http_status: None,
                    success: false,
                    timestamp,
                }
            }
        }
    }

    /// Fixed-interval readiness loop. Connection refusals and non-200
    /// responses are "not yet ready"; only the deadline, container death,
    /// or an external shutdown end the wait. The deadline is checked before
    /// each attempt, so a window of 4 intervals yields exactly 4 attempts.
    pub async fn poll_until_ready(
        &self,
        runtime: &dyn ContainerRuntime,
        instance: &ContainerInstance,
        sink: &LogSink,
        timeout: Duration,
        interval: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PollOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Ok(PollOutcome::TimedOut);
            }

            let metrics = self.check_metrics().await;
            sink.record_probe(&metrics).await?;
            let readiness = self.check_readiness().await;
            sink.record_probe(&readiness).await?;
            if metrics.success && readiness.success {
                return Ok(PollOutcome::Ready);
            }

            match runtime.inspect_state(instance).await {
                Ok(state) if state.is_terminal() => {
                    sink.write_line(&format!(
                        "container state {state:?} while waiting for readiness"
                    ))
                    .await?;
                    return Ok(PollOutcome::ContainerFailed);
                }
                Ok(_) => {}
                Err(e) => debug!("inspect failed during readiness poll: {e}"),
            }

            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(interval);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = shutdown_requested(shutdown) => return Ok(PollOutcome::Interrupted),
            }
        }
    }
}
