use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::container::{ContainerInstance, ContainerRuntime};
use crate::error::Result;
use crate::logs::{LogCollector, LogSink, drain_container_output};
use crate::probe::{HealthProber, PollOutcome};

/// Resolves once an external shutdown has been requested; never resolves if
/// the sender side is gone (shutdown can no longer happen).
pub async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            futures_util::future::pending::<()>().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    StartupTimeout,
    HealthCheckFailed,
    RuntimeError,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::StartupTimeout => "StartupTimeout",
            Self::HealthCheckFailed => "HealthCheckFailed",
            Self::RuntimeError => "RuntimeError",
        };
        f.write_str(name)
    }
}

/// Immutable result of one full start→ready→soak→stop cycle.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub index: u32,
    pub container_id: Option<String>,
    pub log_path: PathBuf,
    pub outcome: Outcome,
    pub duration_seconds: f64,
    pub error_detail: Option<String>,
    /// Secondary warning: stop/remove failed after the outcome was decided.
    /// The host port may still be bound for the next iteration.
    pub teardown_warning: Option<String>,
}

/// Harness-internal intervals, separate from the user-facing RunConfig so
/// tests can shrink every wait to milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_interval: Duration,
    pub soak_probe_interval: Duration,
    pub request_timeout: Duration,
    pub drain_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            soak_probe_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            drain_grace: Duration::from_secs(5),
        }
    }
}

enum SoakVerdict {
    Completed,
    Crashed,
    Interrupted,
}

/// Drives one iteration through the lifecycle:
/// Starting -> Polling -> (Soaking | timeout | crash) -> Stopping -> Finalized.
pub struct IterationController {
    config: Arc<RunConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    timing: Timing,
}

impl IterationController {
    pub fn new(config: Arc<RunConfig>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config,
            runtime,
            timing: Timing::default(),
        }
    }

    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Runs one cycle to completion. Failures of the service under test are
    /// outcomes, not errors; `Err` is reserved for unrecoverable harness
    /// problems (the log artifact cannot be written).
    pub async fn run(
        &self,
        index: u32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<IterationRecord> {
        let started = Instant::now();
        let collector = LogCollector::create(&self.config.log_dir, index).await?;
        let sink = collector.sink();
        let prober = HealthProber::new(self.config.base_url(), self.timing.request_timeout)?;

        sink.write_line(&format!(
            "iteration {index}/{} starting image={}",
            self.config.iterations, self.config.docker_image
        ))
        .await?;

        // Starting
        let instance = match self.runtime.start(self.config.as_ref()).await {
            Ok(instance) => instance,
            Err(e) => {
                warn!(iteration = index, "launch failed: {e}");
                let _ = sink
                    .write_line(&format!("container launch failed: {e}"))
                    .await;
                return self
                    .finalize(
                        collector,
                        index,
                        None,
                        Outcome::RuntimeError,
                        Some(e.to_string()),
                        None,
                        started,
                    )
                    .await;
            }
        };
        let _ = sink
            .write_line(&format!(
                "container {} ({}) started",
                instance.id, instance.name
            ))
            .await;

        // Output draining runs alongside the poll loop; the two tasks share
        // only the log sink and the observed container state.
        let mut drain = tokio::spawn(drain_container_output(
            Arc::clone(&self.runtime),
            instance.clone(),
            collector.sink(),
        ));

        // Polling
        let poll = prober
            .poll_until_ready(
                self.runtime.as_ref(),
                &instance,
                &sink,
                self.config.startup_timeout,
                self.timing.poll_interval,
                shutdown,
            )
            .await;

        let (outcome, error_detail) = match poll {
            Ok(PollOutcome::Ready) => {
                info!(
                    iteration = index,
                    "service ready after {:.1}s, entering soak",
                    started.elapsed().as_secs_f64()
                );
                let _ = sink.write_line("service ready, entering soak").await;
                match self.soak(&prober, &instance, &sink, shutdown).await {
                    SoakVerdict::Completed => (Outcome::Success, None),
                    SoakVerdict::Crashed => (
                        Outcome::RuntimeError,
                        Some("container exited during soak".to_string()),
                    ),
                    SoakVerdict::Interrupted => (
                        Outcome::RuntimeError,
                        Some("interrupted by shutdown request".to_string()),
                    ),
                }
            }
            Ok(PollOutcome::TimedOut) => (
                Outcome::StartupTimeout,
                Some(format!(
                    "service not ready within {}s",
                    self.config.startup_timeout.as_secs()
                )),
            ),
            Ok(PollOutcome::ContainerFailed) => (
                Outcome::HealthCheckFailed,
                Some("container exited before becoming ready".to_string()),
            ),
            Ok(PollOutcome::Interrupted) => (
                Outcome::RuntimeError,
                Some("interrupted by shutdown request".to_string()),
            ),
            Err(e) => (Outcome::RuntimeError, Some(e.to_string())),
        };

        // Stopping. A teardown failure never overwrites the decided outcome.
        let teardown_warning = match self.runtime.stop(&instance).await {
            Ok(()) => {
                let _ = sink.write_line("container stopped and removed").await;
                None
            }
            Err(e) => {
                warn!(iteration = index, "teardown failed: {e}");
                let _ = sink.write_line(&format!("teardown failed: {e}")).await;
                Some(e.to_string())
            }
        };

        // The output stream ends once the container is gone; give the drain
        // a bounded settle window before cutting it loose.
        if timeout(self.timing.drain_grace, &mut drain).await.is_err() {
            drain.abort();
        }

        self.finalize(
            collector,
            index,
            Some(instance.id),
            outcome,
            error_detail,
            teardown_warning,
            started,
        )
        .await
    }

    async fn soak(
        &self,
        prober: &HealthProber,
        instance: &ContainerInstance,
        sink: &LogSink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SoakVerdict {
        let deadline = Instant::now() + self.config.soak_duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return SoakVerdict::Completed;
            }
            let step = remaining.min(self.timing.soak_probe_interval);
            tokio::select! {
                () = sleep(step) => {}
                () = shutdown_requested(shutdown) => return SoakVerdict::Interrupted,
            }
            if Instant::now() >= deadline {
                return SoakVerdict::Completed;
            }

            // Low-frequency liveness re-probe. A failed probe alone is not
            // fatal; the crash must be confirmed by the runtime.
            let probe = prober.check_metrics().await;
            let _ = sink.record_probe(&probe).await;
            if !probe.success
                && let Ok(state) = self.runtime.inspect_state(instance).await
                && state.is_terminal()
            {
                let _ = sink
                    .write_line(&format!("container state {state:?} during soak"))
                    .await;
                return SoakVerdict::Crashed;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        collector: LogCollector,
        index: u32,
        container_id: Option<String>,
        outcome: Outcome,
        error_detail: Option<String>,
        teardown_warning: Option<String>,
        started: Instant,
    ) -> Result<IterationRecord> {
        let duration_seconds = started.elapsed().as_secs_f64();
        let log_path = collector.path().to_path_buf();
        collector.finalize(outcome, duration_seconds).await?;
        info!(iteration = index, outcome = %outcome, "iteration finalized in {duration_seconds:.1}s");
        Ok(IterationRecord {
            index,
            container_id,
            log_path,
            outcome,
            duration_seconds,
            error_detail,
            teardown_warning,
        })
    }
}
