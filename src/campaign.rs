use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::container::ContainerRuntime;
use crate::error::{Error, Result};
use crate::iteration::{IterationController, IterationRecord, Timing, shutdown_requested};

/// Aggregate counts over a finished campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl CampaignSummary {
    pub fn from_records(records: &[IterationRecord]) -> Self {
        let passed = records.iter().filter(|r| r.outcome.is_success()).count();
        Self {
            total: records.len(),
            passed,
            failed: records.len() - passed,
        }
    }
}

/// Runs the configured number of iterations strictly sequentially, with a
/// cooldown between them. A failed iteration never ends the campaign; only
/// an external shutdown or an unrecoverable harness error does.
pub struct Campaign {
    config: Arc<RunConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    timing: Timing,
}

impl Campaign {
    pub fn new(config: RunConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            config: Arc::new(config),
            runtime,
            timing: Timing::default(),
        }
    }

    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<Vec<IterationRecord>> {
        tokio::fs::create_dir_all(&self.config.log_dir)
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "cannot create log directory {}: {e}",
                    self.config.log_dir.display()
                ))
            })?;
        self.runtime.ping().await?;

        let controller =
            IterationController::new(Arc::clone(&self.config), Arc::clone(&self.runtime))
                .with_timing(self.timing);
        let total = self.config.iterations;
        let mut records = Vec::with_capacity(total as usize);

        for index in 1..=total {
            info!(iteration = index, total, model = %self.config.model_name, "starting iteration");
            let record = controller.run(index, &mut shutdown).await?;
            records.push(record);

            if *shutdown.borrow() {
                warn!("shutdown requested, ending campaign after iteration {index}");
                break;
            }
            if index < total {
                info!(
                    "cooling down for {}s before next iteration",
                    self.config.cooldown.as_secs()
                );
                tokio::select! {
                    () = sleep(self.config.cooldown) => {}
                    () = shutdown_requested(&mut shutdown) => {
                        warn!("shutdown requested during cooldown, ending campaign");
                        break;
                    }
                }
            }
        }

        // A persistent teardown failure can leave the host port occupied;
        // that needs operator attention beyond the per-iteration record.
        for record in &records {
            if let Some(warning) = &record.teardown_warning {
                warn!(
                    iteration = record.index,
                    "teardown failure may leave host port {} bound: {warning}",
                    self.config.host_port
                );
            }
        }

        Ok(records)
    }
}
