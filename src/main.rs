use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use vllm_soak_tester::campaign::{Campaign, CampaignSummary};
use vllm_soak_tester::config::{
    DEFAULT_COOLDOWN_SECS, DEFAULT_DOCKER_IMAGE, DEFAULT_HOST_PORT, DEFAULT_ITERATIONS,
    DEFAULT_LOG_DIR, DEFAULT_MAX_MODEL_LEN, DEFAULT_MAX_NUM_SEQS, DEFAULT_NUM_SCHEDULER_STEPS,
    DEFAULT_SOAK_SECS, DEFAULT_STARTUP_TIMEOUT_SECS, DEFAULT_TENSOR_PARALLEL_SIZE, RunConfig,
};
use vllm_soak_tester::container::DockerRuntime;

/// Repeated start/ready/soak/stop cycles against a containerized vLLM
/// service, with one log artifact per iteration.
#[derive(Parser, Debug)]
#[command(name = "vllm-soak-tester", version)]
struct Cli {
    /// Host path of the model directory
    #[arg(long)]
    model_path: PathBuf,

    /// Served model name
    #[arg(long)]
    model_name: String,

    /// Host path mounted at /app/models (default: parent of --model-path)
    #[arg(long)]
    mount_path: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_DOCKER_IMAGE)]
    docker_image: String,

    /// Published host port (also the service port inside the container)
    #[arg(long, default_value_t = DEFAULT_HOST_PORT)]
    port: u16,

    #[arg(long, default_value_t = DEFAULT_TENSOR_PARALLEL_SIZE)]
    tensor_parallel_size: u32,

    #[arg(long, default_value_t = DEFAULT_NUM_SCHEDULER_STEPS)]
    num_scheduler_steps: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_MODEL_LEN)]
    max_model_len: u32,

    #[arg(long, default_value_t = DEFAULT_MAX_NUM_SEQS)]
    max_num_seqs: u32,

    /// Number of start/soak/stop cycles to run
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    test_iterations: u32,

    /// Pause between iterations, seconds
    #[arg(long, default_value_t = DEFAULT_COOLDOWN_SECS)]
    cooldown_time: u64,

    /// Stable-run hold after readiness, seconds
    #[arg(long, default_value_t = DEFAULT_SOAK_SECS)]
    soak_time: u64,

    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Budget for the service to become ready, seconds
    #[arg(long, default_value_t = DEFAULT_STARTUP_TIMEOUT_SECS)]
    startup_timeout: u64,
}

impl Cli {
    fn into_config(self) -> vllm_soak_tester::Result<RunConfig> {
        let mut builder = RunConfig::builder(&self.model_path, self.model_name)
            .docker_image(self.docker_image)
            .host_port(self.port)
            .tensor_parallel_size(self.tensor_parallel_size)
            .num_scheduler_steps(self.num_scheduler_steps)
            .max_model_len(self.max_model_len)
            .max_num_seqs(self.max_num_seqs)
            .iterations(self.test_iterations)
            .cooldown(std::time::Duration::from_secs(self.cooldown_time))
            .soak_duration(std::time::Duration::from_secs(self.soak_time))
            .startup_timeout(std::time::Duration::from_secs(self.startup_timeout))
            .log_dir(self.log_dir);
        if let Some(mount) = self.mount_path {
            builder = builder.mount_source(mount);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.into_config()?;
    let runtime = Arc::new(DockerRuntime::connect()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing teardown before exit");
            let _ = shutdown_tx.send(true);
        }
    }));

    let records = Campaign::new(config, runtime).run(shutdown_rx).await?;

    let summary = CampaignSummary::from_records(&records);
    println!(
        "\ncampaign finished: {}/{} iterations succeeded",
        summary.passed, summary.total
    );
    for record in &records {
        println!(
            "  #{:02}  {:<18} {:>7.1}s  {}",
            record.index,
            record.outcome.to_string(),
            record.duration_seconds,
            record.log_path.display()
        );
        if let Some(detail) = &record.error_detail {
            println!("       detail: {detail}");
        }
        if let Some(warning) = &record.teardown_warning {
            println!("       teardown warning: {warning}");
        }
    }

    Ok(())
}
