use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

pub const CONTAINER_MODEL_DIR: &str = "/app/models";

pub const DEFAULT_DOCKER_IMAGE: &str = "rocm/vllm-dev:nightly";
pub const DEFAULT_HOST_PORT: u16 = 8000;
pub const DEFAULT_TENSOR_PARALLEL_SIZE: u32 = 4;
pub const DEFAULT_NUM_SCHEDULER_STEPS: u32 = 8;
pub const DEFAULT_MAX_MODEL_LEN: u32 = 4096;
pub const DEFAULT_MAX_NUM_SEQS: u32 = 512;
pub const DEFAULT_ITERATIONS: u32 = 5;
pub const DEFAULT_SOAK_SECS: u64 = 30;
pub const DEFAULT_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Immutable parameter set for one soak campaign.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model_path: PathBuf,
    pub model_name: String,
    pub mount_source: PathBuf,
    pub docker_image: String,
    pub host_port: u16,
    pub tensor_parallel_size: u32,
    pub num_scheduler_steps: u32,
    pub max_model_len: u32,
    pub max_num_seqs: u32,
    pub iterations: u32,
    pub startup_timeout: Duration,
    pub soak_duration: Duration,
    pub cooldown: Duration,
    pub log_dir: PathBuf,
}

impl RunConfig {
    pub fn builder(
        model_path: impl AsRef<Path>,
        model_name: impl Into<String>,
    ) -> RunConfigBuilder {
        RunConfigBuilder::new(model_path, model_name)
    }

    /// Final path component of the model directory, as seen from the host.
    pub fn model_dir_name(&self) -> &str {
        // build() guarantees a UTF-8 final component
        self.model_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Model path as the service sees it under the container mount point.
    pub fn container_model_path(&self) -> String {
        format!("{CONTAINER_MODEL_DIR}/{}", self.model_dir_name())
    }

    pub fn base_url(&self) -> String {
        format!("http://localhost:{}", self.host_port)
    }

    /// Ordered argument list handed to the container as its command.
    pub fn vllm_command(&self) -> Vec<String> {
        vec![
            "python3".to_string(),
            "-m".to_string(),
            "vllm.entrypoints.openai.api_server".to_string(),
            "--model".to_string(),
            self.container_model_path(),
            "--served-model-name".to_string(),
            self.model_name.clone(),
            "--trust-remote-code".to_string(),
            "--host".to_string(),
            "0.0.0.0".to_string(),
            "--port".to_string(),
            self.host_port.to_string(),
            "--tensor-parallel-size".to_string(),
            self.tensor_parallel_size.to_string(),
            "--num-scheduler-steps".to_string(),
            self.num_scheduler_steps.to_string(),
            "--max-model-len".to_string(),
            self.max_model_len.to_string(),
            "--max-num-seqs".to_string(),
            self.max_num_seqs.to_string(),
            "--enable-prefix-caching".to_string(),
        ]
    }
}

pub struct RunConfigBuilder {
    model_path: PathBuf,
    model_name: String,
    mount_source: Option<PathBuf>,
    docker_image: String,
    host_port: u16,
    tensor_parallel_size: u32,
    num_scheduler_steps: u32,
    max_model_len: u32,
    max_num_seqs: u32,
    iterations: u32,
    startup_timeout: Duration,
    soak_duration: Duration,
    cooldown: Duration,
    log_dir: PathBuf,
}

impl RunConfigBuilder {
    pub fn new(model_path: impl AsRef<Path>, model_name: impl Into<String>) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            model_name: model_name.into(),
            mount_source: None,
            docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
            host_port: DEFAULT_HOST_PORT,
            tensor_parallel_size: DEFAULT_TENSOR_PARALLEL_SIZE,
            num_scheduler_steps: DEFAULT_NUM_SCHEDULER_STEPS,
            max_model_len: DEFAULT_MAX_MODEL_LEN,
            max_num_seqs: DEFAULT_MAX_NUM_SEQS,
            iterations: DEFAULT_ITERATIONS,
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            soak_duration: Duration::from_secs(DEFAULT_SOAK_SECS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }

    #[must_use]
    pub fn mount_source(mut self, path: impl AsRef<Path>) -> Self {
        self.mount_source = Some(path.as_ref().to_path_buf());
        self
    }

    #[must_use]
    pub fn docker_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = image.into();
        self
    }

    #[must_use]
    pub fn host_port(mut self, port: u16) -> Self {
        self.host_port = port;
        self
    }

    #[must_use]
    pub fn tensor_parallel_size(mut self, n: u32) -> Self {
        self.tensor_parallel_size = n;
        self
    }

    #[must_use]
    pub fn num_scheduler_steps(mut self, n: u32) -> Self {
        self.num_scheduler_steps = n;
        self
    }

    #[must_use]
    pub fn max_model_len(mut self, n: u32) -> Self {
        self.max_model_len = n;
        self
    }

    #[must_use]
    pub fn max_num_seqs(mut self, n: u32) -> Self {
        self.max_num_seqs = n;
        self
    }

    #[must_use]
    pub fn iterations(mut self, n: u32) -> Self {
        self.iterations = n;
        self
    }

    #[must_use]
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    #[must_use]
    pub fn soak_duration(mut self, duration: Duration) -> Self {
        self.soak_duration = duration;
        self
    }

    #[must_use]
    pub fn cooldown(mut self, duration: Duration) -> Self {
        self.cooldown = duration;
        self
    }

    #[must_use]
    pub fn log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn build(self) -> Result<RunConfig> {
        if self.model_name.is_empty() {
            return Err(Error::Config("model name must not be empty".to_string()));
        }
        if self
            .model_path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .is_none()
        {
            return Err(Error::Config(format!(
                "model path {} has no usable final component",
                self.model_path.display()
            )));
        }

        let mount_source = match self.mount_source {
            Some(path) => path,
            None => self
                .model_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .ok_or_else(|| {
                    Error::Config(format!(
                        "cannot derive mount source: model path {} has no parent directory",
                        self.model_path.display()
                    ))
                })?,
        };

        if self.host_port == 0 {
            return Err(Error::Config("port must be greater than zero".to_string()));
        }
        if self.tensor_parallel_size == 0 {
            return Err(Error::Config(
                "tensor parallel size must be at least 1".to_string(),
            ));
        }
        if self.iterations == 0 {
            return Err(Error::Config(
                "test iterations must be at least 1".to_string(),
            ));
        }
        if self.startup_timeout.is_zero() {
            return Err(Error::Config(
                "startup timeout must be greater than zero".to_string(),
            ));
        }

        Ok(RunConfig {
            model_path: self.model_path,
            model_name: self.model_name,
            mount_source,
            docker_image: self.docker_image,
            host_port: self.host_port,
            tensor_parallel_size: self.tensor_parallel_size,
            num_scheduler_steps: self.num_scheduler_steps,
            max_model_len: self.max_model_len,
            max_num_seqs: self.max_num_seqs,
            iterations: self.iterations,
            startup_timeout: self.startup_timeout,
            soak_duration: self.soak_duration,
            cooldown: self.cooldown,
            log_dir: self.log_dir,
        })
    }
}
