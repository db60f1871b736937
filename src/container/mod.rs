pub mod docker;
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;

use crate::config::RunConfig;
use crate::error::Result;

pub use docker::DockerRuntime;
pub use fake::FakeRuntime;

/// Observed lifecycle state of a container instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl ContainerState {
    /// True once the container can no longer become ready.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// One started container. Owned by exactly one iteration.
#[derive(Debug, Clone)]
pub struct ContainerInstance {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
}

pub type OutputStream = BoxStream<'static, Result<Vec<u8>>>;

/// Narrow capability the harness needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launch a detached service container for this configuration.
    async fn start(&self, config: &RunConfig) -> Result<ContainerInstance>;

    /// Combined stdout+stderr as a lazy chunk stream, from start until stop.
    async fn stream_output(&self, instance: &ContainerInstance) -> Result<OutputStream>;

    /// Graceful stop then removal. Safe to call on an already-gone container.
    async fn stop(&self, instance: &ContainerInstance) -> Result<()>;

    async fn inspect_state(&self, instance: &ContainerInstance) -> Result<ContainerState>;

    /// Reachability check for the runtime itself.
    async fn ping(&self) -> Result<()>;
}
