use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::models::{
    ContainerCreateBody, ContainerState as DockerContainerState, ContainerStateStatusEnum,
    DeviceMapping, HostConfig, PortBinding,
};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
    RemoveContainerOptionsBuilder, StartContainerOptions, StopContainerOptionsBuilder,
};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ContainerInstance, ContainerRuntime, ContainerState, OutputStream};
use crate::config::{CONTAINER_MODEL_DIR, RunConfig};
use crate::error::{Error, Result};

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(15);
const MANAGED_BY_LABEL: (&str, &str) = ("managed-by", "vllm-soak-tester");

/// Docker-backed runtime. Only ever manages one instance at a time.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    stop_grace: Duration,
}

impl DockerRuntime {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Launch(format!("cannot connect to docker: {e}")))?;
        Ok(Self {
            docker,
            stop_grace: DEFAULT_STOP_GRACE,
        })
    }

    #[must_use]
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn rocm_device(path: &str) -> DeviceMapping {
    DeviceMapping {
        path_on_host: Some(path.to_string()),
        path_in_container: Some(path.to_string()),
        cgroup_permissions: Some("rwm".to_string()),
    }
}

/// Pure request builder: RunConfig in, container create request out.
fn create_body(config: &RunConfig) -> ContainerCreateBody {
    let port_key = format!("{}/tcp", config.host_port);

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key.clone(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key,
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(config.host_port.to_string()),
        }]),
    );

    let host_config = HostConfig {
        binds: Some(vec![format!(
            "{}:{CONTAINER_MODEL_DIR}",
            config.mount_source.display()
        )]),
        port_bindings: Some(port_bindings),
        ipc_mode: Some("host".to_string()),
        group_add: Some(vec!["video".to_string()]),
        cap_add: Some(vec!["SYS_PTRACE".to_string()]),
        security_opt: Some(vec!["seccomp=unconfined".to_string()]),
        devices: Some(vec![rocm_device("/dev/kfd"), rocm_device("/dev/dri")]),
        ..Default::default()
    };

    ContainerCreateBody {
        image: Some(config.docker_image.clone()),
        cmd: Some(config.vllm_command()),
        exposed_ports: Some(exposed_ports),
        labels: Some(HashMap::from([(
            MANAGED_BY_LABEL.0.to_string(),
            MANAGED_BY_LABEL.1.to_string(),
        )])),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn map_state(state: Option<&DockerContainerState>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState::Starting;
    };
    match state.status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Starting,
        Some(ContainerStateStatusEnum::RUNNING | ContainerStateStatusEnum::PAUSED) => {
            ContainerState::Running
        }
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Starting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Stopping,
        Some(ContainerStateStatusEnum::EXITED) => {
            if state.exit_code.unwrap_or(0) == 0 {
                ContainerState::Stopped
            } else {
                ContainerState::Failed
            }
        }
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Failed,
        _ => {
            if state.running.unwrap_or(false) {
                ContainerState::Running
            } else {
                ContainerState::Starting
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, config: &RunConfig) -> Result<ContainerInstance> {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("vllm-soak-{}", &suffix[..12]);

        let options = CreateContainerOptionsBuilder::default().name(&name).build();
        let created = self
            .docker
            .create_container(Some(options), create_body(config))
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;

        for warning in &created.warnings {
            warn!(container = %name, "create warning: {warning}");
        }

        self.docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| Error::Launch(e.to_string()))?;

        info!(id = %created.id, name = %name, image = %config.docker_image, "container started");

        Ok(ContainerInstance {
            id: created.id,
            name,
            started_at: Utc::now(),
        })
    }

    async fn stream_output(&self, instance: &ContainerInstance) -> Result<OutputStream> {
        // Bounded channel keeps the drain from buffering unboundedly if the
        // sink falls behind.
        let (tx, rx) = mpsc::channel::<Result<Vec<u8>>>(64);
        let docker = self.docker.clone();
        let id = instance.id.clone();

        drop(tokio::spawn(async move {
            let options = LogsOptionsBuilder::default()
                .follow(true)
                .stdout(true)
                .stderr(true)
                .build();
            let mut stream = docker.logs(&id, Some(options));
            while let Some(item) = stream.next().await {
                let chunk = item
                    .map(|out| out.into_bytes().to_vec())
                    .map_err(Error::from);
                let is_err = chunk.is_err();
                if tx.send(chunk).await.is_err() || is_err {
                    break;
                }
            }
        }));

        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }

    async fn stop(&self, instance: &ContainerInstance) -> Result<()> {
        let grace = i32::try_from(self.stop_grace.as_secs()).unwrap_or(i32::MAX);
        let stop_options = StopContainerOptionsBuilder::default().t(grace).build();

        let stop_failure = match self
            .docker
            .stop_container(&instance.id, Some(stop_options))
            .await
        {
            Ok(()) => None,
            Err(e) if is_not_found(&e) => {
                debug!(id = %instance.id, "container already gone on stop");
                return Ok(());
            }
            Err(e) => Some(e),
        };

        // Removal is attempted even when the graceful stop failed, so a
        // lingering container cannot hold the host port across iterations.
        let remove_options = RemoveContainerOptionsBuilder::default().force(true).build();
        match self
            .docker
            .remove_container(&instance.id, Some(remove_options))
            .await
        {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => {
                return Err(Error::Teardown(format!(
                    "failed to remove container {}: {e}",
                    instance.id
                )));
            }
        }

        if let Some(e) = stop_failure {
            warn!(id = %instance.id, "graceful stop failed, container force-removed: {e}");
        }
        info!(id = %instance.id, "container stopped and removed");
        Ok(())
    }

    async fn inspect_state(&self, instance: &ContainerInstance) -> Result<ContainerState> {
        match self
            .docker
            .inspect_container(&instance.id, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => Ok(map_state(response.state.as_ref())),
            Err(e) if is_not_found(&e) => Ok(ContainerState::Stopped),
            Err(e) => Err(e.into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        match self.docker.ping().await {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::Launch(format!("container runtime unreachable: {e}"))),
        }
    }
}
