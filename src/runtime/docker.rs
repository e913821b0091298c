use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, RenameContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, HostConfig,
    PortBinding as DockerPortBinding, PortMap,
};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::BytesMut;
use futures::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ExecOutput, ListFilter, LogStream, Mount,
    PortBinding, RuntimeError,
};

const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Docker Engine API backed runtime.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to `docker_host` (`unix://…`, `tcp://…`, `http://…`) or to the
    /// platform defaults when none is given.
    pub fn connect(docker_host: Option<&str>) -> Result<Self, RuntimeError> {
        let docker = match docker_host {
            None => Docker::connect_with_local_defaults(),
            Some(host) if host.starts_with("unix://") => {
                Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            Some(host) => Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION),
        }
        .map_err(map_error)?;
        info!(host = docker_host.unwrap_or("local defaults"), "Docker client configured.");
        Ok(Self { docker })
    }
}

fn map_error(err: DockerError) -> RuntimeError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        DockerError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api(format!("{status_code}: {message}")),
        err @ (DockerError::IOError { .. }
        | DockerError::HyperResponseError { .. }
        | DockerError::HyperLegacyError { .. }
        | DockerError::RequestTimeoutError
        | DockerError::SocketNotFoundError(_)) => RuntimeError::Unavailable(err.to_string()),
        other => RuntimeError::Api(other.to_string()),
    }
}

/// Docker answers 304 when the container already is in the requested state.
fn already_in_state(result: Result<(), DockerError>) -> Result<(), RuntimeError> {
    match result {
        Err(DockerError::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        other => other.map_err(map_error),
    }
}

fn status_label(status: &ContainerStateStatusEnum) -> &'static str {
    match status {
        ContainerStateStatusEnum::CREATED => "created",
        ContainerStateStatusEnum::RUNNING => "running",
        ContainerStateStatusEnum::PAUSED => "paused",
        ContainerStateStatusEnum::RESTARTING => "restarting",
        ContainerStateStatusEnum::REMOVING => "removing",
        ContainerStateStatusEnum::EXITED => "exited",
        ContainerStateStatusEnum::DEAD => "dead",
        _ => "unknown",
    }
}

fn collect_bindings(map: Option<&PortMap>, into: &mut Vec<PortBinding>) {
    let Some(map) = map else {
        return;
    };
    for (key, bindings) in map {
        let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
        let Ok(container_port) = port.parse::<u16>() else {
            continue;
        };
        for binding in bindings.iter().flatten() {
            let Some(host_port) = binding
                .host_port
                .as_deref()
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            let candidate = PortBinding {
                container_port,
                protocol: protocol.to_string(),
                host_port,
            };
            if !into.contains(&candidate) {
                into.push(candidate);
            }
        }
    }
}

fn to_info(resp: ContainerInspectResponse) -> ContainerInfo {
    let config = resp.config.unwrap_or_default();
    let state = resp
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(status_label)
        .unwrap_or("unknown")
        .to_string();

    let mounts = resp
        .mounts
        .unwrap_or_default()
        .into_iter()
        .filter_map(|m| match (m.source, m.destination) {
            (Some(source), Some(destination)) => Some(Mount {
                source,
                destination,
            }),
            _ => None,
        })
        .collect();

    // Stopped containers have no live NetworkSettings ports, but still carry
    // their configured bindings in HostConfig.
    let mut ports = Vec::new();
    collect_bindings(
        resp.network_settings.as_ref().and_then(|n| n.ports.as_ref()),
        &mut ports,
    );
    collect_bindings(
        resp.host_config.as_ref().and_then(|h| h.port_bindings.as_ref()),
        &mut ports,
    );
    ports.sort_by_key(|p| (p.container_port, p.host_port));

    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp
            .name
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: config.image.or(resp.image).unwrap_or_default(),
        state,
        labels: config.labels.unwrap_or_default(),
        env: config.env.unwrap_or_default(),
        mounts,
        ports,
        memory_bytes: resp.host_config.and_then(|h| h.memory),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut filters = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert(
                "label".to_string(),
                filter
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>(),
            );
        }
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        let mut containers = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else {
                continue;
            };
            match self.inspect(&id).await {
                Ok(info) => containers.push(info),
                // Removed between list and inspect.
                Err(RuntimeError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(containers)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let resp = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;
        Ok(to_info(resp))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|(container_port, _)| (format!("{container_port}/tcp"), HashMap::new()))
            .collect();
        let port_bindings: PortMap = spec
            .ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    format!("{container_port}/tcp"),
                    Some(vec![DockerPortBinding {
                        host_ip: None,
                        host_port: Some(host_port.to_string()),
                    }]),
                )
            })
            .collect();
        let binds = spec
            .binds
            .iter()
            .map(|(host, container)| format!("{host}:{container}:rw"))
            .collect();

        let host_config = HostConfig {
            binds: Some(binds),
            port_bindings: Some(port_bindings),
            memory: spec.memory_mb.map(|mb| i64::from(mb) * 1024 * 1024),
            ..Default::default()
        };
        let config = Config::<String> {
            image: Some(spec.image.clone()),
            env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        debug!(container_id = %created.id, name = %spec.name, "Container created.");
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        already_in_state(
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>)
                .await,
        )
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        already_in_state(
            self.docker
                .stop_container(id, None::<StopContainerOptions>)
                .await,
        )
    }

    async fn restart(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .restart_container(id, None::<RestartContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(map_error)
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let options = RenameContainerOptions {
            name: new_name.to_string(),
        };
        self.docker
            .rename_container(id, options)
            .await
            .map_err(map_error)
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions::<String> {
                    cmd: Some(argv.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_error)?;

        let mut buffer = BytesMut::new();
        if let StartExecResults::Attached { mut output, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(map_error)?
        {
            while let Some(chunk) = output.next().await {
                let chunk = chunk.map_err(map_error)?;
                buffer.extend_from_slice(&chunk.into_bytes());
            }
        }

        let inspected = self.docker.inspect_exec(&exec.id).await.map_err(map_error)?;
        Ok(ExecOutput {
            exit_code: inspected.exit_code.unwrap_or(-1),
            output: buffer.freeze(),
        })
    }

    async fn logs(
        &self,
        id: &str,
        tail: Option<u64>,
        follow: bool,
    ) -> Result<LogStream, RuntimeError> {
        let options = LogsOptions::<String> {
            follow,
            stdout: true,
            stderr: true,
            tail: tail
                .map(|t| t.to_string())
                .unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };
        let stream = self
            .docker
            .logs(id, Some(options))
            .map(|item| item.map(|chunk| chunk.into_bytes()).map_err(map_error))
            .boxed();
        Ok(stream)
    }
}
