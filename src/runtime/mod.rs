//! The container runtime capability consumed by the orchestrator.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::error::ServiceError;

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Error, Debug, Clone)]
pub enum RuntimeError {
    #[error("No such container: {0}")]
    NotFound(String),
    #[error("Container conflict: {0}")]
    Conflict(String),
    #[error("Container runtime error: {0}")]
    Api(String),
    #[error("Container runtime unreachable: {0}")]
    Unavailable(String),
}

impl From<RuntimeError> for ServiceError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(msg) => ServiceError::NotFound(msg),
            RuntimeError::Conflict(msg) => ServiceError::Conflict(msg),
            RuntimeError::Api(msg) => ServiceError::Internal(msg),
            RuntimeError::Unavailable(msg) => ServiceError::RuntimeUnavailable(msg),
        }
    }
}

pub type LogStream = BoxStream<'static, Result<Bytes, RuntimeError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: String,
    pub host_port: u16,
}

/// A snapshot of one container as reported by the runtime.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Runtime state, e.g. `running`, `exited`, `created`.
    pub state: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
    pub mounts: Vec<Mount>,
    /// Live and configured host bindings, deduplicated.
    pub ports: Vec<PortBinding>,
    pub memory_bytes: Option<i64>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case("running")
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Environment as a map; later duplicates win, entries without `=` are dropped.
    pub fn env_map(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .filter_map(|item| item.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// First bound `(container_port, host_port)` pair.
    pub fn primary_port(&self) -> Option<(u16, u16)> {
        self.ports
            .first()
            .map(|binding| (binding.container_port, binding.host_port))
    }

    pub fn host_port(&self) -> Option<u16> {
        self.primary_port().map(|(_, host)| host)
    }

    pub fn mount_source(&self, destination: &str) -> Option<&str> {
        self.mounts
            .iter()
            .find(|m| m.destination == destination)
            .map(|m| m.source.as_str())
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub labels: HashMap<String, String>,
    /// `(host_path, container_path)` read-write bind mounts.
    pub binds: Vec<(String, String)>,
    /// `(container_port, host_port)` TCP mappings.
    pub ports: Vec<(u16, u16)>,
    pub memory_mb: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// `key=value` label constraints, all of which must match.
    pub labels: Vec<(String, String)>,
}

impl ListFilter {
    /// Every container on the host, managed or not.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub output: Bytes,
}

impl ExecOutput {
    pub fn output_lossy(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Containers in any state matching `filter`.
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Creates without starting; returns the new container id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    async fn restart(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError>;

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError>;

    async fn logs(&self, id: &str, tail: Option<u64>, follow: bool)
        -> Result<LogStream, RuntimeError>;
}
