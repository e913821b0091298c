//! In-memory stand-ins for the runtime, registry and DNS capabilities.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::dns::{DnsError, DnsProvider, UpsertOutcome};
use crate::registry::{
    ByteStream, ContentRegistry, ModVersion, RegistryError, SearchQuery, SearchResults,
};
use crate::runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ExecOutput, ListFilter, LogStream, Mount,
    PortBinding, RuntimeError,
};

#[derive(Default)]
struct RuntimeState {
    containers: Vec<ContainerInfo>,
    next_id: usize,
    calls: Vec<String>,
    fail_create: Option<RuntimeError>,
    fail_start: Option<RuntimeError>,
    exec_results: VecDeque<ExecOutput>,
    execs: Vec<Vec<String>>,
    log_output: Bytes,
}

/// A container runtime that keeps containers in a list.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn insert(&self, info: ContainerInfo) {
        self.state.lock().unwrap().containers.push(info);
    }

    pub fn containers(&self) -> Vec<ContainerInfo> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn find_by_label(&self, key: &str, value: &str) -> Option<ContainerInfo> {
        self.containers()
            .into_iter()
            .find(|c| c.label(key) == Some(value))
    }

    /// Runtime operations in call order, e.g. `create:mc_x`, `stop:id`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn fail_next_create(&self, err: RuntimeError) {
        self.state.lock().unwrap().fail_create = Some(err);
    }

    pub fn fail_next_start(&self, err: RuntimeError) {
        self.state.lock().unwrap().fail_start = Some(err);
    }

    pub fn push_exec_result(&self, exit_code: i64, output: &str) {
        self.state.lock().unwrap().exec_results.push_back(ExecOutput {
            exit_code,
            output: Bytes::from(output.to_string()),
        });
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn set_logs(&self, output: &str) {
        self.state.lock().unwrap().log_output = Bytes::from(output.to_string());
    }

    fn with_container<T>(
        &self,
        id: &str,
        op: &str,
        f: impl FnOnce(&mut ContainerInfo) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op}:{id}"));
        let container = state
            .containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        f(container)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, filter: &ListFilter) -> Result<Vec<ContainerInfo>, RuntimeError> {
        Ok(self
            .containers()
            .into_iter()
            .filter(|c| filter.matches(&c.labels))
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        self.containers()
            .into_iter()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create:{}", spec.name));
        if let Some(err) = state.fail_create.take() {
            return Err(err);
        }
        if state.containers.iter().any(|c| c.name == spec.name) {
            return Err(RuntimeError::Conflict(format!(
                "name {} already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("container{:04}", state.next_id);
        state.containers.push(ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: "created".to_string(),
            labels: spec.labels.clone(),
            env: spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            mounts: spec
                .binds
                .iter()
                .map(|(source, destination)| Mount {
                    source: source.clone(),
                    destination: destination.clone(),
                })
                .collect(),
            ports: spec
                .ports
                .iter()
                .map(|(container_port, host_port)| PortBinding {
                    container_port: *container_port,
                    protocol: "tcp".to_string(),
                    host_port: *host_port,
                })
                .collect(),
            memory_bytes: spec.memory_mb.map(|mb| i64::from(mb) * 1024 * 1024),
        });
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        let failure = self.state.lock().unwrap().fail_start.take();
        self.with_container(id, "start", |c| {
            if let Some(err) = failure {
                return Err(err);
            }
            c.state = "running".to_string();
            Ok(())
        })
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_container(id, "stop", |c| {
            c.state = "exited".to_string();
            Ok(())
        })
    }

    async fn restart(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_container(id, "restart", |c| {
            c.state = "running".to_string();
            Ok(())
        })
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove:{id}"));
        let index = state
            .containers
            .iter()
            .position(|c| c.id == id || c.name == id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        if state.containers[index].is_running() && !force {
            return Err(RuntimeError::Conflict(
                "cannot remove a running container".to_string(),
            ));
        }
        state.containers.remove(index);
        Ok(())
    }

    async fn rename(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        if self.containers().iter().any(|c| c.name == new_name) {
            return Err(RuntimeError::Conflict(format!(
                "name {new_name} already in use"
            )));
        }
        self.with_container(id, "rename", |c| {
            c.name = new_name.to_string();
            Ok(())
        })
    }

    async fn exec(&self, id: &str, argv: &[String]) -> Result<ExecOutput, RuntimeError> {
        self.with_container(id, "exec", |_| Ok(()))?;
        let mut state = self.state.lock().unwrap();
        state.execs.push(argv.to_vec());
        Ok(state.exec_results.pop_front().unwrap_or(ExecOutput {
            exit_code: 0,
            output: Bytes::new(),
        }))
    }

    async fn logs(
        &self,
        id: &str,
        _tail: Option<u64>,
        _follow: bool,
    ) -> Result<LogStream, RuntimeError> {
        self.with_container(id, "logs", |_| Ok(()))?;
        let output = self.state.lock().unwrap().log_output.clone();
        Ok(futures::stream::iter(vec![Ok(output)]).boxed())
    }
}

#[derive(Default)]
struct RegistryState {
    versions: HashMap<String, ModVersion>,
    project_versions: HashMap<String, Vec<String>>,
    files: HashMap<String, Bytes>,
    search: SearchResults,
}

/// A registry serving versions and file bodies from memory.
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<RegistryState>,
    downloads: AtomicUsize,
    version_lookups: AtomicUsize,
}

impl FakeRegistry {
    /// Registers `version`; it becomes the newest version of its project.
    pub fn add_version(&self, version: ModVersion) {
        let mut state = self.state.lock().unwrap();
        state
            .project_versions
            .entry(version.project_id.clone())
            .or_default()
            .insert(0, version.id.clone());
        state.versions.insert(version.id.clone(), version);
    }

    pub fn add_file(&self, url: &str, body: impl Into<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(url.to_string(), body.into());
    }

    pub fn set_search_results(&self, results: SearchResults) {
        self.state.lock().unwrap().search = results;
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn version_lookups(&self) -> usize {
        self.version_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentRegistry for FakeRegistry {
    async fn search(&self, _query: &SearchQuery) -> Result<SearchResults, RegistryError> {
        Ok(self.state.lock().unwrap().search.clone())
    }

    async fn list_versions(
        &self,
        project_id: &str,
        _loader: Option<&str>,
        _game_version: Option<&str>,
    ) -> Result<Vec<ModVersion>, RegistryError> {
        let state = self.state.lock().unwrap();
        let ids = state
            .project_versions
            .get(project_id)
            .cloned()
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| state.versions.get(id).cloned())
            .collect())
    }

    async fn get_version(&self, version_id: &str) -> Result<ModVersion, RegistryError> {
        self.version_lookups.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .unwrap()
            .versions
            .get(version_id)
            .cloned()
            .ok_or_else(|| RegistryError::Status {
                status: 404,
                body: format!("version {version_id} not found"),
            })
    }

    async fn download(&self, url: &str) -> Result<ByteStream, RegistryError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let body = self
            .state
            .lock()
            .unwrap()
            .files
            .get(url)
            .cloned()
            .ok_or_else(|| RegistryError::Status {
                status: 404,
                body: format!("{url} not found"),
            })?;
        // Split in two so consumers see more than one chunk.
        let mid = body.len() / 2;
        let chunks = vec![Ok(body.slice(..mid)), Ok(body.slice(mid..))];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// A DNS provider holding SRV records in a map.
#[derive(Default)]
pub struct FakeDns {
    records: Mutex<HashMap<String, u16>>,
    failing: Mutex<HashSet<String>>,
    writes: AtomicUsize,
}

impl FakeDns {
    pub fn seed(&self, fqdn: &str, port: u16) {
        self.records.lock().unwrap().insert(fqdn.to_string(), port);
    }

    pub fn fail_for(&self, fqdn: &str) {
        self.failing.lock().unwrap().insert(fqdn.to_string());
    }

    pub fn record(&self, fqdn: &str) -> Option<u16> {
        self.records.lock().unwrap().get(fqdn).copied()
    }

    /// Creates, updates and deletes performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn upsert_srv(&self, fqdn: &str, port: u16) -> Result<UpsertOutcome, DnsError> {
        if self.failing.lock().unwrap().contains(fqdn) {
            return Err(DnsError::Api(format!("provider refused {fqdn}")));
        }
        let mut records = self.records.lock().unwrap();
        let outcome = match records.get(fqdn) {
            Some(existing) if *existing == port => return Ok(UpsertOutcome::Unchanged),
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        records.insert(fqdn.to_string(), port);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn delete_srv(&self, fqdn: &str) -> Result<usize, DnsError> {
        if self.failing.lock().unwrap().contains(fqdn) {
            return Err(DnsError::Api(format!("provider refused {fqdn}")));
        }
        let removed = self.records.lock().unwrap().remove(fqdn);
        if removed.is_some() {
            self.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(1);
        }
        Ok(0)
    }
}
