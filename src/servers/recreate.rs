//! Replacing a server container while keeping its identity.
//!
//! Docker cannot change the environment or port bindings of an existing
//! container, so both go through a full recreation: a replacement is created
//! under a temporary name, the original is removed, and the replacement takes
//! over the original name.

use std::collections::BTreeMap;
use tracing::{info, warn};

use super::lifecycle::autopause_env;
use super::{ServerInfo, ServerManager, CONTAINER_DATA_PATH};
use crate::error::{ServiceError, ServiceResult};
use crate::labels;
use crate::runtime::{ContainerInfo, ContainerSpec};

const RECREATE_SUFFIX: &str = "__recreate";

/// Whether `name` is a replacement left mid-recreation.
pub(crate) fn is_replacement_name(name: &str) -> bool {
    name.ends_with(RECREATE_SUFFIX)
}

fn base_name(name: &str) -> &str {
    name.strip_suffix(RECREATE_SUFFIX).unwrap_or(name)
}

impl ServerManager {
    /// Recreates `container` with `env` and, optionally, a new port mapping.
    ///
    /// Labels, name, bind mount, image and memory carry over. If the
    /// replacement cannot be created the original is restarted (when it was
    /// running) and left in place.
    pub(crate) async fn recreate(
        &self,
        container: &ContainerInfo,
        server_id: &str,
        env: BTreeMap<String, String>,
        ports_override: Option<(u16, u16)>,
        start_after: bool,
    ) -> ServiceResult<ContainerInfo> {
        let ports = match ports_override {
            Some(mapping) => mapping,
            None => container.primary_port().ok_or_else(|| {
                ServiceError::internal("Could not determine the server's port binding")
            })?,
        };
        if container.image.is_empty() {
            return Err(ServiceError::internal("Could not determine the server's image"));
        }

        let host_dir = container
            .label(labels::SERVER_DIR)
            .filter(|dir| !dir.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.host_dir(server_id).to_string_lossy().into_owned());
        let memory_mb = labels::memory_mb_of(container).unwrap_or(self.config.default_memory_mb);
        let base = base_name(&container.name).to_string();
        let was_running = container.is_running();

        let spec = ContainerSpec {
            image: container.image.clone(),
            name: format!("{base}{RECREATE_SUFFIX}"),
            env,
            labels: container.labels.clone(),
            binds: vec![(host_dir, CONTAINER_DATA_PATH.to_string())],
            ports: vec![ports],
            memory_mb: Some(memory_mb),
        };

        if was_running {
            self.runtime.stop(&container.id).await?;
        }

        let replacement_id = match self.runtime.create(&spec).await {
            Ok(id) => id,
            Err(e) => {
                warn!(server_id = %server_id, error = %e, "Replacement container could not be created.");
                if was_running {
                    if let Err(start_err) = self.runtime.start(&container.id).await {
                        warn!(server_id = %server_id, error = %start_err, "Failed to restart the original container.");
                    }
                }
                return Err(ServiceError::internal(format!(
                    "Failed to recreate server container: {e}"
                )));
            }
        };

        if let Err(e) = self.runtime.remove(&container.id, true).await {
            warn!(server_id = %server_id, error = %e, "Original container could not be removed, rolling back.");
            if let Err(cleanup_err) = self.runtime.remove(&replacement_id, true).await {
                warn!(container_id = %replacement_id, error = %cleanup_err, "Failed to remove replacement container.");
            }
            if was_running {
                if let Err(start_err) = self.runtime.start(&container.id).await {
                    warn!(server_id = %server_id, error = %start_err, "Failed to restart the original container.");
                }
            }
            return Err(e.into());
        }

        if let Err(e) = self.runtime.rename(&replacement_id, &base).await {
            warn!(server_id = %server_id, name = %base, error = %e, "Replacement keeps its temporary name.");
        }
        if start_after {
            self.runtime.start(&replacement_id).await?;
        }

        info!(server_id = %server_id, container_id = %replacement_id, "Server container recreated.");
        Ok(self.runtime.inspect(&replacement_id).await?)
    }

    /// Brings the autopause variables in line with the configuration,
    /// recreating the container when they drifted. The run state is kept.
    pub(crate) async fn ensure_autopause_env(
        &self,
        container: ContainerInfo,
        server_id: &str,
    ) -> ServiceResult<ContainerInfo> {
        if !self.config.autopause_enabled {
            return Ok(container);
        }
        let mut env = container.env_map();
        let desired = autopause_env(&self.config);
        if desired.iter().all(|(k, v)| env.get(k) == Some(v)) {
            return Ok(container);
        }

        info!(server_id = %server_id, "Autopause settings drifted, recreating container.");
        env.extend(desired);
        let was_running = container.is_running();
        self.recreate(&container, server_id, env, None, was_running)
            .await
    }

    /// Moves a server to `requested`, or to the lowest free port in range.
    ///
    /// Staying on the current port is a no-op. The SRV record follows the new
    /// port on a best-effort basis.
    pub async fn reassign_port(
        &self,
        server_id: &str,
        requested: Option<u16>,
    ) -> ServiceResult<ServerInfo> {
        let container = self.find_container(server_id).await?;
        let current = container.host_port();
        let port = self
            .ports
            .select_port_ignoring(requested, current)
            .await?;
        if current == Some(port) {
            return Ok(ServerInfo::from_container(&container));
        }

        let mut env = container.env_map();
        env.insert("SERVER_PORT".into(), port.to_string());
        let was_running = container.is_running();
        let updated = self
            .recreate(&container, server_id, env, Some((port, port)), was_running)
            .await?;

        let dns_name = labels::dns_name_of(&updated);
        if let Err(e) = self.dns.provision(&dns_name, port).await {
            warn!(dns_name = %dns_name, port, error = %e, "DNS update after port change failed.");
        }
        info!(server_id = %server_id, from = ?current, to = port, "Server port reassigned.");
        Ok(ServerInfo::from_container(&updated))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::*;
    use crate::runtime::RuntimeError;

    #[test]
    fn replacement_names() {
        assert!(is_replacement_name("mc_x_abc123__recreate"));
        assert!(!is_replacement_name("mc_x_abc123"));
        assert_eq!(base_name("mc_x__recreate"), "mc_x");
        assert_eq!(base_name("mc_x"), "mc_x");
    }

    #[tokio::test]
    async fn recreate_keeps_identity_and_run_state() {
        let h = harness();
        let info = h.create("Keeper").await;
        let original = h.manager.find_container(&info.server_id).await.unwrap();

        let mut env = original.env_map();
        env.insert("DIFFICULTY".into(), "hard".into());
        let replaced = h
            .manager
            .recreate(&original, &info.server_id, env, None, true)
            .await
            .unwrap();

        assert_ne!(replaced.id, original.id);
        assert_eq!(replaced.name, original.name);
        assert_eq!(replaced.labels, original.labels);
        assert_eq!(replaced.host_port(), Some(25565));
        assert_eq!(replaced.mounts, original.mounts);
        assert!(replaced.is_running());
        assert_eq!(replaced.env_map()["DIFFICULTY"], "hard");
        assert_eq!(h.runtime.containers().len(), 1);
    }

    #[tokio::test]
    async fn failed_replacement_leaves_original_running() {
        let h = harness();
        let info = h.create("Sturdy").await;
        let original = h.manager.find_container(&info.server_id).await.unwrap();
        h.runtime
            .fail_next_create(RuntimeError::Api("no space".into()));

        let result = h
            .manager
            .recreate(&original, &info.server_id, original.env_map(), None, true)
            .await;

        assert!(matches!(result, Err(ServiceError::Internal(_))));
        let containers = h.runtime.containers();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].id, original.id);
        assert!(containers[0].is_running());
    }

    #[tokio::test]
    async fn missing_port_or_image_is_refused_before_touching_the_container() {
        let h = harness();
        let info = h.create("Bare").await;
        let original = h.manager.find_container(&info.server_id).await.unwrap();
        let calls_before = h.runtime.calls().len();

        let mut portless = original.clone();
        portless.ports.clear();
        let result = h
            .manager
            .recreate(&portless, &info.server_id, original.env_map(), None, true)
            .await;
        assert!(matches!(result, Err(ServiceError::Internal(_))));

        let mut imageless = original.clone();
        imageless.image.clear();
        let result = h
            .manager
            .recreate(&imageless, &info.server_id, original.env_map(), None, true)
            .await;
        assert!(matches!(result, Err(ServiceError::Internal(_))));

        assert_eq!(h.runtime.calls().len(), calls_before);
        assert_eq!(h.runtime.containers()[0].id, original.id);
    }

    #[tokio::test]
    async fn leftover_replacement_is_not_preferred() {
        let h = harness();
        let info = h.create("Twin").await;
        let original = h.manager.find_container(&info.server_id).await.unwrap();
        let mut stray = original.clone();
        stray.id = "stray".into();
        stray.name = format!("{}{RECREATE_SUFFIX}", original.name);
        h.runtime.insert(stray);

        let found = h.manager.find_container(&info.server_id).await.unwrap();
        assert_eq!(found.id, original.id);
    }

    #[tokio::test]
    async fn autopause_check_is_a_no_op_when_disabled_or_in_sync() {
        let h = harness();
        let info = h.create("Idle").await;
        let container = h.manager.find_container(&info.server_id).await.unwrap();

        let same = h
            .manager
            .ensure_autopause_env(container.clone(), &info.server_id)
            .await
            .unwrap();
        assert_eq!(same.id, container.id);
        assert!(!h.runtime.calls().iter().any(|c| c.starts_with("remove:")));
    }

    #[tokio::test]
    async fn reassign_moves_port_and_dns() {
        let h = harness();
        let info = h.create("Mover").await;
        assert_eq!(h.dns.record("mover.example.com"), Some(25565));

        let moved = h
            .manager
            .reassign_port(&info.server_id, Some(25570))
            .await
            .unwrap();

        assert_eq!(moved.port, Some(25570));
        assert_eq!(moved.status, "running");
        let container = h
            .runtime
            .find_by_label(labels::SERVER_ID, &info.server_id)
            .unwrap();
        assert_eq!(container.env_map()["SERVER_PORT"], "25570");
        assert_eq!(h.dns.record("mover.example.com"), Some(25570));
    }

    #[tokio::test]
    async fn reassign_to_current_port_changes_nothing() {
        let h = harness();
        let info = h.create("Stay").await;
        let before = h.runtime.calls().len();

        let same = h.manager.reassign_port(&info.server_id, None).await.unwrap();

        assert_eq!(same.port, Some(25565));
        assert_eq!(same.container_id, info.container_id);
        assert_eq!(h.runtime.calls().len(), before);
    }

    #[tokio::test]
    async fn reassign_to_taken_port_conflicts() {
        let h = harness();
        let first = h.create("First").await;
        h.create("Second").await;

        assert!(matches!(
            h.manager.reassign_port(&first.server_id, Some(25566)).await,
            Err(ServiceError::Conflict(_))
        ));
    }
}
