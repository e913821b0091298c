//! Host port allocation by live scan of every container on the host.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::runtime::{ContainerRuntime, ListFilter};

pub struct PortAllocator {
    runtime: Arc<dyn ContainerRuntime>,
    range_start: i64,
    range_end: i64,
}

impl PortAllocator {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, range_start: i64, range_end: i64) -> Self {
        Self {
            runtime,
            range_start,
            range_end,
        }
    }

    /// Host ports bound by any container, managed or not, in any state.
    pub async fn used_ports(&self) -> ServiceResult<BTreeSet<u16>> {
        let containers = self.runtime.list(&ListFilter::everything()).await?;
        Ok(containers
            .iter()
            .flat_map(|c| c.ports.iter().map(|p| p.host_port))
            .collect())
    }

    /// Validates `requested`, or picks the lowest free port in range.
    pub async fn select_port(&self, requested: Option<u16>) -> ServiceResult<u16> {
        self.select_port_ignoring(requested, None).await
    }

    /// Like [`select_port`](Self::select_port), treating `ignore` as free.
    /// Used when a container moves off its own current port.
    pub async fn select_port_ignoring(
        &self,
        requested: Option<u16>,
        ignore: Option<u16>,
    ) -> ServiceResult<u16> {
        let mut used = self.used_ports().await?;
        if let Some(own) = ignore {
            used.remove(&own);
        }

        if let Some(port) = requested {
            if port == 0 {
                return Err(ServiceError::invalid("Port must be between 1 and 65535"));
            }
            if used.contains(&port) {
                return Err(ServiceError::conflict(format!(
                    "Port {port} is already in use"
                )));
            }
            return Ok(port);
        }

        let (start, end) = self.validated_range()?;
        let port = (start..=end)
            .find(|port| !used.contains(port))
            .ok_or_else(|| ServiceError::conflict("No available ports in the configured range"))?;
        debug!(port, used = used.len(), "Selected host port.");
        Ok(port)
    }

    fn validated_range(&self) -> ServiceResult<(u16, u16)> {
        let (start, end) = (self.range_start, self.range_end);
        if start < 1 || end > 65535 {
            return Err(ServiceError::invalid(format!(
                "Configured port range {start}-{end} is out of bounds"
            )));
        }
        if end < start {
            return Err(ServiceError::invalid(format!(
                "Configured port range {start}-{end} is reversed"
            )));
        }
        // Both bounds were checked against 1..=65535 above.
        Ok((start as u16, end as u16))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerInfo, PortBinding};
    use crate::testing::FakeRuntime;

    fn holding(ports: &[u16], state: &str) -> ContainerInfo {
        ContainerInfo {
            id: format!("c{}", ports.first().copied().unwrap_or_default()),
            state: state.to_string(),
            ports: ports
                .iter()
                .map(|p| PortBinding {
                    container_port: 25565,
                    protocol: "tcp".into(),
                    host_port: *p,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn allocator(runtime: Arc<FakeRuntime>, start: i64, end: i64) -> PortAllocator {
        PortAllocator::new(runtime, start, end)
    }

    #[tokio::test]
    async fn picks_lowest_free_port_including_stopped_bindings() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.insert(holding(&[25565], "running"));
        runtime.insert(holding(&[25566], "exited"));
        runtime.insert(holding(&[25568], "running"));

        let ports = allocator(runtime, 25565, 25570);
        assert_eq!(ports.select_port(None).await.unwrap(), 25567);
    }

    #[tokio::test]
    async fn explicit_request_is_checked_against_used_set() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.insert(holding(&[30000], "running"));
        let ports = allocator(runtime, 25565, 25570);

        // Outside the range is fine as long as it is free.
        assert_eq!(ports.select_port(Some(30001)).await.unwrap(), 30001);
        assert!(matches!(
            ports.select_port(Some(30000)).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn exhausted_range_is_a_conflict() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.insert(holding(&[25565, 25566], "running"));
        let ports = allocator(runtime, 25565, 25566);

        assert!(matches!(
            ports.select_port(None).await,
            Err(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn malformed_range_is_invalid() {
        for (start, end) in [(0, 10), (25565, 70000), (25570, 25565)] {
            let ports = allocator(Arc::new(FakeRuntime::default()), start, end);
            assert!(
                matches!(ports.select_port(None).await, Err(ServiceError::Invalid(_))),
                "range {start}-{end} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn own_port_can_be_reused_when_ignored() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.insert(holding(&[25565], "running"));
        let ports = allocator(runtime, 25565, 25570);

        assert_eq!(
            ports
                .select_port_ignoring(None, Some(25565))
                .await
                .unwrap(),
            25565
        );
        assert_eq!(ports.select_port(None).await.unwrap(), 25566);
    }
}
