use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{DnsAutomation, UpsertOutcome};
use crate::config::ManagerConfig;
use crate::labels;
use crate::runtime::ContainerRuntime;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Containers without a bound host port.
    pub skipped: usize,
    pub failed: usize,
}

/// Keeps every managed server's SRV record pointed at its current host port.
pub struct DnsReconciler {
    runtime: Arc<dyn ContainerRuntime>,
    dns: DnsAutomation,
    config: Arc<ManagerConfig>,
    interval: Duration,
}

impl DnsReconciler {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        dns: DnsAutomation,
        config: Arc<ManagerConfig>,
    ) -> Self {
        let interval = Duration::from_secs(config.dns_reconcile_interval_seconds.max(1));
        Self {
            runtime,
            dns,
            config,
            interval,
        }
    }

    /// One pass over all managed containers. Per-container failures are
    /// logged and counted, never returned.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        if !self.dns.is_enabled() {
            return report;
        }

        let containers = match self.runtime.list(&labels::managed_filter(&self.config)).await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "DNS reconcile skipped: container runtime unavailable.");
                return report;
            }
        };

        for container in containers {
            report.checked += 1;
            let dns_name = labels::dns_name_of(&container);
            let Some(port) = container.host_port() else {
                debug!(container = %container.name, "No host port bound, skipping DNS.");
                report.skipped += 1;
                continue;
            };

            match self.dns.provision(&dns_name, port).await {
                Ok(Some(UpsertOutcome::Created)) => report.created += 1,
                Ok(Some(UpsertOutcome::Updated)) => report.updated += 1,
                Ok(Some(UpsertOutcome::Unchanged)) | Ok(None) => report.unchanged += 1,
                Err(e) => {
                    warn!(dns_name = %dns_name, port, error = %e, "DNS reconcile failed.");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Runs passes until `shutdown_rx` fires. Returns at once when DNS
    /// automation is off.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<()>) {
        if !self.dns.is_enabled() {
            info!("DNS automation disabled, reconciler not started.");
            return;
        }
        info!(interval_secs = self.interval.as_secs(), "DNS reconciler started.");

        loop {
            let report = self.reconcile_once().await;
            debug!(?report, "DNS reconcile pass finished.");

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown_rx.changed() => {
                    info!("DNS reconciler shutting down.");
                    break;
                }
            }
        }
    }
}
