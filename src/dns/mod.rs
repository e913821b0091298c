//! SRV record automation for managed servers.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod cloudflare;
pub mod reconciler;

pub use cloudflare::CloudflareDns;
pub use reconciler::{DnsReconciler, ReconcileReport};

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Invalid DNS configuration: {0}")]
    InvalidConfiguration(String),
    #[error("DNS provider request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("DNS provider rejected the request: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UpsertOutcome::Created => "created",
            UpsertOutcome::Updated => "updated",
            UpsertOutcome::Unchanged => "unchanged",
        };
        f.write_str(label)
    }
}

/// A DNS backend able to maintain `_minecraft._tcp` SRV records.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Points `_minecraft._tcp.<fqdn>` at `<fqdn>:<port>`, writing only on drift.
    async fn upsert_srv(&self, fqdn: &str, port: u16) -> Result<UpsertOutcome, DnsError>;

    /// Deletes every SRV record for `fqdn`; returns how many went away.
    async fn delete_srv(&self, fqdn: &str) -> Result<usize, DnsError>;
}

/// Optional DNS automation. Without a provider every call does nothing.
#[derive(Clone, Default)]
pub struct DnsAutomation {
    provider: Option<Arc<dyn DnsProvider>>,
    parent_domain: String,
}

impl DnsAutomation {
    pub fn new(provider: Arc<dyn DnsProvider>, parent_domain: impl Into<String>) -> Self {
        Self {
            provider: Some(provider),
            parent_domain: parent_domain.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub fn fqdn(&self, dns_name: &str) -> String {
        format!("{}.{}", dns_name, self.parent_domain)
            .trim_matches('.')
            .to_string()
    }

    /// Returns `None` when automation is off.
    pub async fn provision(
        &self,
        dns_name: &str,
        port: u16,
    ) -> Result<Option<UpsertOutcome>, DnsError> {
        let Some(provider) = &self.provider else {
            return Ok(None);
        };
        let fqdn = self.fqdn(dns_name);
        let outcome = provider.upsert_srv(&fqdn, port).await?;
        info!(fqdn = %fqdn, port, outcome = %outcome, "DNS SRV provisioned.");
        Ok(Some(outcome))
    }

    pub async fn remove(&self, dns_name: &str) -> Result<usize, DnsError> {
        let Some(provider) = &self.provider else {
            return Ok(0);
        };
        let fqdn = self.fqdn(dns_name);
        let deleted = provider.delete_srv(&fqdn).await?;
        info!(fqdn = %fqdn, deleted, "DNS SRV removed.");
        Ok(deleted)
    }
}
