use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{DnsError, DnsProvider, UpsertOutcome};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 120;
const RECORD_COMMENT: &str = "Managed by craftdock";

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct Zone {
    id: String,
}

#[derive(Serialize, Deserialize, Default)]
struct SrvData {
    #[serde(default)]
    priority: u16,
    #[serde(default)]
    weight: u16,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    target: Option<String>,
}

#[derive(Deserialize)]
struct SrvRecord {
    id: String,
    #[serde(default)]
    data: Option<SrvData>,
}

#[derive(Serialize)]
struct SrvRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: &'a str,
    data: SrvData,
    ttl: u32,
    comment: &'static str,
}

/// Cloudflare DNS provider using an API token scoped to one zone.
pub struct CloudflareDns {
    client: Client,
    api_token: String,
    zone_name: Option<String>,
    zone_id: OnceCell<String>,
}

impl CloudflareDns {
    pub fn new(
        api_token: Option<&str>,
        zone_id: Option<&str>,
        zone_name: Option<&str>,
    ) -> Result<Self, DnsError> {
        let api_token = api_token.map(str::trim).unwrap_or_default();
        if api_token.is_empty() {
            return Err(DnsError::InvalidConfiguration(
                "CF_API_TOKEN is empty".to_string(),
            ));
        }
        let zone_id = zone_id.map(str::trim).filter(|z| !z.is_empty());
        let zone_name = zone_name.map(str::trim).filter(|z| !z.is_empty());
        if zone_id.is_none() && zone_name.is_none() {
            return Err(DnsError::InvalidConfiguration(
                "Set CF_ZONE_ID or CF_ZONE_NAME".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        let cell = OnceCell::new();
        if let Some(id) = zone_id {
            // A fresh cell cannot already be set.
            let _ = cell.set(id.to_string());
        }
        Ok(Self {
            client,
            api_token: api_token.to_string(),
            zone_name: zone_name.map(str::to_string),
            zone_id: cell,
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Envelope<T>, DnsError> {
        let response = request.bearer_auth(&self.api_token).send().await?;
        let status = response.status();
        let body = response.text().await?;
        decode_envelope(status, &body)
    }

    async fn zone_id(&self) -> Result<&str, DnsError> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                let zone_name = self.zone_name.as_deref().ok_or_else(|| {
                    DnsError::InvalidConfiguration("Set CF_ZONE_ID or CF_ZONE_NAME".to_string())
                })?;
                let request = self.client.get(format!("{API_BASE}/zones")).query(&[
                    ("name", zone_name),
                    ("status", "active"),
                    ("per_page", "50"),
                ]);
                let envelope: Envelope<Vec<Zone>> = self.send(request).await?;
                let zone = envelope
                    .result
                    .filter(|_| envelope.success)
                    .and_then(|zones| zones.into_iter().next())
                    .ok_or_else(|| {
                        DnsError::Api(format!(
                            "Could not find zone for {zone_name}: {}",
                            describe_errors(&envelope.errors)
                        ))
                    })?;
                debug!(zone = %zone_name, zone_id = %zone.id, "Resolved Cloudflare zone.");
                Ok::<String, DnsError>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn list_srv(&self, zone_id: &str, name: &str) -> Result<Vec<SrvRecord>, DnsError> {
        let request = self
            .client
            .get(format!("{API_BASE}/zones/{zone_id}/dns_records"))
            .query(&[("type", "SRV"), ("name", name), ("per_page", "100")]);
        let envelope: Envelope<Vec<SrvRecord>> = self.send(request).await?;
        if !envelope.success {
            return Err(DnsError::Api(format!(
                "Cloudflare list failed: {}",
                describe_errors(&envelope.errors)
            )));
        }
        Ok(envelope.result.unwrap_or_default())
    }
}

/// `code: message` pairs from Cloudflare's `errors[]`, or the raw entries.
fn describe_errors(errors: &[serde_json::Value]) -> String {
    errors
        .iter()
        .map(|e| match (e.get("code"), e.get("message").and_then(|m| m.as_str())) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message.to_string(),
            _ => e.to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn decode_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<Envelope<T>, DnsError> {
    if !status.is_success() {
        let detail = serde_json::from_str::<Envelope<serde_json::Value>>(body)
            .map(|envelope| describe_errors(&envelope.errors))
            .ok()
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| body.chars().take(200).collect());
        return Err(DnsError::Api(format!("Cloudflare returned {status}: {detail}")));
    }
    serde_json::from_str(body)
        .map_err(|e| DnsError::Api(format!("Unexpected Cloudflare response: {e}")))
}

fn srv_name(fqdn: &str) -> String {
    format!("_minecraft._tcp.{fqdn}")
        .trim_end_matches('.')
        .to_string()
}

fn matches_desired(data: Option<&SrvData>, port: u16, target: &str) -> bool {
    let Some(data) = data else {
        return false;
    };
    data.port == Some(port)
        && data
            .target
            .as_deref()
            .map(|t| t.trim_end_matches('.') == target)
            .unwrap_or(false)
}

#[async_trait]
impl DnsProvider for CloudflareDns {
    async fn upsert_srv(&self, fqdn: &str, port: u16) -> Result<UpsertOutcome, DnsError> {
        let zone_id = self.zone_id().await?;
        let name = srv_name(fqdn);
        let target = fqdn.trim_end_matches('.');

        let body = SrvRecordBody {
            record_type: "SRV",
            name: &name,
            data: SrvData {
                priority: 0,
                weight: 0,
                port: Some(port),
                target: Some(target.to_string()),
            },
            ttl: RECORD_TTL,
            comment: RECORD_COMMENT,
        };

        let existing = self.list_srv(zone_id, &name).await?;
        if let Some(record) = existing.first() {
            if matches_desired(record.data.as_ref(), port, target) {
                return Ok(UpsertOutcome::Unchanged);
            }
            let request = self
                .client
                .put(format!("{API_BASE}/zones/{zone_id}/dns_records/{}", record.id))
                .json(&body);
            let envelope: Envelope<serde_json::Value> = self.send(request).await?;
            if !envelope.success {
                return Err(DnsError::Api(format!(
                    "Cloudflare update failed: {}",
                    describe_errors(&envelope.errors)
                )));
            }
            return Ok(UpsertOutcome::Updated);
        }

        let request = self
            .client
            .post(format!("{API_BASE}/zones/{zone_id}/dns_records"))
            .json(&body);
        let envelope: Envelope<serde_json::Value> = self.send(request).await?;
        if !envelope.success {
            return Err(DnsError::Api(format!(
                "Cloudflare create failed: {}",
                describe_errors(&envelope.errors)
            )));
        }
        Ok(UpsertOutcome::Created)
    }

    async fn delete_srv(&self, fqdn: &str) -> Result<usize, DnsError> {
        let zone_id = self.zone_id().await?;
        let name = srv_name(fqdn);

        let mut deleted = 0;
        for record in self.list_srv(zone_id, &name).await? {
            let request = self
                .client
                .delete(format!("{API_BASE}/zones/{zone_id}/dns_records/{}", record.id));
            let envelope: Envelope<serde_json::Value> = self.send(request).await?;
            if envelope.success {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
