//! Game and loader version lists, cached in memory.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ServiceError, ServiceResult};
use crate::registry::modrinth::USER_AGENT;

const MOJANG_MANIFEST_URL: &str = "https://launchermeta.mojang.com/mc/game/version_manifest.json";
const FABRIC_GAME_URL: &str = "https://meta.fabricmc.net/v2/versions/game";
const FABRIC_LOADER_URL: &str = "https://meta.fabricmc.net/v2/versions/loader";

const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoaderVersion {
    pub version: String,
    pub stable: bool,
}

#[derive(Debug, Clone)]
enum Cached {
    Versions(Vec<String>),
    Loaders(Vec<LoaderVersion>),
}

pub struct MetadataService {
    client: reqwest::Client,
    cache: DashMap<&'static str, (Instant, Cached)>,
    ttl: Duration,
}

fn non_blank_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Release ids from the Mojang version manifest, newest first.
fn parse_releases(data: &Value) -> Vec<String> {
    data.get("versions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("release"))
        .filter_map(|item| non_blank_str(item.get("id")))
        .collect()
}

/// Game versions Fabric marks stable.
fn parse_fabric_games(data: &Value) -> Vec<String> {
    data.as_array()
        .into_iter()
        .flatten()
        .filter(|item| item.get("stable").and_then(Value::as_bool) == Some(true))
        .filter_map(|item| non_blank_str(item.get("version")))
        .collect()
}

fn parse_fabric_loaders(data: &Value) -> Vec<LoaderVersion> {
    data.as_array()
        .into_iter()
        .flatten()
        .filter_map(|item| {
            Some(LoaderVersion {
                version: non_blank_str(item.get("version"))?,
                stable: item.get("stable").and_then(Value::as_bool).unwrap_or(false),
            })
        })
        .collect()
}

impl MetadataService {
    pub fn new() -> ServiceResult<Self> {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ServiceError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            cache: DashMap::new(),
            ttl,
        })
    }

    fn cached(&self, key: &'static str) -> Option<Cached> {
        let entry = self.cache.get(key)?;
        let (expires_at, value) = entry.value();
        if *expires_at <= Instant::now() {
            drop(entry);
            self.cache.remove(key);
            return None;
        }
        Some(value.clone())
    }

    fn store(&self, key: &'static str, value: Cached) {
        self.cache.insert(key, (Instant::now() + self.ttl, value));
    }

    async fn get_json(&self, url: &str) -> ServiceResult<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::upstream(format!("Metadata request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::upstream(format!(
                "Metadata error {}: {body}",
                status.as_u16()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::upstream(format!("Metadata response invalid: {e}")))
    }

    async fn versions(
        &self,
        key: &'static str,
        url: &str,
        parse: fn(&Value) -> Vec<String>,
    ) -> ServiceResult<Vec<String>> {
        if let Some(Cached::Versions(versions)) = self.cached(key) {
            return Ok(versions);
        }
        let versions = parse(&self.get_json(url).await?);
        debug!(key, count = versions.len(), "Metadata refreshed.");
        self.store(key, Cached::Versions(versions.clone()));
        Ok(versions)
    }

    pub async fn minecraft_releases(&self) -> ServiceResult<Vec<String>> {
        self.versions("mc_releases", MOJANG_MANIFEST_URL, parse_releases)
            .await
    }

    pub async fn fabric_game_versions(&self) -> ServiceResult<Vec<String>> {
        self.versions("fabric_game_versions", FABRIC_GAME_URL, parse_fabric_games)
            .await
    }

    pub async fn fabric_loader_versions(&self) -> ServiceResult<Vec<LoaderVersion>> {
        const KEY: &str = "fabric_loader_versions";
        if let Some(Cached::Loaders(loaders)) = self.cached(KEY) {
            return Ok(loaders);
        }
        let loaders = parse_fabric_loaders(&self.get_json(FABRIC_LOADER_URL).await?);
        self.store(KEY, Cached::Loaders(loaders.clone()));
        Ok(loaders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn releases_skip_snapshots() {
        let manifest = json!({
            "latest": {"release": "1.21"},
            "versions": [
                {"id": "24w14a", "type": "snapshot"},
                {"id": "1.21", "type": "release"},
                {"id": " ", "type": "release"},
                {"id": "1.20.6", "type": "release"}
            ]
        });
        assert_eq!(parse_releases(&manifest), vec!["1.21", "1.20.6"]);
        assert!(parse_releases(&json!([])).is_empty());
    }

    #[test]
    fn fabric_lists_are_filtered() {
        let games = json!([
            {"version": "1.21", "stable": true},
            {"version": "1.21-rc1", "stable": false}
        ]);
        assert_eq!(parse_fabric_games(&games), vec!["1.21"]);

        let loaders = json!([
            {"version": "0.16.0", "stable": true},
            {"version": "0.16.1-beta"},
            {"stable": true}
        ]);
        assert_eq!(
            parse_fabric_loaders(&loaders),
            vec![
                LoaderVersion { version: "0.16.0".into(), stable: true },
                LoaderVersion { version: "0.16.1-beta".into(), stable: false },
            ]
        );
    }

    #[tokio::test]
    async fn cached_values_are_served_until_expiry() {
        let service = MetadataService::new().unwrap();
        service.store("mc_releases", Cached::Versions(vec!["1.21".into()]));
        assert_eq!(service.minecraft_releases().await.unwrap(), vec!["1.21"]);

        let expired = MetadataService::with_ttl(Duration::ZERO).unwrap();
        expired.store("mc_releases", Cached::Versions(vec!["1.21".into()]));
        assert!(expired.cached("mc_releases").is_none());
    }
}
