use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use super::{ByteStream, ContentRegistry, ModVersion, RegistryError, SearchQuery, SearchResults};

pub(crate) const USER_AGENT: &str = concat!("craftdock/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Modrinth v2 API client.
pub struct ModrinthClient {
    client: Client,
    download_client: Client,
    base_url: String,
}

impl ModrinthClient {
    pub fn new(base_url: &str) -> Result<Self, RegistryError> {
        Self::with_download_read_timeout(base_url, DOWNLOAD_READ_TIMEOUT)
    }

    fn with_download_read_timeout(
        base_url: &str,
        read_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        // Large archives outlive any whole-request timeout; bound connect and each read.
        let download_client = Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            download_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// API URL with each segment percent-encoded, so ids cannot escape their path slot.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RegistryError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RegistryError::Transport(format!("Invalid registry URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| RegistryError::Transport("Registry URL cannot take a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
    ) -> Result<T, RegistryError> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "Registry request.");
        let response = self.client.get(url).query(query).send().await?;
        let response = check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

async fn check_status(response: Response) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(RegistryError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

/// Search facets in the registry's nested-array form.
fn build_facets(query: &SearchQuery) -> String {
    let mut facets = vec![vec![format!("project_type:{}", query.project_type.as_str())]];
    if let Some(loader) = query.loader.as_deref().filter(|l| !l.is_empty()) {
        facets.push(vec![format!("categories:{loader}")]);
    }
    if let Some(game_version) = query.game_version.as_deref().filter(|v| !v.is_empty()) {
        facets.push(vec![format!("versions:{game_version}")]);
    }
    serde_json::Value::from(facets).to_string()
}

fn json_list(value: &str) -> String {
    serde_json::Value::from(vec![value.to_string()]).to_string()
}

#[async_trait]
impl ContentRegistry for ModrinthClient {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, RegistryError> {
        let params = [
            ("query", query.query.clone()),
            ("limit", query.limit.to_string()),
            ("facets", build_facets(query)),
        ];
        self.get_json(&["search"], &params).await
    }

    async fn list_versions(
        &self,
        project_id: &str,
        loader: Option<&str>,
        game_version: Option<&str>,
    ) -> Result<Vec<ModVersion>, RegistryError> {
        let mut params = Vec::new();
        if let Some(loader) = loader.filter(|l| !l.is_empty()) {
            params.push(("loaders", json_list(loader)));
        }
        if let Some(game_version) = game_version.filter(|v| !v.is_empty()) {
            params.push(("game_versions", json_list(game_version)));
        }
        self.get_json(&["project", project_id, "version"], &params)
            .await
    }

    async fn get_version(&self, version_id: &str) -> Result<ModVersion, RegistryError> {
        self.get_json(&["version", version_id], &[]).await
    }

    async fn download(&self, url: &str) -> Result<ByteStream, RegistryError> {
        let response = self.download_client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RegistryError::from))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProjectType;

    #[test]
    fn facets_include_only_given_filters() {
        let mut query = SearchQuery {
            query: "sodium".into(),
            project_type: ProjectType::Mod,
            loader: Some("fabric".into()),
            game_version: None,
            limit: 10,
        };
        assert_eq!(
            build_facets(&query),
            r#"[["project_type:mod"],["categories:fabric"]]"#
        );

        query.project_type = ProjectType::Modpack;
        query.loader = None;
        query.game_version = Some("1.20.1".into());
        assert_eq!(
            build_facets(&query),
            r#"[["project_type:modpack"],["versions:1.20.1"]]"#
        );
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ModrinthClient::new("https://api.modrinth.com/v2/").unwrap();
        assert_eq!(client.base_url, "https://api.modrinth.com/v2");
    }

    #[test]
    fn ids_are_encoded_as_single_path_segments() {
        let client = ModrinthClient::new("https://api.modrinth.com/v2").unwrap();
        let url = client
            .endpoint(&["project", "../../admin?x=1", "version"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.modrinth.com/v2/project/..%2F..%2Fadmin%3Fx=1/version"
        );
        let url = client.endpoint(&["version", "IZskON6d"]).unwrap();
        assert_eq!(url.as_str(), "https://api.modrinth.com/v2/version/IZskON6d");
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\npartial")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let client = ModrinthClient::with_download_read_timeout(
            "https://api.modrinth.com/v2",
            Duration::from_millis(200),
        )
        .unwrap();
        let mut stream = client
            .download(&format!("http://{addr}/mod.jar"))
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(chunk) = stream.next().await {
                if let Err(e) = chunk {
                    return Err(e);
                }
            }
            Ok(())
        })
        .await
        .expect("download should not hang");
        assert!(outcome.is_err());
        server.abort();
    }
}
