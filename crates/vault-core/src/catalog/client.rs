//! HTTP client for the remote model catalog.
//!
//! Provides:
//! - Bearer-token or username/password authentication (or anonymous access)
//! - Paginated listing with envelope normalization
//! - Per-model detail fetch
//! - Streaming downloads to a temp file, renamed into place on success

use crate::catalog::payload::{ModelSummary, ModelsEnvelope};
use crate::catalog::source::CatalogSource;
use crate::config::{CatalogSettings, NetworkConfig};
use crate::error::{Result, VaultError};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

/// Authentication state shared by all requests.
#[derive(Debug, Default)]
struct AuthState {
    token: Option<String>,
    authenticated: bool,
}

/// Client for the remote catalog API.
pub struct RemoteCatalogClient {
    /// `None` once the client has been closed.
    http: RwLock<Option<Client>>,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
    auth: tokio::sync::Mutex<AuthState>,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl std::fmt::Debug for RemoteCatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCatalogClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("request_timeout", &self.request_timeout)
            .field("download_timeout", &self.download_timeout)
            .finish()
    }
}

impl RemoteCatalogClient {
    /// Create a client from catalog settings.
    pub fn new(settings: CatalogSettings) -> Result<Self> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| VaultError::Config {
            message: format!("Invalid catalog base URL {}: {}", settings.base_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(VaultError::Config {
                message: format!("Catalog base URL cannot be a base: {}", settings.base_url),
            });
        }

        let http = Client::builder()
            .user_agent(NetworkConfig::USER_AGENT)
            .connect_timeout(NetworkConfig::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| VaultError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http: RwLock::new(Some(http)),
            base_url,
            username: settings.username,
            password: settings.password,
            auth: tokio::sync::Mutex::new(AuthState {
                token: settings.token,
                authenticated: false,
            }),
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
            download_timeout: NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT,
        })
    }

    /// Create a client configured from `MAKERWORLD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(CatalogSettings::from_env())
    }

    /// Override the catalog and download timeouts.
    pub fn with_timeouts(mut self, request: Duration, download: Duration) -> Self {
        self.request_timeout = request;
        self.download_timeout = download;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether `authenticate` has completed.
    pub async fn is_authenticated(&self) -> bool {
        self.auth.lock().await.authenticated
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.http.read().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Authenticate with the catalog if credentials are configured.
    ///
    /// A configured token is used directly; otherwise username and password
    /// are exchanged for a token at `/api/login`; otherwise requests are
    /// anonymous. Subsequent calls are no-ops.
    pub async fn authenticate(&self) -> Result<()> {
        let mut auth = self.auth.lock().await;
        if auth.authenticated {
            return Ok(());
        }

        if auth.token.is_some() {
            auth.authenticated = true;
            return Ok(());
        }

        let (Some(username), Some(password)) = (self.username.as_deref(), self.password.as_deref())
        else {
            debug!("No catalog credentials supplied; using anonymous requests");
            auth.authenticated = true;
            return Ok(());
        };

        let url = self.endpoint(&["api", "login"])?;
        let response = self
            .http()?
            .post(url.clone())
            .timeout(self.request_timeout)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(VaultError::Authentication {
                message: format!("Login failed: {} {}", status.as_u16(), body.trim()),
            });
        }

        let login: LoginResponse = response.json().await.map_err(|e| VaultError::Authentication {
            message: format!("Login response was not valid JSON: {}", e),
        })?;
        let token = login
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| VaultError::Authentication {
                message: "Login response missing token".to_string(),
            })?;

        info!("Authenticated with catalog as {}", username);
        auth.token = Some(token);
        auth.authenticated = true;
        Ok(())
    }

    /// Fetch a page of catalog summaries.
    ///
    /// A body that is not JSON, or whose shape is not recognized, yields an
    /// empty page.
    pub async fn fetch_models(
        &self,
        page: u32,
        per_page: u32,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ModelSummary>> {
        self.ensure_authenticated().await?;

        let url = self.endpoint(&["api", "models"])?;
        let mut query: Vec<(&str, String)> = vec![
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];
        if let Some(updated_after) = updated_after {
            query.push((
                "updated_after",
                updated_after.to_rfc3339_opts(SecondsFormat::Secs, true),
            ));
        }

        let request = self.http()?.get(url.clone()).query(&query);
        let response = self.send(request, &url, Some(self.request_timeout)).await?;
        let body = response.bytes().await.map_err(|e| transport(&url, e))?;

        match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => {
                let summaries = ModelsEnvelope::decode(value);
                debug!("Fetched {} summaries from page {}", summaries.len(), page);
                Ok(summaries)
            }
            Err(e) => {
                debug!("Non-JSON response received from {}: {}", url, e);
                Ok(Vec::new())
            }
        }
    }

    /// Fetch the full detail payload for one model.
    pub async fn fetch_model_details(&self, model_id: &str) -> Result<serde_json::Value> {
        self.ensure_authenticated().await?;

        let url = self.endpoint(&["api", "models", model_id])?;
        let request = self.http()?.get(url.clone());
        let response = self.send(request, &url, Some(self.request_timeout)).await?;
        let body = response.bytes().await.map_err(|e| transport(&url, e))?;

        serde_json::from_slice(&body).map_err(|e| VaultError::Transport {
            url: url.to_string(),
            message: format!("Model detail response was not JSON: {}", e),
        })
    }

    /// Download `url` to `destination`.
    ///
    /// The body is streamed chunk by chunk into `<destination>.part`, which is
    /// renamed to `destination` only after the stream completes. Waiting for
    /// the response headers and each chunk read are bounded by the download
    /// timeout; the transfer as a whole is not. The bearer token is only sent
    /// to the catalog's own origin.
    pub async fn download_file(&self, url: &str, destination: &Path) -> Result<u64> {
        self.ensure_authenticated().await?;
        debug!("Downloading {} to {}", url, destination.display());

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::io_with_path(e, parent))?;
        }

        let temp_path = PathBuf::from(format!(
            "{}{}",
            destination.display(),
            NetworkConfig::DOWNLOAD_TEMP_SUFFIX
        ));

        match self.do_download(url, &temp_path).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(VaultError::io_with_path(e, destination));
                }
                info!("Downloaded {} bytes to {}", bytes, destination.display());
                Ok(bytes)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    /// Release the connection pool. Later requests fail.
    pub fn close(&self) {
        if let Ok(mut guard) = self.http.write() {
            if guard.take().is_some() {
                debug!("Closed catalog client for {}", self.base_url);
            }
        }
    }

    // Internal methods

    async fn ensure_authenticated(&self) -> Result<()> {
        if !self.auth.lock().await.authenticated {
            self.authenticate().await?;
        }
        Ok(())
    }

    fn http(&self) -> Result<Client> {
        self.http
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| VaultError::Transport {
                url: self.base_url.to_string(),
                message: "catalog client is closed".to_string(),
            })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| VaultError::Config {
                message: format!("Catalog base URL cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send `request`, attaching the bearer token only for the catalog origin.
    ///
    /// `timeout` is a whole-request deadline, body included. Downloads pass
    /// `None` and bound each read themselves.
    async fn send(
        &self,
        request: RequestBuilder,
        url: &Url,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        let request = match self.auth.lock().await.token.as_deref() {
            Some(token) if self.is_catalog_origin(url) => request.bearer_auth(token),
            _ => request,
        };
        let request = match timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                VaultError::Timeout {
                    url: url.to_string(),
                }
            } else {
                transport(url, e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(VaultError::Transport {
                url: url.to_string(),
                message: format!("HTTP {}", status),
            })
        }
    }

    fn is_catalog_origin(&self, url: &Url) -> bool {
        url.origin() == self.base_url.origin()
    }

    async fn do_download(&self, url: &str, temp_path: &Path) -> Result<u64> {
        let parsed = Url::parse(url).map_err(|e| VaultError::DownloadFailed {
            url: url.to_string(),
            message: format!("invalid URL: {}", e),
        })?;

        let request = self.http()?.get(parsed.clone());
        let headers = self.send(request, &parsed, None);
        let response = tokio::time::timeout(self.download_timeout, headers)
            .await
            .map_err(|_| VaultError::Timeout {
                url: url.to_string(),
            })?
            .map_err(|e| VaultError::DownloadFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| VaultError::io_with_path(e, temp_path))?;

        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.download_timeout, stream.next())
                .await
                .map_err(|_| VaultError::Timeout {
                    url: url.to_string(),
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| VaultError::DownloadFailed {
                url: url.to_string(),
                message: format!("Error reading download stream: {}", e),
            })?;

            // Re-slice so no single write exceeds the configured chunk size.
            for piece in chunk.chunks(NetworkConfig::DOWNLOAD_CHUNK_SIZE) {
                file.write_all(piece)
                    .await
                    .map_err(|e| VaultError::io_with_path(e, temp_path))?;
            }
            bytes_written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| VaultError::io_with_path(e, temp_path))?;
        file.sync_all()
            .await
            .map_err(|e| VaultError::io_with_path(e, temp_path))?;

        Ok(bytes_written)
    }
}

fn transport(url: &Url, err: reqwest::Error) -> VaultError {
    VaultError::Transport {
        url: url.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl CatalogSource for RemoteCatalogClient {
    async fn authenticate(&self) -> Result<()> {
        RemoteCatalogClient::authenticate(self).await
    }

    async fn fetch_models(
        &self,
        page: u32,
        per_page: u32,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ModelSummary>> {
        RemoteCatalogClient::fetch_models(self, page, per_page, updated_after).await
    }

    async fn fetch_model_details(&self, model_id: &str) -> Result<serde_json::Value> {
        RemoteCatalogClient::fetch_model_details(self, model_id).await
    }

    async fn download_file(&self, url: &str, destination: &Path) -> Result<u64> {
        RemoteCatalogClient::download_file(self, url, destination).await
    }

    async fn close(&self) {
        RemoteCatalogClient::close(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> RemoteCatalogClient {
        RemoteCatalogClient::new(CatalogSettings::new(base)).unwrap()
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let err = RemoteCatalogClient::new(CatalogSettings::new("not a url")).unwrap_err();
        assert!(matches!(err, VaultError::Config { .. }));
    }

    #[test]
    fn test_endpoint_building() {
        let c = client("https://catalog.example.test");
        assert_eq!(
            c.endpoint(&["api", "models"]).unwrap().as_str(),
            "https://catalog.example.test/api/models"
        );

        let c = client("https://catalog.example.test/base/");
        assert_eq!(
            c.endpoint(&["api", "models", "a b/c"]).unwrap().as_str(),
            "https://catalog.example.test/base/api/models/a%20b%2Fc"
        );
        c.close();
    }

    #[tokio::test]
    async fn test_token_authentication_is_local() {
        let c = RemoteCatalogClient::new(
            CatalogSettings::new("http://127.0.0.1:9").with_token("abc"),
        )
        .unwrap();
        assert!(!c.is_authenticated().await);
        c.authenticate().await.unwrap();
        assert!(c.is_authenticated().await);
        c.close();
    }

    #[tokio::test]
    async fn test_anonymous_authentication() {
        let c = client("http://127.0.0.1:9");
        c.authenticate().await.unwrap();
        assert!(c.is_authenticated().await);
        c.close();
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let c = client("http://127.0.0.1:9");
        c.close();
        assert!(c.is_closed());
        let err = c.fetch_model_details("1").await.unwrap_err();
        assert!(matches!(err, VaultError::Transport { .. }));
    }
}
