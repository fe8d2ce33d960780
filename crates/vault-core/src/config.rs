//! Centralized configuration for MakerVault.
//!
//! Constants for network and storage behaviour, plus the environment-derived
//! catalog settings used to build a client.

use std::path::PathBuf;
use std::time::Duration;

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://makerworld.bambulab.com";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DOWNLOAD_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const DOWNLOAD_CHUNK_SIZE: usize = 8192;
    pub const DOWNLOAD_TEMP_SUFFIX: &'static str = ".part";
    pub const USER_AGENT: &'static str = concat!("MakerVault/", env!("CARGO_PKG_VERSION"));
}

/// Storage and hashing configuration.
pub struct StorageConfig;

impl StorageConfig {
    /// Chunk size for streaming digests (1 MiB).
    pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;
    pub const DEFAULT_STORAGE_ROOT: &'static str = "storage/models";
    pub const DEFAULT_DATABASE_PATH: &'static str = "makervault.db";
    /// Random bytes in a generated storage filename prefix.
    pub const UNIQUE_SUFFIX_BYTES: usize = 8;
}

/// Synchronization defaults.
pub struct SyncConfig;

impl SyncConfig {
    pub const DEFAULT_PAGES: u32 = 1;
    pub const DEFAULT_PER_PAGE: u32 = 20;
    pub const DEFAULT_CONCURRENCY: usize = 4;
    pub const MAX_CONCURRENCY: usize = 8;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);
}

/// Environment variable names read by [`CatalogSettings::from_env`].
pub mod env_vars {
    pub const BASE_URL: &str = "MAKERWORLD_BASE_URL";
    pub const USERNAME: &str = "MAKERWORLD_USERNAME";
    pub const PASSWORD: &str = "MAKERWORLD_PASSWORD";
    pub const TOKEN: &str = "MAKERWORLD_TOKEN";
}

/// Connection settings for the remote catalog.
#[derive(Clone, Default)]
pub struct CatalogSettings {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for CatalogSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogSettings")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CatalogSettings {
    /// Settings for an anonymous client against `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Resolve settings from the environment.
    ///
    /// Unset or blank variables are treated as absent; the base URL falls
    /// back to [`NetworkConfig::DEFAULT_BASE_URL`].
    pub fn from_env() -> Self {
        Self {
            base_url: read_env(env_vars::BASE_URL)
                .unwrap_or_else(|| NetworkConfig::DEFAULT_BASE_URL.to_string()),
            username: read_env(env_vars::USERNAME),
            password: read_env(env_vars::PASSWORD),
            token: read_env(env_vars::TOKEN),
        }
    }

    /// Overlay explicitly supplied values on top of these settings.
    pub fn with_overrides(
        mut self,
        base_url: Option<String>,
        username: Option<String>,
        password: Option<String>,
        token: Option<String>,
    ) -> Self {
        if let Some(base_url) = non_blank(base_url) {
            self.base_url = base_url;
        }
        self.username = non_blank(username).or(self.username);
        self.password = non_blank(password).or(self.password);
        self.token = non_blank(token).or(self.token);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Default storage root relative to the working directory.
pub fn default_storage_root() -> PathBuf {
    PathBuf::from(StorageConfig::DEFAULT_STORAGE_ROOT)
}

fn read_env(name: &str) -> Option<String> {
    non_blank(std::env::var(name).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
