//! Abstraction over the remote catalog.

use crate::catalog::payload::ModelSummary;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// Remote catalog operations used by the synchronizer.
///
/// [`RemoteCatalogClient`](super::RemoteCatalogClient) is the HTTP
/// implementation; tests substitute in-memory catalogs.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Establish credentials. Idempotent once it has succeeded.
    async fn authenticate(&self) -> Result<()>;

    /// Fetch one listing page. An empty page means there are no more pages.
    async fn fetch_models(
        &self,
        page: u32,
        per_page: u32,
        updated_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<ModelSummary>>;

    /// Fetch the full detail payload of one catalog entry.
    async fn fetch_model_details(&self, model_id: &str) -> Result<serde_json::Value>;

    /// Stream `url` to `destination`, returning the number of bytes written.
    ///
    /// On failure nothing is left at `destination`.
    async fn download_file(&self, url: &str, destination: &Path) -> Result<u64>;

    /// Release underlying connections.
    async fn close(&self) {}
}
