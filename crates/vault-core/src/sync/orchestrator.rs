//! Synchronization orchestrator.
//!
//! Walks the remote listing page by page and hands every entry to the
//! [`ReconciliationEngine`] through a bounded worker pool. Entries with the
//! same id are never reconciled concurrently.

use crate::catalog::{CatalogSource, RemoteCatalogClient};
use crate::config::{CatalogSettings, StorageConfig, SyncConfig};
use crate::error::{Result, VaultError};
use crate::stop::StopSignal;
use crate::store::CatalogStore;
use crate::sync::locks::KeyedLocks;
use crate::sync::reconcile::{MaterializeOptions, ReconcileOutcome, ReconciliationEngine};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Parameters of one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum number of listing pages to walk.
    pub pages: u32,
    pub per_page: u32,
    /// Only request entries updated after this instant.
    pub updated_after: Option<DateTime<Utc>>,
    pub download_files: bool,
    pub storage_root: PathBuf,
    /// Worker count per page, clamped to `1..=SyncConfig::MAX_CONCURRENCY`.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            pages: SyncConfig::DEFAULT_PAGES,
            per_page: SyncConfig::DEFAULT_PER_PAGE,
            updated_after: None,
            download_files: true,
            storage_root: PathBuf::from(StorageConfig::DEFAULT_STORAGE_ROOT),
            concurrency: SyncConfig::DEFAULT_CONCURRENCY,
        }
    }
}

impl SyncOptions {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, SyncConfig::MAX_CONCURRENCY)
    }
}

/// Summary of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages_fetched: u32,
    pub models_persisted: usize,
    pub models_skipped: usize,
    pub attachments_downloaded: usize,
    pub attachments_reused: usize,
    pub download_failures: usize,
    pub attachments_removed: usize,
    /// The run ended early because the stop signal was raised.
    pub stopped: bool,
}

impl SyncReport {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        self.models_persisted += 1;
        self.attachments_downloaded += outcome.downloaded;
        self.attachments_reused += outcome.reused;
        self.download_failures += outcome.download_failures;
        self.attachments_removed += outcome.removed_attachments;
    }
}

/// Drives a catalog source into a store.
pub struct Synchronizer {
    source: Arc<dyn CatalogSource>,
    engine: ReconciliationEngine,
    locks: KeyedLocks,
    stop: StopSignal,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("engine", &self.engine)
            .field("stopped", &self.stop.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    pub fn new(source: Arc<dyn CatalogSource>, store: CatalogStore) -> Self {
        Self {
            engine: ReconciliationEngine::new(source.clone(), store),
            source,
            locks: KeyedLocks::new(),
            stop: StopSignal::new(),
        }
    }

    /// Share an externally owned stop signal.
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run one synchronization pass.
    ///
    /// Authentication and listing failures propagate, as does any fatal
    /// error raised while processing a model (see [`VaultError::is_fatal`]);
    /// models already in flight on that page finish first. Other failures of
    /// a single model are logged and counted as skipped.
    pub async fn synchronize(&self, options: &SyncOptions) -> Result<SyncReport> {
        tokio::fs::create_dir_all(&options.storage_root)
            .await
            .map_err(|e| VaultError::io_with_path(e, &options.storage_root))?;
        self.source.authenticate().await?;

        let materialize = MaterializeOptions {
            download_files: options.download_files,
            storage_root: options.storage_root.clone(),
        };
        let concurrency = options.effective_concurrency();
        let mut report = SyncReport::default();

        for page in 1..=options.pages {
            if self.stop.is_stopped() {
                info!("Stop requested, ending sync before page {}", page);
                report.stopped = true;
                break;
            }

            let summaries = self
                .source
                .fetch_models(page, options.per_page, options.updated_after)
                .await?;
            report.pages_fetched += 1;

            if summaries.is_empty() {
                info!("No models returned for page {}", page);
                break;
            }
            info!("Processing {} models from page {}", summaries.len(), page);

            let mut ids = Vec::with_capacity(summaries.len());
            for summary in summaries {
                if let Some(id) = &summary.id {
                    ids.push(id.clone());
                } else {
                    warn!("Skipping model summary without id: {}", summary.label());
                    report.models_skipped += 1;
                }
            }

            let page_report = Mutex::new(std::mem::take(&mut report));
            let fatal: Mutex<Option<VaultError>> = Mutex::new(None);
            stream::iter(ids)
                .for_each_concurrent(concurrency, |model_id| {
                    let page_report = &page_report;
                    let fatal = &fatal;
                    let materialize = &materialize;
                    async move {
                        if fatal.lock().unwrap_or_else(|e| e.into_inner()).is_some() {
                            return;
                        }
                        let result = self.process_model(&model_id, materialize).await;
                        let mut report = page_report.lock().unwrap_or_else(|e| e.into_inner());
                        match result {
                            Ok(outcome) => report.record(&outcome),
                            Err(VaultError::Stopped) => report.stopped = true,
                            Err(e) if e.is_fatal() => {
                                error!("Aborting sync at model {}: {}", model_id, e);
                                let mut fatal = fatal.lock().unwrap_or_else(|e| e.into_inner());
                                fatal.get_or_insert(e);
                            }
                            Err(e) => {
                                report.models_skipped += 1;
                                warn!("Skipping model {}: {}", model_id, e);
                            }
                        }
                    }
                })
                .await;
            report = page_report.into_inner().unwrap_or_else(|e| e.into_inner());
            if let Some(e) = fatal.into_inner().unwrap_or_else(|e| e.into_inner()) {
                return Err(e);
            }

            if report.stopped {
                info!("Stop requested, ending sync after page {}", page);
                break;
            }
        }

        info!(
            "Sync finished: {} pages, {} models persisted, {} skipped, {} downloads ({} failed)",
            report.pages_fetched,
            report.models_persisted,
            report.models_skipped,
            report.attachments_downloaded,
            report.download_failures
        );
        Ok(report)
    }

    async fn process_model(
        &self,
        model_id: &str,
        materialize: &MaterializeOptions,
    ) -> Result<ReconcileOutcome> {
        self.stop.check()?;
        let _guard = self.locks.lock(model_id).await;
        debug!("Fetching details for model {}", model_id);
        let detail = self.source.fetch_model_details(model_id).await?;
        self.engine.reconcile_value(detail, materialize).await
    }
}

/// Closes the managed client when dropped.
struct ClientGuard(Arc<RemoteCatalogClient>);

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.close();
        debug!("Closed managed catalog client");
    }
}

/// Build a client from `settings`, run one pass, and close the client on
/// every exit path.
pub async fn synchronize_managed(
    settings: CatalogSettings,
    store: CatalogStore,
    options: &SyncOptions,
    stop: Option<StopSignal>,
) -> Result<SyncReport> {
    let client = Arc::new(RemoteCatalogClient::new(settings)?);
    let guard = ClientGuard(client.clone());

    let mut synchronizer = Synchronizer::new(client, store);
    if let Some(stop) = stop {
        synchronizer = synchronizer.with_stop_signal(stop);
    }
    let result = synchronizer.synchronize(options).await;
    drop(guard);
    result
}
