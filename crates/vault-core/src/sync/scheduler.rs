//! Interval scheduler for synchronization runs.
//!
//! A spawned loop ticks every interval and triggers a run in its own task.
//! At most one run is in flight; a tick that lands while a run is still going
//! is dropped rather than queued.

use crate::error::Result;
use crate::stop::StopSignal;
use crate::sync::orchestrator::{SyncOptions, SyncReport, Synchronizer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Result of [`Scheduler::trigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Completed(SyncReport),
    AlreadyRunning,
}

struct SchedulerInner {
    synchronizer: Arc<Synchronizer>,
    options: SyncOptions,
    interval: Duration,
    running: AtomicBool,
    stop: StopSignal,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the in-flight flag when a run ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SchedulerInner {
    async fn trigger(&self) -> Result<TriggerOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in flight, skipping trigger");
            return Ok(TriggerOutcome::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        info!("Starting scheduled sync");
        let report = self.synchronizer.synchronize(&self.options).await?;
        Ok(TriggerOutcome::Completed(report))
    }
}

/// Periodically runs a [`Synchronizer`].
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("interval", &self.inner.interval)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// The scheduler shares the synchronizer's stop signal.
    pub fn new(synchronizer: Arc<Synchronizer>, options: SyncOptions, interval: Duration) -> Self {
        let stop = synchronizer.stop_signal();
        Self {
            inner: Arc::new(SchedulerInner {
                synchronizer,
                options,
                interval,
                running: AtomicBool::new(false),
                stop,
                task: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one sync now unless one is already in flight.
    pub async fn trigger(&self) -> Result<TriggerOutcome> {
        self.inner.trigger().await
    }

    /// Spawn the interval loop. The first tick fires immediately.
    ///
    /// Calling `start` on a scheduler that is already started does nothing.
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Scheduler already started");
            return;
        }

        self.inner.stop.clear();
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Scheduler started with interval {:?}", inner.interval);

            loop {
                tokio::select! {
                    _ = inner.stop.stopped() => {
                        info!("Scheduler stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let run = inner.clone();
                        tokio::spawn(async move {
                            match run.trigger().await {
                                Ok(TriggerOutcome::Completed(report)) => {
                                    debug!("Scheduled sync completed: {:?}", report);
                                }
                                Ok(TriggerOutcome::AlreadyRunning) => {}
                                Err(e) => error!("Scheduled sync failed: {}", e),
                            }
                        });
                    }
                }
            }
        }));
    }

    /// Raise the stop signal and end the interval loop.
    ///
    /// A run in flight observes the signal between models and returns early.
    pub fn stop(&self) {
        self.inner.stop.stop();
        let handle = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Whether the interval loop is active.
    pub fn is_started(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogSource, ModelSummary};
    use crate::error::VaultError;
    use crate::store::CatalogStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// One page with one model; detail fetches wait for `release`.
    #[derive(Default)]
    struct GatedCatalog {
        release: Notify,
        listings: AtomicUsize,
    }

    #[async_trait]
    impl CatalogSource for GatedCatalog {
        async fn authenticate(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch_models(
            &self,
            page: u32,
            _per_page: u32,
            _updated_after: Option<DateTime<Utc>>,
        ) -> Result<Vec<ModelSummary>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            if page == 1 {
                Ok(vec![ModelSummary::with_id("m1")])
            } else {
                Ok(Vec::new())
            }
        }

        async fn fetch_model_details(&self, model_id: &str) -> Result<Value> {
            self.release.notified().await;
            Ok(json!({"id": model_id, "name": "gated"}))
        }

        async fn download_file(&self, url: &str, _destination: &Path) -> Result<u64> {
            Err(VaultError::DownloadFailed {
                url: url.to_string(),
                message: "unused".into(),
            })
        }
    }

    fn scheduler(catalog: Arc<GatedCatalog>, interval: Duration) -> (Scheduler, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = CatalogStore::open_in_memory().unwrap();
        let synchronizer = Arc::new(Synchronizer::new(catalog, store));
        let options = SyncOptions {
            storage_root: tmp.path().join("files"),
            download_files: false,
            ..SyncOptions::default()
        };
        (Scheduler::new(synchronizer, options, interval), tmp)
    }

    #[tokio::test]
    async fn test_trigger_while_running_is_rejected() {
        let catalog = Arc::new(GatedCatalog::default());
        let (scheduler, _tmp) = scheduler(catalog.clone(), Duration::from_secs(3600));

        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.trigger().await })
        };
        while !scheduler.is_running() {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            scheduler.trigger().await.unwrap(),
            TriggerOutcome::AlreadyRunning
        );

        catalog.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        match outcome {
            TriggerOutcome::Completed(report) => assert_eq!(report.models_persisted, 1),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_start_runs_immediately_and_stop_ends_loop() {
        let catalog = Arc::new(GatedCatalog::default());
        let (scheduler, _tmp) = scheduler(catalog.clone(), Duration::from_secs(3600));

        scheduler.start();
        assert!(scheduler.is_started());
        while catalog.listings.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        scheduler.stop();
        catalog.release.notify_one();
        assert!(!scheduler.is_started());

        while scheduler.is_running() {
            tokio::task::yield_now().await;
        }
        assert_eq!(catalog.listings.load(Ordering::SeqCst), 1);
    }
}
