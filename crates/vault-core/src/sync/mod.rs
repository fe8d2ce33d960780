//! Catalog synchronization.
//!
//! - `orchestrator`: paging, worker pool and client lifecycle
//! - `reconcile`: per-model convergence of the local store
//! - `scheduler`: periodic runs with at-most-one in flight
//! - `locks`: per-model-id serialization

mod locks;
mod orchestrator;
mod reconcile;
mod scheduler;

pub use locks::{KeyedGuard, KeyedLocks};
pub use orchestrator::{synchronize_managed, SyncOptions, SyncReport, Synchronizer};
pub use reconcile::{MaterializeOptions, ReconcileOutcome, ReconciliationEngine};
pub use scheduler::{Scheduler, TriggerOutcome};
