//! MakerVault Core - catalog synchronization engine.
//!
//! Mirrors a remote 3D-model catalog into a local SQLite store and a
//! content directory. Each run walks the remote listing, reconciles every
//! model (author, tags, attachments) in one transaction, and materializes
//! attachment files on disk. A separate integrity check audits stored files
//! against their recorded checksums.
//!
//! # Example
//!
//! ```rust,ignore
//! use vault_core::{synchronize_managed, CatalogSettings, CatalogStore, SyncOptions};
//!
//! #[tokio::main]
//! async fn main() -> vault_core::Result<()> {
//!     let store = CatalogStore::new("makervault.db")?;
//!     let options = SyncOptions { pages: 3, ..SyncOptions::default() };
//!
//!     let report = synchronize_managed(CatalogSettings::from_env(), store, &options, None).await?;
//!     println!("Persisted {} models", report.models_persisted);
//!
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod integrity;
pub mod stop;
pub mod storage;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use catalog::{CatalogSource, ModelDetail, ModelSummary, RemoteCatalogClient};
pub use config::{CatalogSettings, NetworkConfig, StorageConfig, SyncConfig};
pub use error::{Result, VaultError};
pub use integrity::{check_integrity, IntegrityFinding, IntegrityReport};
pub use stop::StopSignal;
pub use storage::{generate_storage_path, save_file, DigestAlgorithm, SavedFile};
pub use store::{
    AttachmentRecord, AuthorRecord, CatalogStore, ModelRecord, StoreCounts, TagRecord, UnitOfWork,
};
pub use sync::{
    synchronize_managed, ReconcileOutcome, ReconciliationEngine, Scheduler, SyncOptions,
    SyncReport, Synchronizer, TriggerOutcome,
};
