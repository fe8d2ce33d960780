//! SQLite catalog store.
//!
//! Holds authors, tags, models and attachments. Reads go through
//! [`CatalogStore`] directly; writes for one model are grouped in a
//! [`UnitOfWork`] that is committed or rolled back as a whole.

mod queries;
mod records;

pub use records::{AttachmentRecord, AuthorRecord, ModelRecord, StoreCounts, TagRecord};

use crate::error::{Result, VaultError};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// SQLite-backed persistence for the synchronized catalog.
///
/// Thread-safe via an internal mutex on the single connection, which also
/// serializes unit-of-work transactions.
#[derive(Clone)]
pub struct CatalogStore {
    db_path: Option<PathBuf>,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl CatalogStore {
    /// Create or open a store at the given path.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| VaultError::io_with_path(e, parent))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA busy_timeout=30000;
            PRAGMA synchronous=NORMAL;
            ",
        )?;
        Self::from_connection(conn, Some(db_path))
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        queries::ensure_schema(&conn)?;
        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| VaultError::Database {
            message: "Failed to acquire connection lock".to_string(),
            source: None,
        })
    }

    /// Run `work` inside one transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when it
    /// returns `Err` (or panics), so a failed model leaves no partial rows.
    pub fn transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T>,
    {
        let mut conn = self.lock()?;
        let uow = UnitOfWork {
            tx: conn.transaction()?,
        };

        match work(&uow) {
            Ok(value) => {
                uow.tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = uow.tx.rollback() {
                    warn!("Rollback failed: {}", rollback_err);
                }
                debug!("Rolled back unit of work: {}", e);
                Err(e)
            }
        }
    }

    // ========================================
    // Reads
    // ========================================

    pub fn get_author(&self, id: &str) -> Result<Option<AuthorRecord>> {
        queries::get_author(&*self.lock()?, id)
    }

    pub fn get_tag(&self, id: &str) -> Result<Option<TagRecord>> {
        queries::get_tag(&*self.lock()?, id)
    }

    pub fn get_model(&self, id: &str) -> Result<Option<ModelRecord>> {
        queries::get_model(&*self.lock()?, id)
    }

    pub fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRecord>> {
        queries::get_attachment(&*self.lock()?, id)
    }

    pub fn list_models(&self) -> Result<Vec<ModelRecord>> {
        queries::list_models(&*self.lock()?)
    }

    pub fn tags_for_model(&self, model_id: &str) -> Result<Vec<TagRecord>> {
        queries::tags_for_model(&*self.lock()?, model_id)
    }

    pub fn attachments_for_model(&self, model_id: &str) -> Result<Vec<AttachmentRecord>> {
        queries::attachments_for_model(&*self.lock()?, model_id)
    }

    /// Every attachment that has been materialized locally.
    pub fn attachments_with_local_path(&self) -> Result<Vec<AttachmentRecord>> {
        queries::attachments_with_local_path(&*self.lock()?)
    }

    pub fn counts(&self) -> Result<StoreCounts> {
        queries::counts(&*self.lock()?)
    }

    /// Delete a model together with its attachments and tag links.
    pub fn delete_model(&self, id: &str) -> Result<bool> {
        queries::delete_model(&*self.lock()?, id)
    }
}

/// Write access to the store scoped to one transaction.
///
/// Obtained only through [`CatalogStore::transaction`].
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl UnitOfWork<'_> {
    pub fn get_author(&self, id: &str) -> Result<Option<AuthorRecord>> {
        queries::get_author(&self.tx, id)
    }

    pub fn upsert_author(&self, author: &AuthorRecord) -> Result<()> {
        queries::upsert_author(&self.tx, author)
    }

    pub fn get_model(&self, id: &str) -> Result<Option<ModelRecord>> {
        queries::get_model(&self.tx, id)
    }

    pub fn upsert_model(&self, model: &ModelRecord) -> Result<()> {
        queries::upsert_model(&self.tx, model)
    }

    pub fn get_tag(&self, id: &str) -> Result<Option<TagRecord>> {
        queries::get_tag(&self.tx, id)
    }

    pub fn find_tag_by_name(&self, name: &str) -> Result<Option<TagRecord>> {
        queries::find_tag_by_name(&self.tx, name)
    }

    pub fn insert_tag(&self, tag: &TagRecord) -> Result<()> {
        queries::insert_tag(&self.tx, tag)
    }

    pub fn tags_for_model(&self, model_id: &str) -> Result<Vec<TagRecord>> {
        queries::tags_for_model(&self.tx, model_id)
    }

    /// Remove every tag association of a model. Tags themselves are kept.
    pub fn clear_model_tags(&self, model_id: &str) -> Result<usize> {
        queries::clear_model_tags(&self.tx, model_id)
    }

    /// Associate a tag with a model; linking twice is a no-op.
    pub fn link_tag(&self, model_id: &str, tag_id: &str) -> Result<()> {
        queries::link_tag(&self.tx, model_id, tag_id)
    }

    pub fn get_attachment(&self, id: &str) -> Result<Option<AttachmentRecord>> {
        queries::get_attachment(&self.tx, id)
    }

    pub fn upsert_attachment(&self, attachment: &AttachmentRecord) -> Result<()> {
        queries::upsert_attachment(&self.tx, attachment)
    }

    pub fn attachments_for_model(&self, model_id: &str) -> Result<Vec<AttachmentRecord>> {
        queries::attachments_for_model(&self.tx, model_id)
    }

    pub fn delete_attachment(&self, id: &str) -> Result<bool> {
        queries::delete_attachment(&self.tx, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn author(id: &str) -> AuthorRecord {
        AuthorRecord {
            id: id.to_string(),
            display_name: format!("Author {}", id),
            username: None,
            profile_url: None,
        }
    }

    #[test]
    fn test_file_backed_store_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("vault.db");

        {
            let store = CatalogStore::new(&path).unwrap();
            store
                .transaction(|uow| uow.upsert_author(&author("a1")))
                .unwrap();
        }

        let reopened = CatalogStore::new(&path).unwrap();
        assert_eq!(reopened.db_path(), Some(path.as_path()));
        assert!(reopened.get_author("a1").unwrap().is_some());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = CatalogStore::open_in_memory().unwrap();

        let result: Result<()> = store.transaction(|uow| {
            uow.upsert_author(&author("a1"))?;
            Err(VaultError::malformed("boom"))
        });

        assert!(result.is_err());
        assert!(store.get_author("a1").unwrap().is_none());
    }

    #[test]
    fn test_model_roundtrip_with_timestamps() {
        let store = CatalogStore::open_in_memory().unwrap();
        let mut model = ModelRecord::new("m1", "Benchy");
        model.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

        store.transaction(|uow| uow.upsert_model(&model)).unwrap();
        assert_eq!(store.get_model("m1").unwrap(), Some(model));
    }

    #[test]
    fn test_upsert_does_not_duplicate() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .transaction(|uow| {
                uow.upsert_author(&author("a1"))?;
                uow.upsert_author(&author("a1"))?;
                let mut model = ModelRecord::new("m1", "first");
                model.author_id = Some("a1".into());
                uow.upsert_model(&model)?;
                model.name = "second".into();
                uow.upsert_model(&model)
            })
            .unwrap();

        let counts = store.counts().unwrap();
        assert_eq!(counts.authors, 1);
        assert_eq!(counts.models, 1);
        assert_eq!(store.get_model("m1").unwrap().unwrap().name, "second");
    }

    #[test]
    fn test_tag_links_are_idempotent() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .transaction(|uow| {
                uow.upsert_model(&ModelRecord::new("m1", "m"))?;
                uow.insert_tag(&TagRecord {
                    id: "pla".into(),
                    name: "PLA".into(),
                    slug: Some("pla".into()),
                })?;
                uow.link_tag("m1", "pla")?;
                uow.link_tag("m1", "pla")
            })
            .unwrap();

        assert_eq!(store.tags_for_model("m1").unwrap().len(), 1);

        store
            .transaction(|uow| uow.clear_model_tags("m1").map(|_| ()))
            .unwrap();
        assert!(store.tags_for_model("m1").unwrap().is_empty());
        assert!(store.get_tag("pla").unwrap().is_some());
    }

    #[test]
    fn test_delete_model_cascades_to_attachments_and_links() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .transaction(|uow| {
                uow.upsert_model(&ModelRecord::new("m1", "m"))?;
                uow.insert_tag(&TagRecord {
                    id: "t".into(),
                    name: "T".into(),
                    slug: None,
                })?;
                uow.link_tag("m1", "t")?;
                let mut attachment = AttachmentRecord::new("f1", "m1");
                attachment.local_path = Some("/tmp/f1".into());
                uow.upsert_attachment(&attachment)
            })
            .unwrap();

        assert_eq!(store.attachments_with_local_path().unwrap().len(), 1);
        assert!(store.delete_model("m1").unwrap());

        let counts = store.counts().unwrap();
        assert_eq!(counts.models, 0);
        assert_eq!(counts.attachments, 0);
        assert_eq!(counts.tags, 1);
        assert!(store.tags_for_model("m1").unwrap().is_empty());
    }

    #[test]
    fn test_attachment_requires_existing_model() {
        let store = CatalogStore::open_in_memory().unwrap();
        let result = store.transaction(|uow| uow.upsert_attachment(&AttachmentRecord::new("f1", "missing")));
        assert!(matches!(result, Err(VaultError::Database { .. })));
    }
}
