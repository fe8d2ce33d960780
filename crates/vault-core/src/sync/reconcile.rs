//! Reconciliation of one remote model detail into the local store.
//!
//! Attachments are materialized first, outside any transaction, because
//! downloads are async and may be slow. Everything the store sees for a model
//! is then written inside a single [`UnitOfWork`], so a failure leaves the
//! previous state of that model intact.

use crate::catalog::payload::{
    AttachmentPayload, AuthorPayload, ModelDetail, TagPayload, UNNAMED_MODEL,
};
use crate::catalog::CatalogSource;
use crate::error::{Result, VaultError};
use crate::storage::attachment_path;
use crate::store::{AttachmentRecord, AuthorRecord, CatalogStore, ModelRecord, TagRecord, UnitOfWork};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub model_id: String,
    pub model_name: String,
    /// Attachment rows present after the unit of work.
    pub attachments: usize,
    pub tags: usize,
    pub downloaded: usize,
    /// Attachments whose target file already existed.
    pub reused: usize,
    pub download_failures: usize,
    /// Attachment rows deleted because the payload no longer lists them.
    pub removed_attachments: usize,
}

/// Materialization settings for one reconciliation.
#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub download_files: bool,
    pub storage_root: PathBuf,
}

#[derive(Debug, Default)]
struct Materialized {
    paths: HashMap<String, String>,
    downloaded: usize,
    reused: usize,
    failures: usize,
}

/// Maps remote detail payloads onto authors, models, tags and attachments.
#[derive(Clone)]
pub struct ReconciliationEngine {
    source: Arc<dyn CatalogSource>,
    store: CatalogStore,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ReconciliationEngine {
    pub fn new(source: Arc<dyn CatalogSource>, store: CatalogStore) -> Self {
        Self { source, store }
    }

    /// Decode a raw detail body and reconcile it.
    pub async fn reconcile_value(
        &self,
        payload: Value,
        options: &MaterializeOptions,
    ) -> Result<ReconcileOutcome> {
        let detail = ModelDetail::from_value(payload)?;
        self.reconcile(&detail, options).await
    }

    /// Converge the stored state of one model to `detail`.
    ///
    /// Fails with [`VaultError::MalformedPayload`] before touching anything
    /// when the payload carries no id.
    pub async fn reconcile(
        &self,
        detail: &ModelDetail,
        options: &MaterializeOptions,
    ) -> Result<ReconcileOutcome> {
        let Some(model_id) = detail.id.clone() else {
            warn!("Skipping model payload without id");
            return Err(VaultError::malformed("model payload has no id"));
        };

        let materialized = if options.download_files {
            self.materialize(&model_id, detail.attachment_entries(), &options.storage_root)
                .await?
        } else {
            Materialized::default()
        };

        let mut outcome = self
            .store
            .transaction(|uow| apply_detail(uow, &model_id, detail, &materialized.paths))?;
        outcome.downloaded = materialized.downloaded;
        outcome.reused = materialized.reused;
        outcome.download_failures = materialized.failures;

        info!(
            "Persisted model {} ({} attachments)",
            outcome.model_name, outcome.attachments
        );
        Ok(outcome)
    }

    async fn materialize(
        &self,
        model_id: &str,
        entries: &[AttachmentPayload],
        storage_root: &Path,
    ) -> Result<Materialized> {
        let mut result = Materialized::default();
        // Recorded paths stay valid regardless of the working directory.
        let storage_root = std::path::absolute(storage_root)
            .map_err(|e| VaultError::io_with_path(e, storage_root))?;

        for entry in entries {
            let (Some(attachment_id), Some(url)) = (entry.resolved_id(), entry.resolved_download_url())
            else {
                continue;
            };

            let filename = match entry.resolved_filename() {
                Some(name) => Some(name),
                None => self
                    .store
                    .get_attachment(&attachment_id)?
                    .map(|stored| stored.filename),
            };
            let target = attachment_path(&storage_root, model_id, filename.as_deref(), &attachment_id);

            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                debug!("Attachment {} already present at {}", attachment_id, target.display());
                result.reused += 1;
                result
                    .paths
                    .insert(attachment_id, target.to_string_lossy().into_owned());
                continue;
            }

            match self.source.download_file(&url, &target).await {
                Ok(bytes) => {
                    debug!("Downloaded {} ({} bytes)", target.display(), bytes);
                    result.downloaded += 1;
                    result
                        .paths
                        .insert(attachment_id, target.to_string_lossy().into_owned());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to download attachment {}: {}", attachment_id, e);
                    result.failures += 1;
                }
            }
        }

        Ok(result)
    }
}

fn apply_detail(
    uow: &UnitOfWork<'_>,
    model_id: &str,
    detail: &ModelDetail,
    local_paths: &HashMap<String, String>,
) -> Result<ReconcileOutcome> {
    let author_id = match detail.resolved_author() {
        Some(payload) => Some(upsert_author(uow, payload)?),
        None => None,
    };

    let previous = uow.get_model(model_id)?;
    let name = detail
        .resolved_name()
        .or_else(|| previous.map(|m| m.name))
        .unwrap_or_else(|| UNNAMED_MODEL.to_string());

    let model = ModelRecord {
        id: model_id.to_string(),
        name,
        description: detail.description.clone(),
        source_url: detail.resolved_source_url(),
        thumbnail_url: detail.resolved_thumbnail_url(),
        created_at: detail.created_at(),
        updated_at: detail.updated_at(),
        author_id,
    };
    uow.upsert_model(&model)?;

    uow.clear_model_tags(model_id)?;
    let mut tags = 0;
    for tag in &detail.tags {
        let Some(tag_id) = resolve_tag(uow, tag)? else {
            debug!("Skipping tag without key on model {}", model_id);
            continue;
        };
        uow.link_tag(model_id, &tag_id)?;
        tags += 1;
    }

    let mut seen = HashSet::new();
    for entry in detail.attachment_entries() {
        let Some(attachment_id) = entry.resolved_id() else {
            debug!("Skipping attachment without id on model {}", model_id);
            continue;
        };

        let mut record = uow
            .get_attachment(&attachment_id)?
            .unwrap_or_else(|| AttachmentRecord::new(&attachment_id, model_id));
        record.model_id = model_id.to_string();
        if let Some(filename) = entry.resolved_filename() {
            record.filename = filename;
        }
        record.filetype = entry.resolved_filetype();
        record.size = entry.size;
        record.checksum = entry.resolved_checksum();
        record.download_url = entry.resolved_download_url();
        if let Some(path) = local_paths.get(&attachment_id) {
            record.local_path = Some(path.clone());
        }

        uow.upsert_attachment(&record)?;
        seen.insert(attachment_id);
    }

    let mut removed = 0;
    for stale in uow.attachments_for_model(model_id)? {
        if !seen.contains(&stale.id) && uow.delete_attachment(&stale.id)? {
            debug!("Removed attachment {} from model {}", stale.id, model_id);
            removed += 1;
        }
    }

    Ok(ReconcileOutcome {
        model_id: model.id,
        model_name: model.name,
        attachments: seen.len(),
        tags,
        removed_attachments: removed,
        ..ReconcileOutcome::default()
    })
}

/// Create or merge an author, returning its id.
fn upsert_author(
    uow: &UnitOfWork<'_>,
    payload: &AuthorPayload,
) -> Result<String> {
    let id = payload
        .id
        .clone()
        .ok_or_else(|| VaultError::malformed("author payload has no id"))?;

    let record = match uow.get_author(&id)? {
        Some(existing) => AuthorRecord {
            id: id.clone(),
            display_name: payload.display_name.clone().unwrap_or(existing.display_name),
            username: payload.username.clone().or(existing.username),
            profile_url: payload.profile_url.clone().or(existing.profile_url),
        },
        None => AuthorRecord {
            id: id.clone(),
            display_name: payload.resolved_display_name(),
            username: payload.username.clone(),
            profile_url: payload.profile_url.clone(),
        },
    };
    uow.upsert_author(&record)?;
    Ok(id)
}

/// Find or create the tag for `payload`, returning its id.
///
/// A new tag whose name is already held by a different key is stored as
/// `"<name> [<key>]"` to satisfy the unique name column, then
/// `"<name> [<key> 2]"` and so on if that is taken as well.
fn resolve_tag(uow: &UnitOfWork<'_>, payload: &TagPayload) -> Result<Option<String>> {
    let Some(key) = payload.key() else {
        return Ok(None);
    };
    if uow.get_tag(&key)?.is_some() {
        return Ok(Some(key));
    }

    let base = payload.resolved_name().unwrap_or_else(|| key.clone());
    let mut name = base.clone();
    let mut attempt = 1;
    while uow.find_tag_by_name(&name)?.is_some() {
        name = match attempt {
            1 => format!("{} [{}]", base, key),
            n => format!("{} [{} {}]", base, key, n),
        };
        attempt += 1;
    }
    uow.insert_tag(&TagRecord {
        id: key.clone(),
        name,
        slug: payload.slug(),
    })?;
    Ok(Some(key))
}
