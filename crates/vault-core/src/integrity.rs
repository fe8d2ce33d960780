//! Read-only audit of materialized attachments.

use crate::error::{Result, VaultError};
use crate::storage::{verify_checksum, DigestAlgorithm};
use crate::store::{AttachmentRecord, CatalogStore};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// One attachment that failed the audit.
#[derive(Debug)]
pub struct IntegrityFinding {
    pub attachment_id: String,
    pub model_id: String,
    pub path: PathBuf,
    /// Either [`VaultError::MissingFile`], [`VaultError::ChecksumMismatch`] or
    /// the I/O error that prevented hashing.
    pub error: VaultError,
}

/// Result of [`check_integrity`].
#[derive(Debug, Default)]
pub struct IntegrityReport {
    /// Attachments with a recorded local path.
    pub checked: usize,
    pub passed: usize,
    /// Passed files that had no recorded checksum to compare against.
    pub unchecked: usize,
    pub findings: Vec<IntegrityFinding>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn missing(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f.error, VaultError::MissingFile(_)))
            .count()
    }

    pub fn mismatched(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| matches!(f.error, VaultError::ChecksumMismatch { .. }))
            .count()
    }
}

/// Resolve a stored local path; relative paths live under `storage_root`.
///
/// A relative path that already begins with `storage_root` is taken as is.
pub fn resolve_local_path(storage_root: &Path, local_path: &str) -> PathBuf {
    let path = Path::new(local_path);
    if path.is_absolute() || path.starts_with(storage_root) {
        path.to_path_buf()
    } else {
        storage_root.join(path)
    }
}

fn audit(
    storage_root: &Path,
    attachment: &AttachmentRecord,
) -> (PathBuf, std::result::Result<Option<DigestAlgorithm>, VaultError>) {
    let local_path = attachment.local_path.as_deref().unwrap_or_default();
    let path = resolve_local_path(storage_root, local_path);

    if !path.is_file() {
        let error = VaultError::MissingFile(path.clone());
        return (path, Err(error));
    }

    let checksum = attachment
        .checksum
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let verdict = match checksum {
        None => Ok(None),
        Some(c) => verify_checksum(&path, c).map(Some),
    };
    (path, verdict)
}

/// Verify every attachment that has been materialized.
///
/// Missing files and checksum mismatches are collected as findings. The
/// store is never modified.
pub fn check_integrity(store: &CatalogStore, storage_root: impl AsRef<Path>) -> Result<IntegrityReport> {
    let storage_root = storage_root.as_ref();
    let attachments = store.attachments_with_local_path()?;
    let mut report = IntegrityReport::default();

    for attachment in attachments {
        report.checked += 1;
        let (path, verdict) = audit(storage_root, &attachment);

        match verdict {
            Ok(Some(algorithm)) => {
                info!(
                    "Integrity OK: {} ({}, {})",
                    attachment.id,
                    path.display(),
                    algorithm
                );
                report.passed += 1;
            }
            Ok(None) => {
                info!("Integrity OK: {} ({}, no checksum)", attachment.id, path.display());
                report.passed += 1;
                report.unchecked += 1;
            }
            Err(error) => {
                warn!(
                    "Integrity FAILED: {} ({}): {}",
                    attachment.id,
                    path.display(),
                    error
                );
                report.findings.push(IntegrityFinding {
                    attachment_id: attachment.id,
                    model_id: attachment.model_id,
                    path,
                    error,
                });
            }
        }
    }

    info!(
        "Integrity check finished: {} checked, {} passed, {} findings",
        report.checked,
        report.passed,
        report.findings.len()
    );
    Ok(report)
}
