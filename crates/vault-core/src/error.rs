//! Error types for the MakerVault sync engine.
//!
//! Errors are grouped by how far they propagate: catalog-level failures
//! (authentication, listing) abort a run, while per-model and per-attachment
//! failures are logged and skipped by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the sync engine.
#[derive(Debug, Error)]
pub enum VaultError {
    // Remote catalog errors
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Malformed payload: {message}")]
    MalformedPayload { message: String },

    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    // Integrity findings
    #[error("File missing: {0}")]
    MissingFile(PathBuf),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Synchronization stopped")]
    Stopped,
}

/// Result type alias for sync engine operations.
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(err: rusqlite::Error) -> Self {
        VaultError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_timeout() {
            VaultError::Timeout { url }
        } else {
            VaultError::Transport {
                url,
                message: err.to_string(),
            }
        }
    }
}

impl VaultError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VaultError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        VaultError::MalformedPayload {
            message: message.into(),
        }
    }

    /// Whether this error makes the whole synchronization run meaningless.
    ///
    /// Fatal errors abort the run and propagate to the caller; everything
    /// else is logged and skipped at model or attachment granularity.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VaultError::Authentication { .. }
                | VaultError::Config { .. }
                | VaultError::Database { .. }
                | VaultError::Stopped
        )
    }

    /// Whether this error is an integrity-check finding rather than a failure.
    pub fn is_integrity_finding(&self) -> bool {
        matches!(
            self,
            VaultError::MissingFile(_) | VaultError::ChecksumMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VaultError::Authentication {
            message: "login response missing token".into(),
        };
        assert_eq!(
            err.to_string(),
            "Authentication failed: login response missing token"
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(VaultError::Authentication {
            message: "401".into()
        }
        .is_fatal());
        assert!(!VaultError::Transport {
            url: "http://x".into(),
            message: "502".into()
        }
        .is_fatal());
        assert!(!VaultError::malformed("no id").is_fatal());
    }

    #[test]
    fn test_integrity_findings() {
        assert!(VaultError::MissingFile(PathBuf::from("/tmp/x")).is_integrity_finding());
        assert!(VaultError::ChecksumMismatch {
            expected: "abc123".into(),
            actual: "def456".into()
        }
        .is_integrity_finding());
        assert!(!VaultError::Stopped.is_integrity_finding());
    }
}
