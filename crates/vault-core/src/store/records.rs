//! Row types of the catalog store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRecord {
    pub id: String,
    pub display_name: String,
    pub username: Option<String>,
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    /// Derived key: explicit id, else slug, else name.
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub author_id: Option<String>,
}

impl ModelRecord {
    /// A fresh row with only identity and name set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            source_url: None,
            thumbnail_url: None,
            created_at: None,
            updated_at: None,
            author_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRecord {
    pub id: String,
    pub model_id: String,
    pub filename: String,
    pub filetype: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub download_url: Option<String>,
    /// Set only after the file has been materialized.
    pub local_path: Option<String>,
}

impl AttachmentRecord {
    pub fn new(id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model_id: model_id.into(),
            filename: String::new(),
            filetype: None,
            size: None,
            checksum: None,
            download_url: None,
            local_path: None,
        }
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub authors: usize,
    pub tags: usize,
    pub models: usize,
    pub attachments: usize,
}
