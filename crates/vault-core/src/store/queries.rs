//! SQL shared by [`CatalogStore`](super::CatalogStore) reads and
//! [`UnitOfWork`](super::UnitOfWork) writes.
//!
//! Every function takes a plain `&Connection`; a `Transaction` derefs to one.

use super::records::{AttachmentRecord, AuthorRecord, ModelRecord, StoreCounts, TagRecord};
use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const MODEL_COLUMNS: &str =
    "id, name, description, source_url, thumbnail_url, created_at, updated_at, author_id";
const ATTACHMENT_COLUMNS: &str =
    "id, model_id, filename, filetype, size, checksum, download_url, local_path";

pub(crate) fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS authors (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            username TEXT,
            profile_url TEXT
        );

        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            slug TEXT
        );

        CREATE TABLE IF NOT EXISTS models (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            source_url TEXT,
            thumbnail_url TEXT,
            created_at TEXT,
            updated_at TEXT,
            author_id TEXT REFERENCES authors(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS model_tags (
            model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
            PRIMARY KEY (model_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            model_id TEXT NOT NULL REFERENCES models(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            filetype TEXT,
            size INTEGER,
            checksum TEXT,
            download_url TEXT,
            local_path TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_models_author ON models(author_id);
        CREATE INDEX IF NOT EXISTS idx_attachments_model ON attachments(model_id);
        CREATE INDEX IF NOT EXISTS idx_model_tags_tag ON model_tags(tag_id);
        "#,
    )?;
    Ok(())
}

fn format_timestamp(value: &Option<DateTime<Utc>>) -> Option<String> {
    value
        .as_ref()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn parse_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn row_to_author(row: &Row<'_>) -> rusqlite::Result<AuthorRecord> {
    Ok(AuthorRecord {
        id: row.get(0)?,
        display_name: row.get(1)?,
        username: row.get(2)?,
        profile_url: row.get(3)?,
    })
}

fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<TagRecord> {
    Ok(TagRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
    })
}

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    Ok(ModelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        source_url: row.get(3)?,
        thumbnail_url: row.get(4)?,
        created_at: parse_timestamp(row.get(5)?),
        updated_at: parse_timestamp(row.get(6)?),
        author_id: row.get(7)?,
    })
}

fn row_to_attachment(row: &Row<'_>) -> rusqlite::Result<AttachmentRecord> {
    let size: Option<i64> = row.get(4)?;
    Ok(AttachmentRecord {
        id: row.get(0)?,
        model_id: row.get(1)?,
        filename: row.get(2)?,
        filetype: row.get(3)?,
        size: size.and_then(|s| u64::try_from(s).ok()),
        checksum: row.get(5)?,
        download_url: row.get(6)?,
        local_path: row.get(7)?,
    })
}

// ========================================
// Authors
// ========================================

pub(crate) fn get_author(conn: &Connection, id: &str) -> Result<Option<AuthorRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, display_name, username, profile_url FROM authors WHERE id = ?1",
            params![id],
            row_to_author,
        )
        .optional()?)
}

pub(crate) fn upsert_author(conn: &Connection, author: &AuthorRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO authors (id, display_name, username, profile_url)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             display_name=excluded.display_name,
             username=excluded.username,
             profile_url=excluded.profile_url",
        params![
            author.id,
            author.display_name,
            author.username,
            author.profile_url
        ],
    )?;
    Ok(())
}

// ========================================
// Tags
// ========================================

pub(crate) fn get_tag(conn: &Connection, id: &str) -> Result<Option<TagRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, name, slug FROM tags WHERE id = ?1",
            params![id],
            row_to_tag,
        )
        .optional()?)
}

pub(crate) fn find_tag_by_name(conn: &Connection, name: &str) -> Result<Option<TagRecord>> {
    Ok(conn
        .query_row(
            "SELECT id, name, slug FROM tags WHERE name = ?1",
            params![name],
            row_to_tag,
        )
        .optional()?)
}

pub(crate) fn insert_tag(conn: &Connection, tag: &TagRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO tags (id, name, slug) VALUES (?1, ?2, ?3)",
        params![tag.id, tag.name, tag.slug],
    )?;
    Ok(())
}

pub(crate) fn tags_for_model(conn: &Connection, model_id: &str) -> Result<Vec<TagRecord>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.name, t.slug FROM tags t
         JOIN model_tags mt ON mt.tag_id = t.id
         WHERE mt.model_id = ?1
         ORDER BY t.id",
    )?;
    let tags = stmt
        .query_map(params![model_id], row_to_tag)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tags)
}

pub(crate) fn clear_model_tags(conn: &Connection, model_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM model_tags WHERE model_id = ?1",
        params![model_id],
    )?)
}

pub(crate) fn link_tag(conn: &Connection, model_id: &str, tag_id: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO model_tags (model_id, tag_id) VALUES (?1, ?2)",
        params![model_id, tag_id],
    )?;
    Ok(())
}

// ========================================
// Models
// ========================================

pub(crate) fn get_model(conn: &Connection, id: &str) -> Result<Option<ModelRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM models WHERE id = ?1", MODEL_COLUMNS),
            params![id],
            row_to_model,
        )
        .optional()?)
}

pub(crate) fn upsert_model(conn: &Connection, model: &ModelRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO models (id, name, description, source_url, thumbnail_url,
                             created_at, updated_at, author_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             name=excluded.name,
             description=excluded.description,
             source_url=excluded.source_url,
             thumbnail_url=excluded.thumbnail_url,
             created_at=excluded.created_at,
             updated_at=excluded.updated_at,
             author_id=excluded.author_id",
        params![
            model.id,
            model.name,
            model.description,
            model.source_url,
            model.thumbnail_url,
            format_timestamp(&model.created_at),
            format_timestamp(&model.updated_at),
            model.author_id,
        ],
    )?;
    Ok(())
}

pub(crate) fn list_models(conn: &Connection) -> Result<Vec<ModelRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM models ORDER BY id",
        MODEL_COLUMNS
    ))?;
    let models = stmt
        .query_map([], row_to_model)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(models)
}

pub(crate) fn delete_model(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM models WHERE id = ?1", params![id])? > 0)
}

// ========================================
// Attachments
// ========================================

pub(crate) fn get_attachment(conn: &Connection, id: &str) -> Result<Option<AttachmentRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM attachments WHERE id = ?1", ATTACHMENT_COLUMNS),
            params![id],
            row_to_attachment,
        )
        .optional()?)
}

pub(crate) fn upsert_attachment(conn: &Connection, attachment: &AttachmentRecord) -> Result<()> {
    let size = attachment.size.and_then(|s| i64::try_from(s).ok());
    conn.execute(
        "INSERT INTO attachments (id, model_id, filename, filetype, size,
                                  checksum, download_url, local_path)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             model_id=excluded.model_id,
             filename=excluded.filename,
             filetype=excluded.filetype,
             size=excluded.size,
             checksum=excluded.checksum,
             download_url=excluded.download_url,
             local_path=excluded.local_path",
        params![
            attachment.id,
            attachment.model_id,
            attachment.filename,
            attachment.filetype,
            size,
            attachment.checksum,
            attachment.download_url,
            attachment.local_path,
        ],
    )?;
    Ok(())
}

pub(crate) fn attachments_for_model(
    conn: &Connection,
    model_id: &str,
) -> Result<Vec<AttachmentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attachments WHERE model_id = ?1 ORDER BY id",
        ATTACHMENT_COLUMNS
    ))?;
    let attachments = stmt
        .query_map(params![model_id], row_to_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attachments)
}

pub(crate) fn attachments_with_local_path(conn: &Connection) -> Result<Vec<AttachmentRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM attachments WHERE local_path IS NOT NULL ORDER BY model_id, id",
        ATTACHMENT_COLUMNS
    ))?;
    let attachments = stmt
        .query_map([], row_to_attachment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(attachments)
}

pub(crate) fn delete_attachment(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM attachments WHERE id = ?1", params![id])? > 0)
}

// ========================================
// Statistics
// ========================================

pub(crate) fn counts(conn: &Connection) -> Result<StoreCounts> {
    let count = |table: &str| -> Result<usize> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    };

    Ok(StoreCounts {
        authors: count("authors")?,
        tags: count("tags")?,
        models: count("models")?,
        attachments: count("attachments")?,
    })
}
