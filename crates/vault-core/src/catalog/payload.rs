//! Typed remote catalog payloads.
//!
//! The remote service is loose about field names and value types, so every
//! scalar field is decoded leniently (strings and numbers are both accepted
//! for ids, blank strings count as absent) and every fallback chain is kept as
//! separate fields resolved by accessor methods.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Display name used for an author whose payload carries no usable name.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Name used for a new model whose payload carries neither name nor title.
pub const UNNAMED_MODEL: &str = "Unnamed";

// ========================================
// Lenient field decoders
// ========================================

/// Coerce a JSON scalar to a non-blank string.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_string(&value))
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_list<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    let Value::Array(entries) = value else {
        return Ok(Vec::new());
    };
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Dropping unparseable list entry: {}", e);
                None
            }
        })
        .collect())
}

fn lenient_object<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if !value.is_object() {
        return Ok(None);
    }
    Ok(serde_json::from_value(value).ok())
}

/// Parse a remote timestamp.
///
/// Accepts RFC 3339 strings (including a trailing `Z`), naive ISO-8601
/// date-times and dates (interpreted as UTC), and unix seconds as integer or
/// float. Anything else yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                DateTime::from_timestamp(secs, 0)
            } else {
                let secs = n.as_f64()?;
                if !secs.is_finite() {
                    return None;
                }
                let whole = secs.floor();
                let nanos = ((secs - whole) * 1e9).round() as u32;
                DateTime::from_timestamp(whole as i64, nanos.min(999_999_999))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
            }
            debug!("Could not parse datetime value: {}", s);
            None
        }
        _ => None,
    }
}

fn first_timestamp(candidates: [&Option<Value>; 2]) -> Option<DateTime<Utc>> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_null())
        .and_then(parse_timestamp)
}

// ========================================
// Listing envelope
// ========================================

/// One level of a listing envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Listing {
    Bare(Vec<Value>),
    Nested(Map<String, Value>),
    Other(Value),
}

impl Listing {
    fn is_empty(&self) -> bool {
        match self {
            Listing::Bare(entries) => entries.is_empty(),
            Listing::Nested(map) => map.is_empty(),
            Listing::Other(value) => matches!(value, Value::Null | Value::Bool(false)),
        }
    }

    fn into_entries(self) -> Option<Vec<Value>> {
        match self {
            Listing::Bare(entries) => Some(entries),
            Listing::Nested(mut map) => {
                for key in ["models", "items"] {
                    if let Some(Value::Array(entries)) = map.remove(key) {
                        if !entries.is_empty() {
                            return Some(entries);
                        }
                    }
                }
                Some(Vec::new())
            }
            Listing::Other(_) => None,
        }
    }
}

/// The accepted response shapes of `GET /api/models`.
///
/// A bare list, an object with a `models` or `items` list, or one level of
/// nesting under either key. Anything else normalizes to an empty page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ModelsEnvelope {
    Bare(Vec<Value>),
    Keyed {
        #[serde(default)]
        models: Option<Listing>,
        #[serde(default)]
        items: Option<Listing>,
    },
    Unrecognized(Value),
}

impl ModelsEnvelope {
    /// Normalize into the canonical summary sequence, failing closed.
    pub fn into_summaries(self) -> Vec<ModelSummary> {
        let entries = match self {
            ModelsEnvelope::Bare(entries) => Some(entries),
            ModelsEnvelope::Keyed { models, items } => {
                let chosen = match models {
                    Some(listing) if !listing.is_empty() => Some(listing),
                    _ => items,
                };
                match chosen {
                    Some(listing) => listing.into_entries(),
                    None => Some(Vec::new()),
                }
            }
            ModelsEnvelope::Unrecognized(_) => None,
        };

        match entries {
            Some(entries) => entries.into_iter().map(ModelSummary::from_value).collect(),
            None => {
                warn!("Unexpected models payload format; treating page as empty");
                Vec::new()
            }
        }
    }

    /// Decode a raw listing body.
    pub fn decode(value: Value) -> Vec<ModelSummary> {
        match serde_json::from_value::<ModelsEnvelope>(value) {
            Ok(envelope) => envelope.into_summaries(),
            Err(e) => {
                warn!("Unexpected models payload format: {}", e);
                Vec::new()
            }
        }
    }
}

// ========================================
// Summary and detail payloads
// ========================================

/// One entry of a catalog listing page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelSummary {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
}

impl ModelSummary {
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("<untitled>")
    }
}

/// Embedded author object of a model detail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, rename = "displayName", deserialize_with = "lenient_string")]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, rename = "profileUrl", deserialize_with = "lenient_string")]
    pub profile_url: Option<String>,
}

impl AuthorPayload {
    /// Display name for a newly created author.
    pub fn resolved_display_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.name.clone())
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
    }
}

/// Tag object fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagFields {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

/// A tag entry: either an object or a bare tag name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagPayload {
    Object(TagFields),
    Name(String),
}

impl TagPayload {
    fn fields(&self) -> TagFields {
        match self {
            TagPayload::Object(fields) => fields.clone(),
            TagPayload::Name(name) => TagFields {
                name: value_to_string(&Value::String(name.clone())),
                ..TagFields::default()
            },
        }
    }

    /// Derived tag key: explicit id, else slug, else name.
    pub fn key(&self) -> Option<String> {
        let fields = self.fields();
        fields.id.or(fields.slug).or(fields.name)
    }

    /// Name for a newly created tag: name, else slug, else the key.
    pub fn resolved_name(&self) -> Option<String> {
        let fields = self.fields();
        let key = fields.id.clone().or(fields.slug.clone()).or(fields.name.clone());
        fields.name.or(fields.slug).or(key)
    }

    pub fn slug(&self) -> Option<String> {
        self.fields().slug
    }
}

/// Attachment entry of a model detail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, rename = "fileId", deserialize_with = "lenient_string")]
    pub file_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub uuid: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub filetype: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_string")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub checksum: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub md5: Option<String>,
    #[serde(default, rename = "downloadUrl", deserialize_with = "lenient_string")]
    pub download_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
}

impl AttachmentPayload {
    /// Attachment id: id, else fileId, else uuid.
    pub fn resolved_id(&self) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.file_id.clone())
            .or_else(|| self.uuid.clone())
    }

    pub fn resolved_filename(&self) -> Option<String> {
        self.filename.clone().or_else(|| self.name.clone())
    }

    pub fn resolved_filetype(&self) -> Option<String> {
        self.filetype.clone().or_else(|| self.kind.clone())
    }

    pub fn resolved_checksum(&self) -> Option<String> {
        self.checksum.clone().or_else(|| self.md5.clone())
    }

    pub fn resolved_download_url(&self) -> Option<String> {
        self.download_url.clone().or_else(|| self.url.clone())
    }
}

/// Full detail payload of one catalog entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDetail {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub url: Option<String>,
    #[serde(default, rename = "sourceUrl", deserialize_with = "lenient_string")]
    pub source_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumbnail: Option<String>,
    #[serde(default, rename = "thumbnailUrl", deserialize_with = "lenient_string")]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "createdAt")]
    pub created_at_camel: Option<Value>,
    #[serde(default, rename = "created_at")]
    pub created_at_snake: Option<Value>,
    #[serde(default, rename = "updatedAt")]
    pub updated_at_camel: Option<Value>,
    #[serde(default, rename = "updated_at")]
    pub updated_at_snake: Option<Value>,
    #[serde(default, deserialize_with = "lenient_object")]
    pub author: Option<AuthorPayload>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub tags: Vec<TagPayload>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub files: Vec<AttachmentPayload>,
}

impl ModelDetail {
    /// Decode a detail body, failing only when it is not an object.
    pub fn from_value(value: Value) -> crate::Result<Self> {
        if !value.is_object() {
            return Err(crate::VaultError::malformed(
                "model detail payload is not a JSON object",
            ));
        }
        serde_json::from_value(value)
            .map_err(|e| crate::VaultError::malformed(format!("invalid model detail: {}", e)))
    }

    pub fn resolved_name(&self) -> Option<String> {
        self.name.clone().or_else(|| self.title.clone())
    }

    pub fn resolved_source_url(&self) -> Option<String> {
        self.url.clone().or_else(|| self.source_url.clone())
    }

    pub fn resolved_thumbnail_url(&self) -> Option<String> {
        self.thumbnail.clone().or_else(|| self.thumbnail_url.clone())
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        first_timestamp([&self.created_at_camel, &self.created_at_snake])
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        first_timestamp([&self.updated_at_camel, &self.updated_at_snake])
    }

    /// Author object, if it carries an id.
    pub fn resolved_author(&self) -> Option<&AuthorPayload> {
        self.author.as_ref().filter(|author| author.id.is_some())
    }

    /// Attachment entries: `attachments`, else `files`.
    pub fn attachment_entries(&self) -> &[AttachmentPayload] {
        if self.attachments.is_empty() {
            &self.files
        } else {
            &self.attachments
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(summaries: Vec<ModelSummary>) -> Vec<String> {
        summaries.into_iter().filter_map(|s| s.id).collect()
    }

    #[test]
    fn test_envelope_bare_list() {
        let summaries = ModelsEnvelope::decode(json!([{"id": 1}, {"id": "2"}]));
        assert_eq!(ids(summaries), vec!["1", "2"]);
    }

    #[test]
    fn test_envelope_models_and_items_keys() {
        assert_eq!(
            ids(ModelsEnvelope::decode(json!({"models": [{"id": "a"}]}))),
            vec!["a"]
        );
        assert_eq!(
            ids(ModelsEnvelope::decode(json!({"items": [{"id": "b"}]}))),
            vec!["b"]
        );
        // An empty `models` list falls through to `items`.
        assert_eq!(
            ids(ModelsEnvelope::decode(json!({"models": [], "items": [{"id": "c"}]}))),
            vec!["c"]
        );
    }

    #[test]
    fn test_envelope_one_level_of_nesting() {
        let body = json!({"models": {"items": [{"id": "n1"}], "total": 1}});
        assert_eq!(ids(ModelsEnvelope::decode(body)), vec!["n1"]);

        let body = json!({"items": {"models": [{"id": "n2"}]}});
        assert_eq!(ids(ModelsEnvelope::decode(body)), vec!["n2"]);
    }

    #[test]
    fn test_envelope_unrecognized_shapes_are_empty() {
        assert!(ModelsEnvelope::decode(json!("nope")).is_empty());
        assert!(ModelsEnvelope::decode(json!(42)).is_empty());
        assert!(ModelsEnvelope::decode(json!({"models": "oops"})).is_empty());
        assert!(ModelsEnvelope::decode(json!({"data": []})).is_empty());
    }

    #[test]
    fn test_summary_without_id() {
        let summaries = ModelsEnvelope::decode(json!([{"name": "x"}, "garbage", {"id": ""}]));
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.id.is_none()));
    }

    #[test]
    fn test_detail_fallbacks() {
        let detail = ModelDetail::from_value(json!({
            "id": 7,
            "title": "Benchy",
            "sourceUrl": "https://example.test/m/7",
            "thumbnailUrl": "https://example.test/t/7.png",
            "created_at": "2024-01-02T03:04:05Z",
            "updatedAt": 1700000000,
            "files": [{"fileId": "f1", "name": "benchy.3mf", "type": "3mf", "md5": "abc", "url": "https://cdn/f1"}]
        }))
        .unwrap();

        assert_eq!(detail.id.as_deref(), Some("7"));
        assert_eq!(detail.resolved_name().as_deref(), Some("Benchy"));
        assert_eq!(detail.resolved_source_url().as_deref(), Some("https://example.test/m/7"));
        assert_eq!(
            detail.resolved_thumbnail_url().as_deref(),
            Some("https://example.test/t/7.png")
        );
        assert_eq!(detail.created_at().unwrap().to_rfc3339(), "2024-01-02T03:04:05+00:00");
        assert_eq!(detail.updated_at().unwrap().timestamp(), 1_700_000_000);

        let attachment = &detail.attachment_entries()[0];
        assert_eq!(attachment.resolved_id().as_deref(), Some("f1"));
        assert_eq!(attachment.resolved_filename().as_deref(), Some("benchy.3mf"));
        assert_eq!(attachment.resolved_filetype().as_deref(), Some("3mf"));
        assert_eq!(attachment.resolved_checksum().as_deref(), Some("abc"));
        assert_eq!(attachment.resolved_download_url().as_deref(), Some("https://cdn/f1"));
    }

    #[test]
    fn test_detail_tolerates_bad_field_types() {
        let detail = ModelDetail::from_value(json!({
            "id": "m1",
            "name": ["not", "a", "string"],
            "author": "someone",
            "tags": "pla",
            "attachments": [{"id": "a1", "size": "1024"}, 5],
            "createdAt": "yesterday"
        }))
        .unwrap();

        assert_eq!(detail.resolved_name(), None);
        assert!(detail.author.is_none());
        assert!(detail.tags.is_empty());
        assert_eq!(detail.attachments.len(), 1);
        assert_eq!(detail.attachments[0].size, Some(1024));
        assert_eq!(detail.created_at(), None);
    }

    #[test]
    fn test_detail_rejects_non_object() {
        assert!(ModelDetail::from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_author_display_name_chain() {
        let author: AuthorPayload = serde_json::from_value(json!({"id": 1, "username": "maker"})).unwrap();
        assert_eq!(author.resolved_display_name(), "maker");

        let author: AuthorPayload = serde_json::from_value(json!({"id": 1})).unwrap();
        assert_eq!(author.resolved_display_name(), UNKNOWN_AUTHOR);
    }

    #[test]
    fn test_tag_key_derivation() {
        let tags: Vec<TagPayload> = serde_json::from_value(json!([
            {"id": 3, "slug": "pla", "name": "PLA"},
            {"slug": "petg", "name": "PETG"},
            {"name": "Toys"},
            "Gadgets",
            {}
        ]))
        .unwrap();

        let keys: Vec<Option<String>> = tags.iter().map(TagPayload::key).collect();
        assert_eq!(
            keys,
            vec![
                Some("3".to_string()),
                Some("petg".to_string()),
                Some("Toys".to_string()),
                Some("Gadgets".to_string()),
                None
            ]
        );
        assert_eq!(tags[1].resolved_name().as_deref(), Some("PETG"));
        assert_eq!(tags[3].resolved_name().as_deref(), Some("Gadgets"));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp(&json!("2024-05-01T10:00:00+02:00")).is_some());
        assert!(parse_timestamp(&json!("2024-05-01T10:00:00.123")).is_some());
        assert!(parse_timestamp(&json!("2024-05-01")).is_some());
        assert_eq!(
            parse_timestamp(&json!(1.5)).unwrap().timestamp_millis(),
            1500
        );
        assert!(parse_timestamp(&json!("not a date")).is_none());
        assert!(parse_timestamp(&json!(true)).is_none());
    }
}
