//! Channel, License, Language, Tag and Token Models
//!
//! A channel ties the editorial tree to its published distribution package.
//! Aggregate fields (`total_resource_count`, `published_kind_count`,
//! `published_size`, included languages) are derived and recomputed on every
//! publish; `version` increments exactly once per successful export.

use chrono::{DateTime, Utc};

/// A curation channel and its publish-state bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Monotonic distribution version; bumped once per successful export.
    pub version: i64,
    pub root_id: String,
    /// Channel default language, used as the node-language fallback.
    pub language_id: Option<String>,
    /// Stored thumbnail blob name (`<checksum>.<ext>`) or URL.
    pub thumbnail: Option<String>,
    /// Inline thumbnail payload (JSON with optional `base64` field).
    pub thumbnail_encoding: Option<String>,
    /// Cached base64 data-URI produced by channel thumbnail conversion.
    pub icon_encoding: Option<String>,
    pub last_published: Option<DateTime<Utc>>,
    pub total_resource_count: i64,
    /// JSON histogram of published node counts per kind.
    pub published_kind_count: Option<String>,
    /// Total deduplicated size in bytes of published files.
    pub published_size: i64,
}

/// Licensing record referenced by editorial nodes.
///
/// Custom licenses take their description from the node rather than the
/// license record itself.
#[derive(Debug, Clone, PartialEq)]
pub struct License {
    pub id: String,
    pub license_name: String,
    pub license_description: String,
    pub is_custom: bool,
}

/// Language record.
///
/// `lang_name` falls back to `native_name` when absent; both spellings are
/// kept because stored rows exist in both shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Language {
    pub id: String,
    pub lang_code: String,
    pub lang_subcode: Option<String>,
    pub lang_name: Option<String>,
    pub native_name: Option<String>,
}

impl Language {
    /// Display name resolution preserved from the legacy schema shapes.
    pub fn resolved_name(&self) -> Option<&str> {
        self.lang_name.as_deref().or(self.native_name.as_deref())
    }
}

/// Editor-defined tag scoped to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentTag {
    pub id: String,
    pub tag_name: String,
}

/// Distribution token. Exactly one primary pronounceable token plus one
/// token equal to the channel id exist after a channel's first publish.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretToken {
    pub token: String,
    pub is_primary: bool,
}
