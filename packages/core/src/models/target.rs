//! Target Schema Records
//!
//! The normalized records written into the throwaway export database. They
//! exist only for the duration of one export; the database is rebuilt from
//! scratch each time a channel publishes, never incrementally updated.
//!
//! Target nodes are keyed by their source node id so that re-running a
//! transform upserts instead of duplicating.

/// A content node in the target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetNode {
    /// Source editorial node id.
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub sort_order: f64,
    pub content_id: String,
    pub author: String,
    /// Copyright holder of the node's license.
    pub license_owner: String,
    /// Target-schema license row, when the node is licensed.
    pub license_id: Option<i64>,
    pub lang_id: Option<String>,
    /// False only for topics with no leaf descendants, which are pruned
    /// before ever reaching the target database.
    pub available: bool,
    /// Whitespace-joined phonetic search keys over title and description.
    pub stemmed_metaphone: String,
}

/// A file reference in the target schema.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetFile {
    pub id: String,
    pub checksum: String,
    pub extension: String,
    pub file_size: i64,
    pub node_id: String,
    pub preset: String,
    pub supplementary: bool,
    pub thumbnail: bool,
    pub priority: i64,
    pub lang_id: Option<String>,
    pub available: bool,
}

/// The channel metadata row of the export database.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: i64,
    /// Base64 data-URI thumbnail, empty when the channel has none.
    pub thumbnail: String,
    pub root_id: String,
}
