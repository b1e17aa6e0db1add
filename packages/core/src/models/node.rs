//! Editorial Node Model
//!
//! The editorial tree is the mutable authoring-side hierarchy. Every node is
//! one row in the editorial store; parent links define ownership and
//! `sort_order` defines sibling ordering.
//!
//! Invariants:
//!
//! - Every non-topic node is reachable from its channel's root.
//! - Topic nodes with no non-topic descendants are unavailable and are
//!   pruned from exports entirely.

use serde_json::Value;
use uuid::Uuid;

/// Content kind of an editorial node.
///
/// The export pipeline only distinguishes containers (`Topic`) from leaf
/// kinds; exercises additionally carry assessment items and a packaged
/// bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Topic,
    Exercise,
    Resource,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Topic => "topic",
            ContentKind::Exercise => "exercise",
            ContentKind::Resource => "resource",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "topic" => Some(ContentKind::Topic),
            "exercise" => Some(ContentKind::Exercise),
            "resource" => Some(ContentKind::Resource),
            _ => None,
        }
    }

    /// Leaf kinds are everything that is not a container.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, ContentKind::Topic)
    }
}

/// A node in the editorial content tree.
///
/// `content_id` is the stable cross-version identity of the underlying
/// content; `id` identifies this particular placement in the tree. The
/// `changed` flag drives both the "nothing to do" early exit and the
/// per-exercise regeneration policy; `published` is rewritten family-wide
/// on every successful export.
#[derive(Debug, Clone, PartialEq)]
pub struct EditorialNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub kind: ContentKind,
    pub title: String,
    pub description: String,
    pub sort_order: f64,
    /// Stable content identity shared across channel versions.
    pub content_id: String,
    pub author: Option<String>,
    pub copyright_holder: Option<String>,
    pub license_id: Option<String>,
    /// Description override used when the referenced license is custom.
    pub license_description: Option<String>,
    pub language_id: Option<String>,
    pub changed: bool,
    pub published: bool,
    /// Inline thumbnail payload as stored by the editing surface
    /// (JSON with an optional `base64` field).
    pub thumbnail_encoding: Option<String>,
    /// Opaque editor-managed JSON (mastery configuration, randomize flag).
    pub extra_fields: Value,
}

impl EditorialNode {
    /// Create a node with a generated id and content id, defaulting to a
    /// changed, unpublished state.
    pub fn new(kind: ContentKind, title: impl Into<String>, parent_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id,
            kind,
            title: title.into(),
            description: String::new(),
            sort_order: 1.0,
            content_id: Uuid::new_v4().to_string(),
            author: None,
            copyright_holder: None,
            license_id: None,
            license_description: None,
            language_id: None,
            changed: true,
            published: false,
            thumbnail_encoding: None,
            extra_fields: Value::Object(serde_json::Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [ContentKind::Topic, ContentKind::Exercise, ContentKind::Resource] {
            assert_eq!(ContentKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ContentKind::parse("video"), None);
    }

    #[test]
    fn only_topics_are_containers() {
        assert!(!ContentKind::Topic.is_leaf());
        assert!(ContentKind::Exercise.is_leaf());
        assert!(ContentKind::Resource.is_leaf());
    }
}
