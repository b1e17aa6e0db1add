//! File Asset Model
//!
//! File assets are content-addressed by checksum: multiple nodes may
//! reference the same blob and the blob store deduplicates by content. The
//! preset describes the role a file plays on its node (thumbnail,
//! supplementary document, packaged exercise bundle, exercise image).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a file on its content node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatPreset {
    /// Node thumbnail image.
    Thumbnail,
    /// Primary document/media blob of a resource node.
    Document,
    /// Supplementary material attached alongside the primary blob.
    Supplementary,
    /// Packaged exercise bundle produced by the exercise bundler.
    Exercise,
    /// Image referenced from assessment item text; bundled, never exported
    /// as a standalone node file.
    ExerciseImage,
    /// Combined vector-image-plus-metadata blob; bundled as two entries.
    ExerciseGraphie,
}

impl FormatPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatPreset::Thumbnail => "thumbnail",
            FormatPreset::Document => "document",
            FormatPreset::Supplementary => "supplementary",
            FormatPreset::Exercise => "exercise",
            FormatPreset::ExerciseImage => "exercise_image",
            FormatPreset::ExerciseGraphie => "exercise_graphie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thumbnail" => Some(FormatPreset::Thumbnail),
            "document" => Some(FormatPreset::Document),
            "supplementary" => Some(FormatPreset::Supplementary),
            "exercise" => Some(FormatPreset::Exercise),
            "exercise_image" => Some(FormatPreset::ExerciseImage),
            "exercise_graphie" => Some(FormatPreset::ExerciseGraphie),
            _ => None,
        }
    }

    /// Whether files with this preset render as node thumbnails.
    pub fn is_thumbnail(&self) -> bool {
        matches!(self, FormatPreset::Thumbnail)
    }

    /// Supplementary files are optional extras rather than the primary blob.
    pub fn is_supplementary(&self) -> bool {
        matches!(self, FormatPreset::Supplementary | FormatPreset::Thumbnail)
    }

    /// Exercise-only presets are bundled into the exercise archive and are
    /// excluded from generic per-node file materialization.
    pub fn is_exercise_only(&self) -> bool {
        matches!(
            self,
            FormatPreset::ExerciseImage | FormatPreset::ExerciseGraphie
        )
    }

    /// Rendering priority among a node's files (lower renders first).
    pub fn priority(&self) -> i64 {
        match self {
            FormatPreset::Document => 1,
            FormatPreset::Exercise => 1,
            FormatPreset::Supplementary => 2,
            FormatPreset::Thumbnail => 3,
            FormatPreset::ExerciseImage => 4,
            FormatPreset::ExerciseGraphie => 4,
        }
    }
}

/// A checksum-addressed file record in the editorial store.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAsset {
    pub id: String,
    /// Owning content node, if attached to one.
    pub node_id: Option<String>,
    /// Owning assessment item, for exercise images and graphies.
    pub assessment_id: Option<String>,
    pub checksum: String,
    /// File format, stored as the blob's extension.
    pub extension: String,
    pub preset: FormatPreset,
    pub file_size: i64,
    pub original_filename: String,
    pub language_id: Option<String>,
    pub uploaded_by: Option<String>,
}

impl FileAsset {
    /// Create a file record for freshly imported bytes.
    pub fn from_contents(
        checksum: impl Into<String>,
        extension: impl Into<String>,
        file_size: i64,
        preset: FormatPreset,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            node_id: None,
            assessment_id: None,
            checksum: checksum.into(),
            extension: extension.into(),
            preset,
            file_size,
            original_filename: String::new(),
            language_id: None,
            uploaded_by: None,
        }
    }
}

/// Inline thumbnail payload attached to a node or channel by the editing
/// surface. Only the base64 field matters to the export pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailEncoding {
    #[serde(default)]
    pub base64: Option<String>,
}

impl ThumbnailEncoding {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_round_trips() {
        for p in [
            FormatPreset::Thumbnail,
            FormatPreset::Document,
            FormatPreset::Supplementary,
            FormatPreset::Exercise,
            FormatPreset::ExerciseImage,
            FormatPreset::ExerciseGraphie,
        ] {
            assert_eq!(FormatPreset::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn exercise_presets_excluded_from_generic_materialization() {
        assert!(FormatPreset::ExerciseImage.is_exercise_only());
        assert!(FormatPreset::ExerciseGraphie.is_exercise_only());
        assert!(!FormatPreset::Exercise.is_exercise_only());
        assert!(!FormatPreset::Thumbnail.is_exercise_only());
    }

    #[test]
    fn thumbnail_encoding_parses_optional_payload() {
        let enc = ThumbnailEncoding::parse(r#"{"base64": "aGk="}"#).unwrap();
        assert_eq!(enc.base64.as_deref(), Some("aGk="));
        let empty = ThumbnailEncoding::parse("{}").unwrap();
        assert!(empty.base64.is_none());
    }
}
