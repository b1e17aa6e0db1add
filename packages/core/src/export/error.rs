//! Export Pipeline Errors and Outcomes
//!
//! The "nothing changed" early exit is an expected outcome, not an error:
//! the orchestration entry point returns [`ExportOutcome`] and reserves
//! [`ExportError`] for conditions that abort the publish. Every fatal error
//! rolls back the editorial transaction, so the source tree's flags,
//! version and tokens are left exactly as they were.

use crate::db::DatabaseError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal export failures.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A referenced parent node, license, or language could not be resolved
    /// during transform.
    #[error("Referenced {entity} '{id}' could not be resolved")]
    MissingReference { entity: &'static str, id: String },

    /// An assessment item carries a type the bundler does not recognize.
    /// Bundle generation is all-or-nothing per exercise, so this aborts
    /// the export.
    #[error("Unrecognized assessment item type '{item_type}' on item {assessment_id}")]
    UnsupportedItemType {
        assessment_id: String,
        item_type: String,
    },

    /// Token generation exceeded the collision retry bound.
    #[error("Token generation exceeded {attempts} attempts; token space exhausted or misconfigured")]
    TokenExhaustion { attempts: u64 },

    /// The export artifact or one of its blobs could not be read/written.
    #[error("Storage operation failed at {path}: {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Stored JSON (answers, hints, thumbnail encodings, extra fields)
    /// did not parse.
    #[error("Malformed stored data: {0}")]
    InvalidData(String),

    /// Underlying database failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl ExportError {
    pub fn missing_reference(entity: &'static str, id: impl Into<String>) -> Self {
        Self::MissingReference {
            entity,
            id: id.into(),
        }
    }

    pub fn unsupported_item_type(
        assessment_id: impl Into<String>,
        item_type: impl Into<String>,
    ) -> Self {
        Self::UnsupportedItemType {
            assessment_id: assessment_id.into(),
            item_type: item_type.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }
}

/// Summary of a completed publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub channel_id: String,
    /// Channel version after the bump.
    pub version: i64,
    /// Non-topic resources shipped by this publish.
    pub resource_count: i64,
    /// Deduplicated total size in bytes of shipped files.
    pub published_size: i64,
    /// Where the export database landed.
    pub db_path: PathBuf,
}

/// Result of one export invocation.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The tree was transformed and a new version is live.
    Published(PublishReport),
    /// No node in the tree was flagged changed and force was not set; no
    /// mutation was performed and no partial database exists.
    NothingChanged,
}

impl ExportOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, ExportOutcome::Published(_))
    }
}
