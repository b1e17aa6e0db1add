//! Data Models
//!
//! This module contains the core data structures used throughout the export
//! engine:
//!
//! - `EditorialNode` - authoring-side tree node
//! - `AssessmentItem` - exercise question records
//! - `FileAsset` - checksum-addressed file records
//! - `Channel` and its licensing/language/tag/token satellites
//! - `TargetNode`/`TargetFile`/`TargetChannel` - export-schema records
//!
//! Models are plain data; persistence lives in [`crate::db`] and all
//! transform logic in [`crate::export`].

mod assessment;
mod channel;
mod file;
mod node;
mod target;

pub use assessment::{AssessmentItem, AssessmentType, MasteryModel};
pub use channel::{Channel, ContentTag, Language, License, SecretToken};
pub use file::{FileAsset, FormatPreset, ThumbnailEncoding};
pub use node::{ContentKind, EditorialNode};
pub use target::{TargetChannel, TargetFile, TargetNode};
