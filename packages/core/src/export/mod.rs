//! Export Pipeline
//!
//! The tree-to-package engine, leaf-first:
//!
//! - [`assets`] - asset materializer (file records, thumbnails, channel icon)
//! - [`perseus`] - exercise bundler (mastery normalization, packaged archives)
//! - [`transformer`] - breadth-first tree walk into the target schema
//! - [`finalizer`] - aggregates, tokens, version bump, flag sweep
//! - [`orchestrator`] - end-to-end sequencing and artifact persistence
//!
//! Every stage takes explicit store handles; the target database is never
//! ambient state.

pub mod assets;
pub mod error;
pub mod finalizer;
pub mod orchestrator;
pub mod perseus;
pub mod transformer;

pub use error::{ExportError, ExportOutcome, PublishReport};
pub use orchestrator::{publish_channel, PublishOptions};
pub use transformer::TreeTransformer;
