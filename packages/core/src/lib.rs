//! Channelkit Core
//!
//! Export engine that converts an editorial content tree into an
//! immutable, versioned distribution package consumable by a playback
//! runtime.
//!
//! # Architecture
//!
//! - **Editorial store**: libsql database holding the mutable authoring
//!   tree (nodes, files, assessment items, tags, licenses, tokens)
//! - **Target store**: throwaway export-format database, rebuilt from
//!   scratch on every publish and copied to durable storage once complete
//! - **Asset storage**: content-addressed blob directory (sha256)
//! - **Export pipeline**: transformer, exercise bundler, asset
//!   materializer and finalizer, sequenced by the orchestrator
//!
//! # Modules
//!
//! - [`models`] - data structures (editorial nodes, file assets, channels)
//! - [`db`] - database layer with libsql integration
//! - [`export`] - the tree-to-package export pipeline
//! - [`utils`] - markup processing, proquint tokens, search keys

pub mod db;
pub mod export;
pub mod models;
pub mod utils;

// Re-export commonly used types
pub use db::{AssetStorage, DatabaseError, EditorialStore, TargetStore};
pub use export::{publish_channel, ExportError, ExportOutcome, PublishOptions, PublishReport};
