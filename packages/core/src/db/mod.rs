//! Database Layer
//!
//! All persistence for the export engine:
//!
//! - [`EditorialStore`] - the authoring-side libsql database (read-mostly;
//!   publish mutations run inside an explicit transaction scope)
//! - [`TargetStore`] - the throwaway export-format database, rebuilt from
//!   scratch for every publish
//! - [`AssetStorage`] - content-addressed blob directory for file assets
//!
//! Handles are passed explicitly through the pipeline; there is no ambient
//! "active database" state.

mod asset_storage;
mod editorial_store;
mod error;
mod target_store;

pub use asset_storage::AssetStorage;
pub use editorial_store::EditorialStore;
pub use error::DatabaseError;
pub use target_store::TargetStore;
