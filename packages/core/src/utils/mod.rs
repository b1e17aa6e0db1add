//! Shared Utilities
//!
//! - [`markup`] - formula and image-reference rewriting for item text
//! - [`proquint`] - pronounceable distribution token encoding
//! - [`fuzz`] - phonetic search-key derivation for target nodes

pub mod fuzz;
pub mod markup;
pub mod proquint;

pub use fuzz::fuzz;
pub use markup::{
    process_item_text, rewrite_image_references, unwrap_formula_spans, ImageAttachment,
    ImageDescriptor, ProcessedText, CONTENT_STORAGE_PLACEHOLDER, PACKAGE_IMG_DIR,
};
