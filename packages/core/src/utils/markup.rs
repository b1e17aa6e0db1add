//! Assessment Markup Processing
//!
//! Question, answer and hint text arrives with editor-side markup that the
//! packaged exercise format does not understand: formula spans wrapped in
//! doubled dollar signs, and markdown image references pointing at the
//! editorial content-storage placeholder, optionally carrying an `=WxH`
//! sizing suffix. This module rewrites both into their package-local form.
//!
//! Everything here is pure text-to-text; archive embedding of the
//! referenced images happens in the exercise bundler.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Placeholder the editing surface embeds in front of stored-file paths.
pub const CONTENT_STORAGE_PLACEHOLDER: &str = "${CONTENTSTORAGE}";

/// Package-local image directory image references are rewritten to.
pub const PACKAGE_IMG_DIR: &str = "${IMG}/images";

/// Pattern order matters: the outer markdown image reference is located
/// first, then its target is split into path and optional sizing suffix.
static FORMULA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\$[^$]+\$)\$").unwrap());
static IMAGE_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").unwrap());
static IMAGE_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+/images/\S+?)(?:\s=([0-9.]+)x([0-9.]+))?\s*$").unwrap());

/// Sizing descriptor parsed off an image reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDescriptor {
    pub name: String,
    pub width: f64,
    pub height: f64,
}

/// A package-local image file referenced by processed text, to be embedded
/// into the exercise archive by the bundler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageAttachment {
    pub checksum: String,
    pub extension: String,
}

/// Result of rewriting one block of item text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedText {
    pub text: String,
    pub images: Vec<ImageDescriptor>,
    pub attachments: Vec<ImageAttachment>,
}

/// Unwrap `$$formula$$` spans to their single-dollar form.
pub fn unwrap_formula_spans(content: &str) -> String {
    FORMULA_RE.replace_all(content, "$1").to_string()
}

/// Rewrite markdown image references to the package-local image directory.
///
/// Returns the rewritten text together with parsed sizing descriptors and
/// the set of referenced package images. The `=WxH` suffix is stripped from
/// the text; its values travel separately as an [`ImageDescriptor`].
pub fn rewrite_image_references(content: &str) -> ProcessedText {
    let mut text = content.replace(CONTENT_STORAGE_PLACEHOLDER, PACKAGE_IMG_DIR);
    let mut images = Vec::new();
    let mut attachments = Vec::new();

    let references: Vec<(String, String)> = IMAGE_REF_RE
        .captures_iter(&text)
        .filter_map(|caps| {
            let target = caps.get(1)?.as_str();
            let target_caps = IMAGE_TARGET_RE.captures(target)?;
            Some((target.to_string(), target_caps[1].to_string()))
        })
        .collect();

    for (target, path) in references {
        if let Some(target_caps) = IMAGE_TARGET_RE.captures(&target) {
            if let (Some(w), Some(h)) = (target_caps.get(2), target_caps.get(3)) {
                if let (Ok(width), Ok(height)) =
                    (w.as_str().parse::<f64>(), h.as_str().parse::<f64>())
                {
                    images.push(ImageDescriptor {
                        name: path.clone(),
                        width,
                        height,
                    });
                }
            }
        }
        if let Some(attachment) = attachment_for_path(&path) {
            attachments.push(attachment);
        }
        // Drop the sizing suffix from the reference itself.
        text = text.replace(&target, &path);
    }

    ProcessedText {
        text,
        images,
        attachments,
    }
}

/// Full item-text pipeline: formulas first, then image references.
pub fn process_item_text(content: &str) -> ProcessedText {
    rewrite_image_references(&unwrap_formula_spans(content))
}

fn attachment_for_path(path: &str) -> Option<ImageAttachment> {
    let filename = path.rsplit('/').next()?;
    let (checksum, extension) = filename.rsplit_once('.')?;
    if checksum.is_empty() || extension.is_empty() {
        return None;
    }
    Some(ImageAttachment {
        checksum: checksum.to_string(),
        extension: extension.to_string(),
    })
}
