//! Asset Materializer
//!
//! Resolves checksum-addressed blobs into package-local encodings: target
//! file records for node attachments, freshly materialized thumbnails from
//! inline encodings, and the channel icon as a resized base64 data-URI.
//!
//! Bytes and text stay type-separated: blobs move as `Vec<u8>`, encodings
//! as `String`, and the conversion happens only at the named boundaries in
//! this module.

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::error::ExportError;
use crate::models::{Channel, EditorialNode, FileAsset, TargetFile, ThumbnailEncoding};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Square dimension of converted channel thumbnails.
pub const THUMBNAIL_DIMENSION: u32 = 128;

/// Copy a node's file records into the target schema.
///
/// Exercise-only presets are skipped here; they are embedded into the
/// exercise archive by the bundler. When the node carries an inline
/// thumbnail encoding, the thumbnail preset's file is replaced by a
/// freshly decoded blob rather than the stored record - thumbnails are
/// always materialized fresh, never deduplicated by checksum.
pub async fn materialize_node_files(
    editorial: &EditorialStore,
    target: &TargetStore,
    storage: &AssetStorage,
    node: &EditorialNode,
) -> Result<(), ExportError> {
    debug!("Creating file records for node {}", node.id);
    for file in editorial.files_for_node(&node.id).await? {
        if file.preset.is_exercise_only() {
            continue;
        }

        if let Some(language_id) = &file.language_id {
            let language = editorial
                .get_language(language_id)
                .await?
                .ok_or_else(|| ExportError::missing_reference("language", language_id))?;
            target.get_or_create_language(&language).await?;
        }

        let record = if file.preset.is_thumbnail() && node.thumbnail_encoding.is_some() {
            materialize_fresh_thumbnail(storage, node, &file).await?
        } else {
            target_file_record(&file, file.id.clone(), node)
        };
        target.upsert_file(&record).await?;
    }
    Ok(())
}

/// Decode the node's inline thumbnail into a new blob and build a fresh
/// file record for it.
async fn materialize_fresh_thumbnail(
    storage: &AssetStorage,
    node: &EditorialNode,
    original: &FileAsset,
) -> Result<TargetFile, ExportError> {
    let raw = node
        .thumbnail_encoding
        .as_deref()
        .unwrap_or_default();
    let encoding = ThumbnailEncoding::parse(raw)
        .map_err(|e| ExportError::invalid_data(format!("thumbnail encoding: {}", e)))?;
    let Some(payload) = encoding.base64 else {
        // No inline payload: fall back to the stored record.
        return Ok(target_file_record(original, original.id.clone(), node));
    };

    let bytes = decode_base64_payload(&payload)?;
    let (checksum, file_size) = storage
        .write(&bytes, &original.extension)
        .await
        .map_err(|e| ExportError::storage(storage.root(), e))?;

    let mut fresh = FileAsset {
        checksum,
        file_size,
        ..original.clone()
    };
    // Deterministic id for the materialized blob, stable across re-runs.
    fresh.id = format!("{}:{}", node.id, fresh.checksum);
    Ok(target_file_record(&fresh, fresh.id.clone(), node))
}

fn target_file_record(file: &FileAsset, id: String, node: &EditorialNode) -> TargetFile {
    TargetFile {
        id,
        checksum: file.checksum.clone(),
        extension: file.extension.clone(),
        file_size: file.file_size,
        node_id: node.id.clone(),
        preset: file.preset.as_str().to_string(),
        supplementary: file.preset.is_supplementary(),
        thumbnail: file.preset.is_thumbnail(),
        priority: file.preset.priority(),
        lang_id: file.language_id.clone(),
        available: true,
    }
}

/// Resolve the channel's thumbnail to a base64 data-URI, resized to a
/// fixed square with a cover crop.
///
/// The result is cached on the channel record; subsequent exports reuse it
/// until it is cleared. Channels without a usable thumbnail (including
/// packaged static defaults) convert to the empty string.
pub async fn convert_channel_thumbnail(
    editorial: &EditorialStore,
    storage: &AssetStorage,
    channel: &Channel,
) -> Result<String, ExportError> {
    let thumbnail = match &channel.thumbnail {
        Some(t) if !t.is_empty() && !t.contains("static") => t,
        _ => return Ok(String::new()),
    };

    if let Some(cached) = &channel.icon_encoding {
        if !cached.is_empty() {
            return Ok(cached.clone());
        }
    }

    if let Some(raw) = &channel.thumbnail_encoding {
        let encoding = ThumbnailEncoding::parse(raw)
            .map_err(|e| ExportError::invalid_data(format!("channel thumbnail encoding: {}", e)))?;
        if let Some(payload) = encoding.base64 {
            editorial.set_channel_icon(&channel.id, &payload).await?;
            return Ok(payload);
        }
    }

    let (checksum, extension) = thumbnail.rsplit_once('.').ok_or_else(|| {
        ExportError::invalid_data(format!("channel thumbnail '{}' has no extension", thumbnail))
    })?;
    let bytes = storage
        .read(checksum, extension)
        .await
        .map_err(|e| ExportError::storage(storage.path_for(checksum, extension), e))?;

    let image = image::load_from_memory(&bytes)
        .map_err(|e| ExportError::invalid_data(format!("channel thumbnail: {}", e)))?;
    let cover = image.resize_to_fill(THUMBNAIL_DIMENSION, THUMBNAIL_DIMENSION, FilterType::Lanczos3);
    let mut png = Cursor::new(Vec::new());
    cover
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|e| ExportError::invalid_data(format!("channel thumbnail encode: {}", e)))?;

    let data_uri = format!("data:image/png;base64,{}", BASE64.encode(png.into_inner()));
    editorial.set_channel_icon(&channel.id, &data_uri).await?;
    Ok(data_uri)
}

/// Decode an inline base64 payload, tolerating a data-URI prefix.
pub fn decode_base64_payload(payload: &str) -> Result<Vec<u8>, ExportError> {
    let encoded = match payload.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => payload,
    };
    BASE64
        .decode(encoded.trim())
        .map_err(|e| ExportError::invalid_data(format!("base64 payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_plain_and_data_uri_payloads() {
        assert_eq!(decode_base64_payload("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            decode_base64_payload("data:image/png;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert!(decode_base64_payload("not base64!!!").is_err());
    }
}

#[cfg(test)]
#[path = "assets_test.rs"]
mod assets_test;
