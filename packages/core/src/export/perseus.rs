//! Exercise Bundler
//!
//! Converts an exercise node's assessment items into (a) a normalized
//! mastery-model record in the target schema and (b) a packaged bundle: a
//! ZIP archive holding a manifest, one rendered definition per item, and
//! every referenced image exactly once.
//!
//! Bundles must hash identically across regenerations of identical
//! content, so every entry is stored uncompressed with a fixed
//! modification timestamp and entries are written in a deterministic
//! order (manifest, per-item images in checksum order, per-item
//! definitions in item order).

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::error::ExportError;
use crate::models::{
    AssessmentItem, AssessmentType, EditorialNode, FileAsset, FormatPreset, MasteryModel,
};
use crate::utils::markup::{process_item_text, CONTENT_STORAGE_PLACEHOLDER, PACKAGE_IMG_DIR};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime as ZipDateTime, ZipWriter};

/// Delimiter between the SVG stream and the JSON stream of a graphie blob.
pub const GRAPHIE_DELIMITER: &[u8] = b"\\/---";

/// Extension of packaged exercise bundles.
pub const BUNDLE_EXTENSION: &str = "perseus";

const ARCHIVE_COMMENT: &str = "Exercise bundle generated during channel export";

/// Normalized mastery parameters for one exercise.
#[derive(Debug, Clone, PartialEq)]
pub struct MasteryData {
    /// The model as configured by the editor, preserved for consumers that
    /// still dispatch on the legacy patterns.
    pub legacy_model: MasteryModel,
    pub n: i64,
    pub m: i64,
    pub randomize: bool,
}

/// Normalize the exercise's mastery configuration.
///
/// Fixed legacy patterns force their n/m; the m-of-n form defaults to
/// `min(5, item_count)`. An item count of zero clamps to 1 rather than
/// producing an unpassable exercise.
pub fn normalize_mastery(extra_fields: &Value, item_count: usize) -> Result<MasteryData, ExportError> {
    let model_str = extra_fields
        .get("mastery_model")
        .and_then(Value::as_str)
        .unwrap_or(MasteryModel::MOfN.as_str());
    let legacy_model = MasteryModel::parse(model_str)
        .ok_or_else(|| ExportError::invalid_data(format!("unknown mastery model '{}'", model_str)))?;

    let count = item_count as i64;
    let (n, m) = match legacy_model {
        MasteryModel::MOfN => {
            let default = count.min(5).max(1);
            let n = extra_fields.get("n").and_then(Value::as_i64).unwrap_or(default);
            let m = extra_fields.get("m").and_then(Value::as_i64).unwrap_or(default);
            (n, m)
        }
        MasteryModel::DoAll => (count.max(1), count.max(1)),
        MasteryModel::NumCorrectInARow2 => (2, 2),
        MasteryModel::NumCorrectInARow3 => (3, 3),
        MasteryModel::NumCorrectInARow5 => (5, 5),
        MasteryModel::NumCorrectInARow10 => (10, 10),
    };

    let randomize = extra_fields
        .get("randomize")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    Ok(MasteryData {
        legacy_model,
        n,
        m,
        randomize,
    })
}

/// Build the bundle manifest and write the exercise's assessment metadata
/// into the target store. Returns the manifest for the bundler.
///
/// The legacy mastery model is preserved in the metadata record, but the
/// manifest always also carries the explicit normalized m-of-n form.
pub async fn process_assessment_metadata(
    node: &EditorialNode,
    items: &[AssessmentItem],
    target: &TargetStore,
) -> Result<Value, ExportError> {
    let mastery = normalize_mastery(&node.extra_fields, items.len())?;

    let item_ids: Vec<&str> = items.iter().map(|i| i.assessment_id.as_str()).collect();
    let mut mapping = Map::new();
    for item in items {
        let mapped = if item.item_type == AssessmentType::TrueFalse.as_str() {
            AssessmentType::SingleSelection.as_str()
        } else {
            item.item_type.as_str()
        };
        mapping.insert(item.assessment_id.clone(), Value::String(mapped.to_string()));
    }

    let mut manifest = match &node.extra_fields {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    manifest.insert("mastery_model".into(), json!(MasteryModel::MOfN.as_str()));
    manifest.insert(
        "legacy_mastery_model".into(),
        json!(mastery.legacy_model.as_str()),
    );
    manifest.insert("randomize".into(), json!(mastery.randomize));
    manifest.insert("n".into(), json!(mastery.n));
    manifest.insert("m".into(), json!(mastery.m));
    manifest.insert("all_assessment_items".into(), json!(item_ids));
    manifest.insert("assessment_mapping".into(), Value::Object(mapping));

    let mastery_record = json!({
        "type": mastery.legacy_model.as_str(),
        "n": mastery.n,
        "m": mastery.m,
    });
    target
        .upsert_assessment_metadata(
            &node.id,
            &json!(item_ids).to_string(),
            items.len() as i64,
            &mastery_record.to_string(),
            mastery.randomize,
            node.kind == crate::models::ContentKind::Exercise,
        )
        .await?;

    Ok(Value::Object(manifest))
}

/// Builds packaged exercise archives from assessment items and their
/// referenced blobs.
pub struct ExerciseBundler<'a> {
    editorial: &'a EditorialStore,
    storage: &'a AssetStorage,
}

impl<'a> ExerciseBundler<'a> {
    pub fn new(editorial: &'a EditorialStore, storage: &'a AssetStorage) -> Self {
        Self { editorial, storage }
    }

    /// Build the archive, persist it into the blob store, and replace the
    /// node's bundle file record. The new record is attributed to
    /// `user_id` when given.
    pub async fn create_exercise_bundle(
        &self,
        node: &EditorialNode,
        items: &[AssessmentItem],
        manifest: &Value,
        user_id: Option<&str>,
    ) -> Result<FileAsset, ExportError> {
        debug!("Creating exercise bundle for node {}", node.title);
        let bytes = self.build_archive(items, manifest).await?;
        let (checksum, file_size) = self
            .storage
            .write(&bytes, BUNDLE_EXTENSION)
            .await
            .map_err(|e| ExportError::storage(self.storage.root(), e))?;

        let file = FileAsset {
            // Deterministic per node so repeated publishes of unchanged
            // content keep a stable file identity.
            id: format!("{}:{}", node.id, FormatPreset::Exercise.as_str()),
            node_id: Some(node.id.clone()),
            assessment_id: None,
            checksum: checksum.clone(),
            extension: BUNDLE_EXTENSION.to_string(),
            preset: FormatPreset::Exercise,
            file_size,
            original_filename: format!("{}.{}", node.title, BUNDLE_EXTENSION),
            language_id: None,
            uploaded_by: user_id.map(|u| u.to_string()),
        };
        self.editorial
            .replace_exercise_bundle_file(&node.id, &file)
            .await?;
        info!(
            "Created exercise bundle for {} with checksum {}",
            node.title, checksum
        );
        Ok(file)
    }

    /// Assemble the archive bytes in memory.
    pub async fn build_archive(
        &self,
        items: &[AssessmentItem],
        manifest: &Value,
    ) -> Result<Vec<u8>, ExportError> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.set_comment(ARCHIVE_COMMENT);
        let mut written: HashSet<String> = HashSet::new();

        let manifest_text = serde_json::to_string_pretty(manifest)
            .map_err(|e| ExportError::invalid_data(format!("manifest: {}", e)))?;
        write_entry(&mut zip, &mut written, "exercise.json", manifest_text.as_bytes())?;

        // Item-attached blobs first, mirroring the manifest/images/items
        // archive layout consumers expect.
        for item in items {
            for image in self
                .editorial
                .files_for_assessment_item(&item.assessment_id, FormatPreset::ExerciseImage)
                .await?
            {
                let name = format!("images/{}.{}", image.checksum, image.extension);
                if !written.contains(&name) {
                    let content = self.read_blob(&image).await?;
                    write_entry(&mut zip, &mut written, &name, &content)?;
                }
            }

            for graphie in self
                .editorial
                .files_for_assessment_item(&item.assessment_id, FormatPreset::ExerciseGraphie)
                .await?
            {
                let svg_name = format!("images/{}.svg", graphie.original_filename);
                let json_name = format!("images/{}-data.json", graphie.original_filename);
                if !written.contains(&svg_name) || !written.contains(&json_name) {
                    let content = self.read_blob(&graphie).await?;
                    let (svg, data) = split_graphie(&content, &graphie.checksum)?;
                    write_entry(&mut zip, &mut written, &svg_name, svg)?;
                    write_entry(&mut zip, &mut written, &json_name, data)?;
                }
            }
        }

        for item in items {
            let rendered = self.render_item(item, &mut zip, &mut written).await?;
            let item_text = serde_json::to_string_pretty(&rendered)
                .map_err(|e| ExportError::invalid_data(format!("item render: {}", e)))?;
            let entry_name = format!("{}.json", item.assessment_id);
            write_entry(&mut zip, &mut written, &entry_name, item_text.as_bytes())?;
        }

        let cursor = zip
            .finish()
            .map_err(|e| ExportError::invalid_data(format!("archive finish: {}", e)))?;
        Ok(cursor.into_inner())
    }

    /// Render one assessment item to its packaged definition, embedding
    /// any images its text references.
    async fn render_item(
        &self,
        item: &AssessmentItem,
        zip: &mut ZipWriter<Cursor<Vec<u8>>>,
        written: &mut HashSet<String>,
    ) -> Result<Value, ExportError> {
        let item_type = AssessmentType::parse(&item.item_type).ok_or_else(|| {
            ExportError::unsupported_item_type(&item.assessment_id, &item.item_type)
        })?;

        let raw_data = item
            .raw_data
            .replace(CONTENT_STORAGE_PLACEHOLDER, PACKAGE_IMG_DIR);

        // Free-response items ship their authored definition untouched
        // apart from the storage-placeholder rewrite.
        if item_type == AssessmentType::FreeResponse {
            return serde_json::from_str(&raw_data).map_err(|e| {
                ExportError::invalid_data(format!(
                    "raw data of item {}: {}",
                    item.assessment_id, e
                ))
            });
        }

        let question = process_item_text(&item.question);
        self.embed_attachments(&question.attachments, zip, written).await?;

        let mut answers: Vec<Value> = serde_json::from_str(&item.answers).map_err(|e| {
            ExportError::invalid_data(format!("answers of item {}: {}", item.assessment_id, e))
        })?;
        for answer in &mut answers {
            let Some(obj) = answer.as_object_mut() else {
                continue;
            };
            let value = obj.get("answer").cloned().unwrap_or(Value::Null);
            if item_type == AssessmentType::InputQuestion {
                obj.insert("answer".into(), extract_numeric(&value));
            } else if let Value::String(text) = &value {
                let processed = process_item_text(text);
                self.embed_attachments(&processed.attachments, zip, written).await?;
                obj.insert("answer".into(), Value::String(processed.text));
                obj.insert("images".into(), json!(processed.images));
            }
        }
        // Drop blank answers, but never the numeric value 0.
        answers.retain(|a| {
            match a.get("answer") {
                Some(Value::String(s)) => !s.is_empty(),
                Some(Value::Null) | None => false,
                Some(_) => true,
            }
        });
        sort_by_order(&mut answers);

        let mut hints: Vec<Value> = serde_json::from_str(&item.hints).map_err(|e| {
            ExportError::invalid_data(format!("hints of item {}: {}", item.assessment_id, e))
        })?;
        for hint in &mut hints {
            let Some(obj) = hint.as_object_mut() else {
                continue;
            };
            if let Some(Value::String(text)) = obj.get("hint").cloned() {
                let processed = process_item_text(&text);
                self.embed_attachments(&processed.attachments, zip, written).await?;
                obj.insert("hint".into(), Value::String(processed.text));
                obj.insert("images".into(), json!(processed.images));
            }
        }
        sort_by_order(&mut hints);

        Ok(json!({
            "question": {
                "content": question.text,
                "images": question.images,
            },
            "answers": answers,
            "hints": hints,
            "multiple_select": item_type == AssessmentType::MultipleSelection,
            "raw_data": raw_data,
            "randomize": item.randomize,
        }))
    }

    async fn embed_attachments(
        &self,
        attachments: &[crate::utils::markup::ImageAttachment],
        zip: &mut ZipWriter<Cursor<Vec<u8>>>,
        written: &mut HashSet<String>,
    ) -> Result<(), ExportError> {
        for attachment in attachments {
            let name = format!("images/{}.{}", attachment.checksum, attachment.extension);
            if written.contains(&name) {
                continue;
            }
            let content = self
                .storage
                .read(&attachment.checksum, &attachment.extension)
                .await
                .map_err(|e| {
                    ExportError::storage(
                        self.storage.path_for(&attachment.checksum, &attachment.extension),
                        e,
                    )
                })?;
            write_entry(zip, written, &name, &content)?;
        }
        Ok(())
    }

    async fn read_blob(&self, file: &FileAsset) -> Result<Vec<u8>, ExportError> {
        self.storage
            .read(&file.checksum, &file.extension)
            .await
            .map_err(|e| {
                ExportError::storage(self.storage.path_for(&file.checksum, &file.extension), e)
            })
    }
}

/// Split a graphie blob into its SVG and JSON streams.
pub fn split_graphie<'b>(content: &'b [u8], checksum: &str) -> Result<(&'b [u8], &'b [u8]), ExportError> {
    let pos = content
        .windows(GRAPHIE_DELIMITER.len())
        .position(|window| window == GRAPHIE_DELIMITER)
        .ok_or_else(|| {
            ExportError::invalid_data(format!("graphie blob {} has no delimiter", checksum))
        })?;
    Ok((&content[..pos], &content[pos + GRAPHIE_DELIMITER.len()..]))
}

/// Input-question answers are numeric; coerce authored strings to numbers.
fn extract_numeric(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                json!(i)
            } else if let Ok(f) = trimmed.parse::<f64>() {
                json!(f)
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

fn sort_by_order(values: &mut [Value]) {
    values.sort_by_key(|v| v.get("order").and_then(Value::as_i64).unwrap_or(i64::MAX));
}

/// Append an entry with the fixed deterministic timestamp, stored
/// uncompressed.
fn write_entry(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    written: &mut HashSet<String>,
    name: &str,
    content: &[u8],
) -> Result<(), ExportError> {
    if !written.insert(name.to_string()) {
        return Ok(());
    }
    let timestamp = ZipDateTime::from_date_and_time(2013, 3, 14, 1, 59, 26)
        .map_err(|e| ExportError::invalid_data(format!("archive timestamp: {}", e)))?;
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(timestamp);
    zip.start_file(name, options)
        .map_err(|e| ExportError::invalid_data(format!("archive entry {}: {}", name, e)))?;
    zip.write_all(content)
        .map_err(|e| ExportError::invalid_data(format!("archive entry {}: {}", name, e)))?;
    Ok(())
}

#[cfg(test)]
#[path = "perseus_test.rs"]
mod perseus_test;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mastery_defaults_to_m_of_n_with_clamped_counts() {
        let empty = json!({});
        let zero = normalize_mastery(&empty, 0).unwrap();
        assert_eq!((zero.n, zero.m), (1, 1));
        assert_eq!(zero.legacy_model, MasteryModel::MOfN);

        let twelve = normalize_mastery(&empty, 12).unwrap();
        assert_eq!((twelve.n, twelve.m), (5, 5));
    }

    #[test]
    fn do_all_forces_item_count() {
        let config = json!({"mastery_model": "do_all"});
        let mastery = normalize_mastery(&config, 7).unwrap();
        assert_eq!((mastery.n, mastery.m), (7, 7));
        assert_eq!(mastery.legacy_model, MasteryModel::DoAll);

        let empty_exercise = normalize_mastery(&config, 0).unwrap();
        assert_eq!((empty_exercise.n, empty_exercise.m), (1, 1));
    }

    #[test]
    fn in_a_row_patterns_force_fixed_counts() {
        for (model, expected) in [
            ("num_correct_in_a_row_2", 2),
            ("num_correct_in_a_row_3", 3),
            ("num_correct_in_a_row_5", 5),
            ("num_correct_in_a_row_10", 10),
        ] {
            let config = json!({ "mastery_model": model });
            let mastery = normalize_mastery(&config, 42).unwrap();
            assert_eq!((mastery.n, mastery.m), (expected, expected));
        }
    }

    #[test]
    fn explicit_m_of_n_overrides_win() {
        let config = json!({"mastery_model": "m_of_n", "n": 9, "m": 4});
        let mastery = normalize_mastery(&config, 2).unwrap();
        assert_eq!((mastery.n, mastery.m), (9, 4));
    }

    #[test]
    fn unknown_mastery_model_is_an_error() {
        let config = json!({"mastery_model": "speedrun"});
        assert!(normalize_mastery(&config, 3).is_err());
    }

    #[test]
    fn randomize_defaults_to_true_but_respects_explicit_false() {
        let default = normalize_mastery(&json!({}), 3).unwrap();
        assert!(default.randomize);
        let explicit = normalize_mastery(&json!({"randomize": false}), 3).unwrap();
        assert!(!explicit.randomize);
    }

    #[test]
    fn graphie_splits_on_delimiter() {
        let mut blob = b"<svg>circle</svg>".to_vec();
        blob.extend_from_slice(GRAPHIE_DELIMITER);
        blob.extend_from_slice(b"{\"version\": 1}");
        let (svg, data) = split_graphie(&blob, "abc").unwrap();
        assert_eq!(svg, b"<svg>circle</svg>");
        assert_eq!(data, b"{\"version\": 1}");
    }

    #[test]
    fn graphie_without_delimiter_is_invalid() {
        assert!(split_graphie(b"<svg/>", "abc").is_err());
    }

    #[test]
    fn numeric_answers_are_extracted() {
        assert_eq!(extract_numeric(&json!("42")), json!(42));
        assert_eq!(extract_numeric(&json!("3.5")), json!(3.5));
        assert_eq!(extract_numeric(&json!(0)), json!(0));
        assert_eq!(extract_numeric(&json!("not a number")), Value::Null);
    }
}
