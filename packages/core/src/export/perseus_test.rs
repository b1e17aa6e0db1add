//! Integration tests for the exercise bundler: archive layout,
//! determinism, image dedup, graphie splitting, and answer filtering.

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::error::ExportError;
use crate::export::perseus::{
    process_assessment_metadata, ExerciseBundler, GRAPHIE_DELIMITER,
};
use crate::models::{
    AssessmentItem, ContentKind, EditorialNode, FileAsset, FormatPreset,
};
use serde_json::{json, Value};
use std::io::{Cursor, Read};
use tempfile::TempDir;
use zip::ZipArchive;

async fn create_test_stores() -> (EditorialStore, TargetStore, AssetStorage, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let editorial = EditorialStore::new(temp_dir.path().join("editorial.db"))
        .await
        .unwrap();
    let target = TargetStore::create(temp_dir.path().join("target.db"))
        .await
        .unwrap();
    let storage = AssetStorage::new(temp_dir.path().join("storage"));
    (editorial, target, storage, temp_dir)
}

fn assessment_item(
    node_id: &str,
    assessment_id: &str,
    item_type: &str,
    question: &str,
    answers: Value,
    order: i64,
) -> AssessmentItem {
    AssessmentItem {
        assessment_id: assessment_id.to_string(),
        node_id: node_id.to_string(),
        item_type: item_type.to_string(),
        question: question.to_string(),
        answers: answers.to_string(),
        hints: "[]".to_string(),
        raw_data: String::new(),
        order,
        randomize: false,
    }
}

fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut content = Vec::new();
    entry.read_to_end(&mut content).unwrap();
    content
}

#[tokio::test]
async fn archive_is_deterministic_and_dedups_images() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Fractions", None);
    editorial.create_node(&node).await.unwrap();

    let (checksum, _) = storage.write(b"png bytes", "png").await.unwrap();
    let question_a = format!("What? ![x](${{CONTENTSTORAGE}}/{checksum}.png)");
    let question_b = format!("Again? ![x](${{CONTENTSTORAGE}}/{checksum}.png)");

    let items = vec![
        assessment_item(
            &node.id,
            "item-a",
            "single_selection",
            &question_a,
            json!([{"answer": "yes", "correct": true, "order": 1}]),
            1,
        ),
        assessment_item(
            &node.id,
            "item-b",
            "multiple_selection",
            &question_b,
            json!([{"answer": "no", "correct": false, "order": 1}]),
            2,
        ),
    ];
    for item in &items {
        editorial.create_assessment_item(item).await.unwrap();
    }

    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);

    let first = bundler.build_archive(&items, &manifest).await.unwrap();
    let second = bundler.build_archive(&items, &manifest).await.unwrap();
    assert_eq!(first, second, "identical content must bundle to identical bytes");

    let mut archive = ZipArchive::new(Cursor::new(first.clone())).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"exercise.json".to_string()));
    assert!(names.contains(&"item-a.json".to_string()));
    assert!(names.contains(&"item-b.json".to_string()));
    // Image referenced by both items appears exactly once.
    let image_name = format!("images/{checksum}.png");
    assert_eq!(names.iter().filter(|n| **n == image_name).count(), 1);

    // Entries are stored uncompressed.
    for i in 0..archive.len() {
        let entry = archive.by_index(i).unwrap();
        assert_eq!(entry.compression(), zip::CompressionMethod::Stored);
    }
}

#[tokio::test]
async fn manifest_carries_normalized_and_legacy_mastery() {
    let (editorial, target, _storage, _temp) = create_test_stores().await;

    let mut node = EditorialNode::new(ContentKind::Exercise, "Do them all", None);
    node.extra_fields = json!({"mastery_model": "do_all"});
    editorial.create_node(&node).await.unwrap();

    let items: Vec<AssessmentItem> = (0..3)
        .map(|i| {
            assessment_item(
                &node.id,
                &format!("item-{i}"),
                "true_false",
                "T or F?",
                json!([{"answer": "true", "correct": true, "order": 1}]),
                i,
            )
        })
        .collect();

    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    assert_eq!(manifest["mastery_model"], "m_of_n");
    assert_eq!(manifest["legacy_mastery_model"], "do_all");
    assert_eq!(manifest["n"], 3);
    assert_eq!(manifest["m"], 3);
    // True/false maps to single selection for consumers.
    assert_eq!(manifest["assessment_mapping"]["item-0"], "single_selection");

    let (item_ids, count, mastery, _randomize) = target
        .assessment_metadata_for_node(&node.id)
        .await
        .unwrap()
        .expect("metadata row written");
    assert_eq!(count, 3);
    let ids: Vec<String> = serde_json::from_str(&item_ids).unwrap();
    assert_eq!(ids, vec!["item-0", "item-1", "item-2"]);
    let mastery: Value = serde_json::from_str(&mastery).unwrap();
    assert_eq!(mastery["type"], "do_all");
}

#[tokio::test]
async fn graphie_blob_splits_into_two_entries() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Graphs", None);
    editorial.create_node(&node).await.unwrap();

    let item = assessment_item(
        &node.id,
        "item-g",
        "single_selection",
        "Read the graph",
        json!([{"answer": "ok", "correct": true, "order": 1}]),
        1,
    );
    editorial.create_assessment_item(&item).await.unwrap();

    let mut blob = b"<svg>axes</svg>".to_vec();
    blob.extend_from_slice(GRAPHIE_DELIMITER);
    blob.extend_from_slice(b"{\"points\": [1, 2]}");
    let (checksum, size) = storage.write(&blob, "graphie").await.unwrap();

    let mut graphie = FileAsset::from_contents(
        checksum,
        "graphie",
        size,
        FormatPreset::ExerciseGraphie,
    );
    graphie.assessment_id = Some(item.assessment_id.clone());
    graphie.original_filename = "axes-plot".to_string();
    editorial.create_file(&graphie).await.unwrap();

    let manifest = process_assessment_metadata(&node, std::slice::from_ref(&item), &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);
    let bytes = bundler
        .build_archive(std::slice::from_ref(&item), &manifest)
        .await
        .unwrap();

    assert_eq!(read_entry(&bytes, "images/axes-plot.svg"), b"<svg>axes</svg>");
    assert_eq!(
        read_entry(&bytes, "images/axes-plot-data.json"),
        b"{\"points\": [1, 2]}"
    );
}

#[tokio::test]
async fn blank_answers_are_dropped_but_zero_is_kept() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Numbers", None);
    editorial.create_node(&node).await.unwrap();

    let input_item = assessment_item(
        &node.id,
        "item-in",
        "input_question",
        "How many?",
        json!([
            {"answer": "0", "order": 1},
            {"answer": "", "order": 2},
            {"answer": "7", "order": 3}
        ]),
        1,
    );
    let choice_item = assessment_item(
        &node.id,
        "item-ch",
        "single_selection",
        "Pick one",
        json!([
            {"answer": "", "correct": false, "order": 1},
            {"answer": "B", "correct": true, "order": 2}
        ]),
        2,
    );
    editorial.create_assessment_item(&input_item).await.unwrap();
    editorial.create_assessment_item(&choice_item).await.unwrap();

    let items = vec![input_item, choice_item];
    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);
    let bytes = bundler.build_archive(&items, &manifest).await.unwrap();

    let input: Value = serde_json::from_slice(&read_entry(&bytes, "item-in.json")).unwrap();
    let answers = input["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0]["answer"], 0);
    assert_eq!(answers[1]["answer"], 7);

    let choice: Value = serde_json::from_slice(&read_entry(&bytes, "item-ch.json")).unwrap();
    let answers = choice["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["answer"], "B");
}

#[tokio::test]
async fn formulas_unwrap_and_sizing_suffix_becomes_descriptor() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Algebra", None);
    editorial.create_node(&node).await.unwrap();

    let (checksum, _) = storage.write(b"diagram", "jpg").await.unwrap();
    let question = format!(
        "Solve $$x^2$$ using ![d](${{CONTENTSTORAGE}}/{checksum}.jpg =300x200)"
    );
    let item = assessment_item(
        &node.id,
        "item-f",
        "single_selection",
        &question,
        json!([{"answer": "x", "correct": true, "order": 1}]),
        1,
    );
    editorial.create_assessment_item(&item).await.unwrap();

    let items = vec![item];
    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);
    let bytes = bundler.build_archive(&items, &manifest).await.unwrap();

    let rendered: Value = serde_json::from_slice(&read_entry(&bytes, "item-f.json")).unwrap();
    let content = rendered["question"]["content"].as_str().unwrap();
    assert!(content.contains("$x^2$"));
    assert!(!content.contains("$$"));
    assert!(content.contains(&format!("${{IMG}}/images/{checksum}.jpg")));
    assert!(!content.contains("=300x200"));

    let images = rendered["question"]["images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0]["width"], 300.0);
    assert_eq!(images[0]["height"], 200.0);

    // The referenced image landed in the archive.
    read_entry(&bytes, &format!("images/{checksum}.jpg"));
}

#[tokio::test]
async fn unrecognized_item_type_aborts_the_bundle() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Odd", None);
    editorial.create_node(&node).await.unwrap();

    let good = assessment_item(
        &node.id,
        "item-ok",
        "single_selection",
        "fine",
        json!([{"answer": "a", "correct": true, "order": 1}]),
        1,
    );
    let bad = assessment_item(&node.id, "item-bad", "essay", "???", json!([]), 2);
    editorial.create_assessment_item(&good).await.unwrap();
    editorial.create_assessment_item(&bad).await.unwrap();

    let items = vec![good, bad];
    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);
    let err = bundler.build_archive(&items, &manifest).await.unwrap_err();
    assert!(matches!(
        err,
        ExportError::UnsupportedItemType { ref assessment_id, .. } if assessment_id == "item-bad"
    ));
}

#[tokio::test]
async fn create_exercise_bundle_replaces_the_file_record() {
    let (editorial, target, storage, _temp) = create_test_stores().await;

    let node = EditorialNode::new(ContentKind::Exercise, "Replace me", None);
    editorial.create_node(&node).await.unwrap();

    // Stale bundle record from a previous publish.
    let mut stale = FileAsset::from_contents("feedbeef", "perseus", 10, FormatPreset::Exercise);
    stale.node_id = Some(node.id.clone());
    editorial.create_file(&stale).await.unwrap();

    let item = assessment_item(
        &node.id,
        "item-r",
        "single_selection",
        "q",
        json!([{"answer": "a", "correct": true, "order": 1}]),
        1,
    );
    editorial.create_assessment_item(&item).await.unwrap();

    let items = vec![item];
    let manifest = process_assessment_metadata(&node, &items, &target)
        .await
        .unwrap();
    let bundler = ExerciseBundler::new(&editorial, &storage);
    let file = bundler
        .create_exercise_bundle(&node, &items, &manifest, Some("user-42"))
        .await
        .unwrap();

    let bundle_files: Vec<_> = editorial
        .files_for_node(&node.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|f| f.preset == FormatPreset::Exercise)
        .collect();
    assert_eq!(bundle_files.len(), 1);
    assert_eq!(bundle_files[0].checksum, file.checksum);
    assert_ne!(bundle_files[0].checksum, "feedbeef");
    assert_eq!(bundle_files[0].uploaded_by.as_deref(), Some("user-42"));
    assert!(storage.exists(&file.checksum, "perseus").await);
}
