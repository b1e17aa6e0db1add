//! End-to-end publish tests: the full topic+exercise+resource scenario,
//! the early-exit contract, and transactional rollback on fatal errors.

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::error::{ExportError, ExportOutcome};
use crate::export::orchestrator::{publish_channel, PublishOptions};
use crate::models::{
    AssessmentItem, Channel, ContentKind, EditorialNode, FileAsset, FormatPreset,
};
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

struct Fixture {
    editorial: EditorialStore,
    storage: AssetStorage,
    db_root: PathBuf,
    channel: Channel,
    exercise: EditorialNode,
    _temp: TempDir,
}

/// One topic containing one exercise (3 items, no mastery override) and
/// one file-backed resource.
async fn create_fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let editorial = EditorialStore::new(temp.path().join("editorial.db"))
        .await
        .unwrap();
    let storage = AssetStorage::new(temp.path().join("storage"));
    let db_root = temp.path().join("exports");

    let root = EditorialNode::new(ContentKind::Topic, "Root", None);
    editorial.create_node(&root).await.unwrap();
    let topic = EditorialNode::new(ContentKind::Topic, "Unit 1", Some(root.id.clone()));
    editorial.create_node(&topic).await.unwrap();

    let exercise = EditorialNode::new(ContentKind::Exercise, "Quiz", Some(topic.id.clone()));
    editorial.create_node(&exercise).await.unwrap();
    for i in 0..3 {
        editorial
            .create_assessment_item(&AssessmentItem {
                assessment_id: format!("item-{i}"),
                node_id: exercise.id.clone(),
                item_type: "single_selection".to_string(),
                question: format!("Question {i}?"),
                answers: json!([{"answer": "yes", "correct": true, "order": 1}]).to_string(),
                hints: "[]".to_string(),
                raw_data: String::new(),
                order: i,
                randomize: false,
            })
            .await
            .unwrap();
    }

    let resource = EditorialNode::new(ContentKind::Resource, "Reading", Some(topic.id.clone()));
    editorial.create_node(&resource).await.unwrap();
    let mut doc = FileAsset::from_contents("doc123", "pdf", 4096, FormatPreset::Document);
    doc.node_id = Some(resource.id.clone());
    editorial.create_file(&doc).await.unwrap();

    let channel = Channel {
        id: "chan-e2e".to_string(),
        name: "End to end".to_string(),
        description: "Publish test channel".to_string(),
        version: 0,
        root_id: root.id.clone(),
        language_id: None,
        thumbnail: None,
        thumbnail_encoding: None,
        icon_encoding: None,
        last_published: None,
        total_resource_count: 0,
        published_kind_count: None,
        published_size: 0,
    };
    editorial.create_channel(&channel).await.unwrap();

    Fixture {
        editorial,
        storage,
        db_root,
        channel,
        exercise,
        _temp: temp,
    }
}

#[tokio::test]
async fn publish_produces_artifact_stats_and_tokens() {
    let f = create_fixture().await;

    let outcome = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        &f.channel.id,
        &PublishOptions::default(),
    )
    .await
    .unwrap();

    let ExportOutcome::Published(report) = outcome else {
        panic!("expected a publish");
    };
    assert_eq!(report.version, 1);
    assert_eq!(report.resource_count, 2, "topic is excluded from the count");
    assert_eq!(report.db_path, f.db_root.join("chan-e2e.sqlite3"));
    assert!(report.db_path.exists());

    // Channel-side aggregates.
    let channel = f.editorial.get_channel(&f.channel.id).await.unwrap().unwrap();
    assert_eq!(channel.version, 1);
    assert_eq!(channel.total_resource_count, 2);
    let histogram: serde_json::Value =
        serde_json::from_str(channel.published_kind_count.as_deref().unwrap()).unwrap();
    let entries = histogram.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .any(|e| e["kind_id"] == "exercise" && e["count"] == 1));
    assert!(entries
        .iter()
        .any(|e| e["kind_id"] == "resource" && e["count"] == 1));

    // Exactly one primary token plus the channel-id token.
    let tokens = f.editorial.tokens_for_channel(&f.channel.id).await.unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens.iter().filter(|t| t.is_primary).count(), 1);
    assert!(tokens.iter().any(|t| t.token == f.channel.id));

    // The artifact is a complete target database.
    let artifact = TargetStore::open(report.db_path.clone()).await.unwrap();
    assert_eq!(artifact.node_count().await.unwrap(), 4);
    let metadata = artifact
        .get_channel_metadata(&f.channel.id)
        .await
        .unwrap()
        .expect("channel metadata row");
    assert_eq!(metadata.root_id, f.channel.root_id);
    assert!(artifact
        .assessment_metadata_for_node(&f.exercise.id)
        .await
        .unwrap()
        .is_some());
    // Default mastery for 3 items: m-of-n with n=m=3.
    let (_, count, mastery, _) = artifact
        .assessment_metadata_for_node(&f.exercise.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count, 3);
    let mastery: serde_json::Value = serde_json::from_str(&mastery).unwrap();
    assert_eq!(mastery["n"], 3);
    assert_eq!(mastery["m"], 3);
}

#[tokio::test]
async fn unchanged_tree_exits_early_without_mutation() {
    let f = create_fixture().await;

    // First publish clears every changed flag.
    let first = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        &f.channel.id,
        &PublishOptions::default(),
    )
    .await
    .unwrap();
    assert!(first.is_published());

    let second = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        &f.channel.id,
        &PublishOptions::default(),
    )
    .await
    .unwrap();
    assert!(matches!(second, ExportOutcome::NothingChanged));

    let channel = f.editorial.get_channel(&f.channel.id).await.unwrap().unwrap();
    assert_eq!(channel.version, 1, "early exit performs no version bump");

    // Force bypasses the early exit.
    let forced = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        &f.channel.id,
        &PublishOptions {
            force: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(forced.is_published());
    let channel = f.editorial.get_channel(&f.channel.id).await.unwrap().unwrap();
    assert_eq!(channel.version, 2);
}

#[tokio::test]
async fn fatal_errors_leave_the_editorial_store_untouched() {
    let f = create_fixture().await;

    // Poison one assessment item with an unrecognized type.
    f.editorial
        .create_assessment_item(&AssessmentItem {
            assessment_id: "item-bad".to_string(),
            node_id: f.exercise.id.clone(),
            item_type: "essay".to_string(),
            question: "?".to_string(),
            answers: "[]".to_string(),
            hints: "[]".to_string(),
            raw_data: String::new(),
            order: 99,
            randomize: false,
        })
        .await
        .unwrap();

    let err = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        &f.channel.id,
        &PublishOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::UnsupportedItemType { .. }));

    // No version bump, no tokens, flags untouched.
    let channel = f.editorial.get_channel(&f.channel.id).await.unwrap().unwrap();
    assert_eq!(channel.version, 0);
    assert!(f
        .editorial
        .tokens_for_channel(&f.channel.id)
        .await
        .unwrap()
        .is_empty());
    let exercise = f.editorial.get_node(&f.exercise.id).await.unwrap().unwrap();
    assert!(exercise.changed);
    assert!(!exercise.published);
    assert!(f.editorial.family_has_changes(&f.channel.root_id).await.unwrap());
}

#[tokio::test]
async fn missing_channel_is_a_missing_reference() {
    let f = create_fixture().await;
    let err = publish_channel(
        &f.editorial,
        &f.storage,
        &f.db_root,
        "no-such-channel",
        &PublishOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ExportError::MissingReference { .. }));
}
