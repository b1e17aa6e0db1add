//! Integration tests for the publication finalizer: token assignment,
//! version bump, flag sweep, and aggregate computation.

use crate::db::EditorialStore;
use crate::export::finalizer::{assign_tokens, finalize_publish};
use crate::models::{
    Channel, ContentKind, EditorialNode, FileAsset, FormatPreset, Language,
};
use crate::utils::proquint;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

async fn create_test_store() -> (EditorialStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let editorial = EditorialStore::new(temp_dir.path().join("editorial.db"))
        .await
        .unwrap();
    (editorial, temp_dir)
}

fn channel(root_id: &str) -> Channel {
    Channel {
        id: "chan-main".to_string(),
        name: "Main".to_string(),
        description: String::new(),
        version: 0,
        root_id: root_id.to_string(),
        language_id: None,
        thumbnail: None,
        thumbnail_encoding: None,
        icon_encoding: None,
        last_published: None,
        total_resource_count: 0,
        published_kind_count: None,
        published_size: 0,
    }
}

/// Root topic with one exercise and two file-backed resources sharing a
/// checksum.
async fn seed_tree(editorial: &EditorialStore) -> (EditorialNode, Channel) {
    let root = EditorialNode::new(ContentKind::Topic, "Root", None);
    editorial.create_node(&root).await.unwrap();

    let spanish = Language {
        id: "es".to_string(),
        lang_code: "es".to_string(),
        lang_subcode: None,
        lang_name: Some("Spanish".to_string()),
        native_name: None,
    };
    let french = Language {
        id: "fr".to_string(),
        lang_code: "fr".to_string(),
        lang_subcode: None,
        lang_name: Some("French".to_string()),
        native_name: None,
    };
    editorial.create_language(&spanish).await.unwrap();
    editorial.create_language(&french).await.unwrap();

    let mut exercise = EditorialNode::new(ContentKind::Exercise, "Quiz", Some(root.id.clone()));
    exercise.language_id = Some("es".to_string());
    let resource_a = EditorialNode::new(ContentKind::Resource, "Doc A", Some(root.id.clone()));
    let resource_b = EditorialNode::new(ContentKind::Resource, "Doc B", Some(root.id.clone()));
    for node in [&exercise, &resource_a, &resource_b] {
        editorial.create_node(node).await.unwrap();
    }

    // Same blob referenced twice plus one distinct file; dedup by
    // checksum+size must count the shared blob once.
    let mut shared_a = FileAsset::from_contents("aaa111", "pdf", 100, FormatPreset::Document);
    shared_a.node_id = Some(resource_a.id.clone());
    let mut shared_b = FileAsset::from_contents("aaa111", "pdf", 100, FormatPreset::Document);
    shared_b.node_id = Some(resource_b.id.clone());
    let mut distinct = FileAsset::from_contents("bbb222", "perseus", 50, FormatPreset::Exercise);
    distinct.node_id = Some(exercise.id.clone());
    distinct.language_id = Some("fr".to_string());
    for file in [&shared_a, &shared_b, &distinct] {
        editorial.create_file(file).await.unwrap();
    }

    let channel = channel(&root.id);
    editorial.create_channel(&channel).await.unwrap();
    (root, channel)
}

#[tokio::test]
async fn finalize_bumps_version_sweeps_flags_and_fills_aggregates() {
    let (editorial, _temp) = create_test_store().await;
    let (root, channel) = seed_tree(&editorial).await;

    let stats = finalize_publish(&editorial, &channel, Utc::now())
        .await
        .unwrap();
    assert_eq!(stats.version, 1);
    assert_eq!(stats.resource_count, 3);
    assert_eq!(stats.published_size, 150);

    let updated = editorial.get_channel(&channel.id).await.unwrap().unwrap();
    assert_eq!(updated.version, 1);
    assert!(updated.last_published.is_some());
    assert_eq!(updated.total_resource_count, 3);
    assert_eq!(updated.published_size, 150);
    let histogram: serde_json::Value =
        serde_json::from_str(updated.published_kind_count.as_deref().unwrap()).unwrap();
    let entries = histogram.as_array().unwrap();
    assert!(entries
        .iter()
        .any(|e| e["kind_id"] == "exercise" && e["count"] == 1));
    assert!(entries
        .iter()
        .any(|e| e["kind_id"] == "resource" && e["count"] == 2));

    // Node language and file language both land in the union.
    let languages = editorial.included_languages(&channel.id).await.unwrap();
    assert_eq!(languages, vec!["es".to_string(), "fr".to_string()]);

    // The whole family is republished: changed cleared, published set.
    let swept_root = editorial.get_node(&root.id).await.unwrap().unwrap();
    assert!(!swept_root.changed);
    assert!(swept_root.published);
    assert!(!editorial.family_has_changes(&root.id).await.unwrap());
}

#[tokio::test]
async fn token_assignment_creates_exactly_two_records() {
    let (editorial, _temp) = create_test_store().await;
    let (_root, channel) = seed_tree(&editorial).await;

    let mut rng = StdRng::seed_from_u64(11);
    assign_tokens(&editorial, &channel.id, &mut rng).await.unwrap();

    let tokens = editorial.tokens_for_channel(&channel.id).await.unwrap();
    assert_eq!(tokens.len(), 2);
    let primary: Vec<_> = tokens.iter().filter(|t| t.is_primary).collect();
    assert_eq!(primary.len(), 1);
    assert_ne!(primary[0].token, channel.id);
    assert!(tokens.iter().any(|t| t.token == channel.id && !t.is_primary));
}

#[tokio::test]
async fn token_assignment_is_idempotent() {
    let (editorial, _temp) = create_test_store().await;
    let (_root, channel) = seed_tree(&editorial).await;

    let mut rng = StdRng::seed_from_u64(3);
    assign_tokens(&editorial, &channel.id, &mut rng).await.unwrap();
    assign_tokens(&editorial, &channel.id, &mut rng).await.unwrap();

    let tokens = editorial.tokens_for_channel(&channel.id).await.unwrap();
    assert_eq!(tokens.len(), 2, "second assignment is a no-op");
}

#[tokio::test]
async fn token_generation_avoids_existing_tokens() {
    let (editorial, _temp) = create_test_store().await;
    let (_root, channel) = seed_tree(&editorial).await;

    // Occupy the first tokens a seeded generator would produce, so the
    // collision loop has to do real work.
    let other_root = EditorialNode::new(ContentKind::Topic, "Other root", None);
    editorial.create_node(&other_root).await.unwrap();
    let other = Channel {
        id: "chan-other".to_string(),
        root_id: other_root.id.clone(),
        ..channel.clone()
    };
    editorial.create_channel(&other).await.unwrap();

    let mut preview = StdRng::seed_from_u64(99);
    let mut occupied = Vec::new();
    for _ in 0..3 {
        let token = proquint::generate(&mut preview);
        editorial
            .create_secret_token(&other.id, &token, false)
            .await
            .unwrap();
        occupied.push(token);
    }

    let mut rng = StdRng::seed_from_u64(99);
    assign_tokens(&editorial, &channel.id, &mut rng).await.unwrap();

    let tokens = editorial.tokens_for_channel(&channel.id).await.unwrap();
    let primary = tokens.iter().find(|t| t.is_primary).unwrap();
    assert!(
        !occupied.contains(&primary.token),
        "fresh token never collides with an existing one"
    );
}
