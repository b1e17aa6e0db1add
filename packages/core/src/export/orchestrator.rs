//! Export Orchestrator
//!
//! Sequences one channel publish end to end: early-exit check, fresh
//! target database, channel metadata and tags, tree transform,
//! prerequisites, artifact persistence, then finalization. The editorial
//! store's sanctioned mutations all run inside one transaction, so any
//! fatal error leaves the source tree's flags, version and tokens exactly
//! as they were.
//!
//! The target database is written at a temporary path and only copied into
//! the configured root once the transform has completed; consumers never
//! see a partial database.

use crate::db::{AssetStorage, EditorialStore, TargetStore};
use crate::export::assets::convert_channel_thumbnail;
use crate::export::error::{ExportError, ExportOutcome, PublishReport};
use crate::export::finalizer::finalize_publish;
use crate::export::transformer::TreeTransformer;
use crate::models::{Channel, TargetChannel};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Invocation surface of one export.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Bypass the "nothing changed" early exit.
    pub force: bool,
    /// Bypass the per-exercise regeneration skip.
    pub force_exercises: bool,
    /// Acting user, attributed to generated exercise bundle files.
    pub user_id: Option<String>,
}

/// Publish `channel_id` as a new immutable version.
///
/// Returns [`ExportOutcome::NothingChanged`] when no node in the tree is
/// flagged changed and `force` is not set; in that case nothing has been
/// mutated and no artifact exists.
pub async fn publish_channel(
    editorial: &EditorialStore,
    storage: &AssetStorage,
    db_root: &Path,
    channel_id: &str,
    options: &PublishOptions,
) -> Result<ExportOutcome, ExportError> {
    let channel = editorial
        .get_channel(channel_id)
        .await?
        .ok_or_else(|| ExportError::missing_reference("channel", channel_id))?;

    if !options.force && !editorial.family_has_changes(&channel.root_id).await? {
        info!("No nodes have been changed; nothing to publish for {}", channel.id);
        return Ok(ExportOutcome::NothingChanged);
    }

    let temp_path =
        std::env::temp_dir().join(format!("{}-{}.sqlite3", channel.id, Uuid::new_v4()));

    editorial.begin_publish().await?;
    let result = run_export(editorial, storage, db_root, &channel, options, &temp_path).await;
    cleanup_temp_database(&temp_path);

    match result {
        Ok(report) => {
            editorial.commit_publish().await?;
            info!(
                "Published channel {} as version {} ({} resources)",
                report.channel_id, report.version, report.resource_count
            );
            Ok(ExportOutcome::Published(report))
        }
        Err(e) => {
            if let Err(rollback_err) = editorial.rollback_publish().await {
                warn!("Rollback after failed export also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

async fn run_export(
    editorial: &EditorialStore,
    storage: &AssetStorage,
    db_root: &Path,
    channel: &Channel,
    options: &PublishOptions,
    temp_path: &Path,
) -> Result<PublishReport, ExportError> {
    let root = editorial
        .get_node(&channel.root_id)
        .await?
        .ok_or_else(|| ExportError::missing_reference("root node", &channel.root_id))?;

    let target = TargetStore::create(temp_path.to_path_buf()).await?;

    let icon = convert_channel_thumbnail(editorial, storage, channel).await?;
    target
        .create_channel_metadata(&TargetChannel {
            id: channel.id.clone(),
            name: channel.name.clone(),
            description: channel.description.clone(),
            version: channel.version,
            thumbnail: icon,
            root_id: channel.root_id.clone(),
        })
        .await?;
    info!("Generated the channel metadata.");

    target
        .bulk_create_tags(&editorial.tags_for_channel(&channel.id).await?)
        .await?;

    let default_language = match &channel.language_id {
        Some(id) => Some(
            editorial
                .get_language(id)
                .await?
                .ok_or_else(|| ExportError::missing_reference("language", id))?,
        ),
        None => None,
    };

    let transformer = TreeTransformer::new(
        editorial,
        &target,
        storage,
        default_language,
        options.force_exercises,
        options.user_id.clone(),
    );

    target.begin_bulk_load().await?;
    transformer.run(&root).await?;
    target.end_bulk_load().await?;

    transformer.map_prerequisites(&channel.root_id).await?;

    // Flush the WAL so the file on disk is the complete database before
    // it is copied out.
    target.checkpoint().await?;
    let db_path = save_export_database(temp_path, db_root, &channel.id)?;

    let stats = finalize_publish(editorial, channel, Utc::now()).await?;

    Ok(PublishReport {
        channel_id: channel.id.clone(),
        version: stats.version,
        resource_count: stats.resource_count,
        published_size: stats.published_size,
        db_path,
    })
}

/// Copy the finished export database into the configured root, creating
/// the directory on demand.
fn save_export_database(
    temp_path: &Path,
    db_root: &Path,
    channel_id: &str,
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(db_root).map_err(|e| ExportError::storage(db_root, e))?;
    let destination = db_root.join(format!("{}.sqlite3", channel_id));
    std::fs::copy(temp_path, &destination)
        .map_err(|e| ExportError::storage(destination.clone(), e))?;
    info!("Successfully copied export database to {}", destination.display());
    Ok(destination)
}

fn cleanup_temp_database(temp_path: &Path) {
    // Best effort: the temp file (and its WAL sidecars) are garbage once
    // the export either persisted or failed.
    for suffix in ["", "-wal", "-shm"] {
        let mut path = temp_path.as_os_str().to_owned();
        path.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(&path));
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod orchestrator_test;
