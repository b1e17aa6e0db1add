//! Publication Finalizer
//!
//! Runs after the tree is fully transformed: bumps the version, rewrites
//! the family's publish flags, ensures distribution tokens exist, and
//! recomputes the channel's aggregate fields over what this publish
//! actually shipped.

use crate::db::EditorialStore;
use crate::export::error::ExportError;
use crate::models::Channel;
use crate::utils::proquint;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;

/// Collision retry bound for token generation. Running past this means the
/// token space is effectively exhausted or the generator is broken, which
/// is a configuration error rather than something to retry silently.
pub const MAX_TOKEN_RETRIES: u64 = 1_000_000;

/// Aggregates produced by the finalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishStats {
    pub resource_count: i64,
    pub published_size: i64,
    /// Channel version after the bump.
    pub version: i64,
}

/// Finalize a publish: version bump + timestamp, family-wide flag sweep,
/// token assignment, and aggregate recomputation, in that order. Runs
/// inside the caller's publish transaction.
pub async fn finalize_publish(
    editorial: &EditorialStore,
    channel: &Channel,
    published_at: DateTime<Utc>,
) -> Result<PublishStats, ExportError> {
    editorial
        .increment_channel_version(&channel.id, published_at)
        .await?;
    editorial.mark_family_published(&channel.root_id).await?;
    assign_tokens(editorial, &channel.id, &mut StdRng::from_entropy()).await?;
    fill_published_fields(editorial, channel).await
}

/// Ensure the channel's distribution tokens exist.
///
/// Idempotent: channels that already have a primary token are left alone.
/// Otherwise exactly two records are created - one random pronounceable
/// token marked primary, one fixed token equal to the channel id. Random
/// tokens are collision-checked against every existing token; the space is
/// small enough that collisions are a real possibility, not a theoretical
/// one.
pub async fn assign_tokens<R: Rng>(
    editorial: &EditorialStore,
    channel_id: &str,
    rng: &mut R,
) -> Result<(), ExportError> {
    if editorial.has_primary_token(channel_id).await? {
        return Ok(());
    }
    info!("Generating tokens for the channel.");

    let mut token = proquint::generate(rng);
    let mut attempts: u64 = 0;
    while editorial.token_exists(&token).await? {
        attempts += 1;
        if attempts > MAX_TOKEN_RETRIES {
            return Err(ExportError::TokenExhaustion { attempts });
        }
        token = proquint::generate(rng);
    }

    editorial.create_secret_token(channel_id, &token, true).await?;
    editorial
        .create_secret_token(channel_id, channel_id, false)
        .await?;
    Ok(())
}

/// Recompute channel aggregates over nodes flagged published by this run:
/// non-topic resource count, per-kind histogram, deduplicated file size,
/// and the union of languages referenced by published nodes or their
/// files.
pub async fn fill_published_fields(
    editorial: &EditorialStore,
    channel: &Channel,
) -> Result<PublishStats, ExportError> {
    let resource_count = editorial.published_resource_count(&channel.root_id).await?;
    let kind_counts = editorial.published_kind_counts(&channel.root_id).await?;
    let published_size = editorial.published_file_size(&channel.root_id).await?;

    let histogram: Vec<_> = kind_counts
        .iter()
        .map(|(kind, count)| json!({"kind_id": kind, "count": count}))
        .collect();
    editorial
        .update_channel_aggregates(
            &channel.id,
            resource_count,
            &json!(histogram).to_string(),
            published_size,
        )
        .await?;

    for language_id in editorial.published_language_ids(&channel.root_id).await? {
        editorial
            .add_included_language(&channel.id, &language_id)
            .await?;
    }

    Ok(PublishStats {
        resource_count,
        published_size,
        version: channel.version + 1,
    })
}

#[cfg(test)]
#[path = "finalizer_test.rs"]
mod finalizer_test;
