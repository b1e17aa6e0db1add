//! Publish a curation channel as a new distribution package version.
//!
//! Thin invocation glue over [`channelkit_core::publish_channel`]: argument
//! parsing, logging setup, and exit-code mapping. All export semantics live
//! in the core crate.

use anyhow::Result;
use channelkit_core::{
    publish_channel, AssetStorage, EditorialStore, ExportOutcome, PublishOptions,
};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    name = "publish-channel",
    version,
    about = "Export an editorial channel tree into a versioned distribution database"
)]
struct Cli {
    /// Channel id to publish
    channel_id: String,

    /// Path to the editorial database
    #[clap(long)]
    editorial_db: PathBuf,

    /// Content-addressed blob storage directory
    #[clap(long)]
    storage_root: PathBuf,

    /// Directory export databases are written to
    #[clap(long)]
    db_root: PathBuf,

    /// Publish even if no node is flagged changed
    #[clap(long)]
    force: bool,

    /// Regenerate every exercise bundle regardless of change state
    #[clap(long = "force-exercises")]
    force_exercises: bool,

    /// Acting user attributed to generated exercise files
    #[clap(long)]
    user_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let editorial = EditorialStore::new(cli.editorial_db).await?;
    let storage = AssetStorage::new(cli.storage_root);
    let options = PublishOptions {
        force: cli.force,
        force_exercises: cli.force_exercises,
        user_id: cli.user_id,
    };

    match publish_channel(&editorial, &storage, &cli.db_root, &cli.channel_id, &options).await {
        Ok(ExportOutcome::Published(report)) => {
            println!(
                "Published channel {} as version {} ({} resources, {} bytes)",
                report.channel_id, report.version, report.resource_count, report.published_size
            );
            println!("You can find your database at {}", report.db_path.display());
            Ok(())
        }
        Ok(ExportOutcome::NothingChanged) => {
            println!("No content has changed; nothing to publish.");
            Ok(())
        }
        Err(e) => {
            eprintln!("Publish failed: {}", e);
            Err(e.into())
        }
    }
}
