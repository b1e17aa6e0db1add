//! Content-Addressed Asset Storage
//!
//! On-disk blob store addressed by sha256 checksum. Blobs are immutable:
//! writing the same bytes twice lands on the same path, which is how file
//! deduplication by content works across nodes and channels.
//!
//! Layout: `<root>/<first 4 hex chars>/<checksum>.<ext>` to keep directory
//! fanout bounded.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Handle to the content-addressed blob directory.
#[derive(Debug, Clone)]
pub struct AssetStorage {
    root: PathBuf,
}

impl AssetStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the hex sha256 checksum of a blob.
    pub fn compute_checksum(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }

    /// Path a blob with this checksum and extension lives at.
    pub fn path_for(&self, checksum: &str, extension: &str) -> PathBuf {
        let shard = &checksum[..checksum.len().min(4)];
        self.root.join(shard).join(format!("{checksum}.{extension}"))
    }

    pub async fn exists(&self, checksum: &str, extension: &str) -> bool {
        fs::metadata(self.path_for(checksum, extension)).await.is_ok()
    }

    /// Read a blob by checksum.
    pub async fn read(&self, checksum: &str, extension: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.path_for(checksum, extension)).await
    }

    /// Write bytes into the store, returning their checksum and size.
    ///
    /// Existing blobs are left untouched; identical content always resolves
    /// to the same path.
    pub async fn write(&self, data: &[u8], extension: &str) -> std::io::Result<(String, i64)> {
        let checksum = Self::compute_checksum(data);
        let path = self.path_for(&checksum, extension);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::metadata(&path).await.is_err() {
            fs::write(&path, data).await?;
            debug!("Stored blob {} ({} bytes)", checksum, data.len());
        }
        Ok((checksum, data.len() as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_is_content_addressed_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = AssetStorage::new(dir.path());

        let (checksum, size) = storage.write(b"hello world", "txt").await.unwrap();
        assert_eq!(size, 11);
        let (again, _) = storage.write(b"hello world", "txt").await.unwrap();
        assert_eq!(checksum, again);

        let read_back = storage.read(&checksum, "txt").await.unwrap();
        assert_eq!(read_back, b"hello world");
        assert!(storage.exists(&checksum, "txt").await);
        assert!(!storage.exists("0000", "txt").await);
    }

    #[tokio::test]
    async fn blobs_are_sharded_by_checksum_prefix() {
        let dir = TempDir::new().unwrap();
        let storage = AssetStorage::new(dir.path());
        let (checksum, _) = storage.write(b"shard me", "bin").await.unwrap();
        let path = storage.path_for(&checksum, "bin");
        assert!(path.starts_with(dir.path().join(&checksum[..4])));
    }
}
