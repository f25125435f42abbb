//! Binary Store
//!
//! Content-addressed storage for binary property payloads. Nodes carry only
//! a [`BinaryRef`] (sha-256 digest + length); the bytes live here. Content
//! is immutable and deduplicated by digest; orphaned content is reclaimed by
//! a mark-and-sweep pass fed with the digests the repository still
//! references.

use crate::models::BinaryRef;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

/// Binary store operation errors
#[derive(Error, Debug)]
pub enum BlobError {
    /// Filesystem failure in the store directory.
    #[error("Binary store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No content under the requested digest.
    #[error("No binary content for digest {digest}")]
    NotFound { digest: String },

    /// Stored bytes no longer hash to their digest.
    #[error("Binary content corrupt for digest {digest}")]
    Corrupt { digest: String },
}

/// Result of one garbage collection pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryStoreStatus {
    /// Binaries kept.
    pub count: u64,
    /// Total size kept, in bytes.
    pub total_size: u64,
    /// Binaries reclaimed by this pass.
    pub gc_count: u64,
    /// Size reclaimed, in bytes.
    pub gc_size: u64,
}

/// Abstraction over binary content storage.
#[async_trait]
pub trait BinaryStore: Send + Sync {
    /// Stores content, returning its reference. Re-putting identical bytes
    /// is a no-op returning the same reference.
    async fn put(&self, bytes: &[u8]) -> Result<BinaryRef, BlobError>;

    /// Fetches content by digest.
    async fn get(&self, digest: &str) -> Result<Vec<u8>, BlobError>;

    /// Whether content exists for a digest.
    async fn contains(&self, digest: &str) -> Result<bool, BlobError>;

    /// Mark-and-sweep: deletes content whose digest is not in `referenced`
    /// and whose file is older than `min_age`. The age floor protects
    /// content uploaded by sessions that have not saved yet.
    async fn collect_garbage(
        &self,
        referenced: &[String],
        min_age: Duration,
    ) -> Result<BinaryStoreStatus, BlobError>;
}

/// Digest-addressed binary store on the local filesystem.
///
/// Layout is `<root>/<d0d1>/<digest>`, sharding on the first two hex chars
/// so directories stay small.
pub struct LocalBinaryStore {
    root: PathBuf,
}

impl LocalBinaryStore {
    pub async fn new(root: PathBuf) -> Result<Self, BlobError> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(LocalBinaryStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, digest: &str) -> PathBuf {
        let shard = digest.get(0..2).unwrap_or("00");
        self.root.join(shard).join(digest)
    }

    fn digest_of(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl BinaryStore for LocalBinaryStore {
    async fn put(&self, bytes: &[u8]) -> Result<BinaryRef, BlobError> {
        let digest = Self::digest_of(bytes);
        let path = self.path_for(&digest);
        if !tokio::fs::try_exists(&path).await? {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // Write-then-rename so a crashed put never leaves a readable
            // partial file under the final digest name. The temp name is
            // unique per call so concurrent puts of the same content do not
            // clobber each other mid-write.
            let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
        }
        Ok(BinaryRef {
            digest,
            length: bytes.len() as u64,
        })
    }

    async fn get(&self, digest: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(digest);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound {
                    digest: digest.to_string(),
                }
            } else {
                BlobError::Io(e)
            }
        })?;
        if Self::digest_of(&bytes) != digest {
            return Err(BlobError::Corrupt {
                digest: digest.to_string(),
            });
        }
        Ok(bytes)
    }

    async fn contains(&self, digest: &str) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.path_for(digest)).await?)
    }

    async fn collect_garbage(
        &self,
        referenced: &[String],
        min_age: Duration,
    ) -> Result<BinaryStoreStatus, BlobError> {
        let mut status = BinaryStoreStatus::default();
        let now = SystemTime::now();

        let mut shards = tokio::fs::read_dir(&self.root).await?;
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let name = file.file_name().to_string_lossy().into_owned();
                if name.ends_with(".tmp") {
                    continue;
                }
                let meta = file.metadata().await?;
                let size = meta.len();
                let age = meta
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .unwrap_or(Duration::ZERO);
                if referenced.iter().any(|d| d == &name) || age < min_age {
                    status.count += 1;
                    status.total_size += size;
                } else {
                    tokio::fs::remove_file(file.path()).await?;
                    status.gc_count += 1;
                    status.gc_size += size;
                }
            }
        }
        info!(
            kept = status.count,
            reclaimed = status.gc_count,
            reclaimed_bytes = status.gc_size,
            "binary garbage collection pass finished"
        );
        Ok(status)
    }
}
