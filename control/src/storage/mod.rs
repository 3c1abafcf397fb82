//! Object-storage capability: prefix copy and prefix delete.

mod memory;
mod s3;

pub use memory::MemoryStorage;
pub use s3::{S3Config, S3Storage};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no objects found under prefix: {0}")]
    EmptyPrefix(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Copy every object under `src` to `dst`, preserving the relative key.
    /// Folder placeholders (keys ending `/`) are skipped. Any individual
    /// copy failure aborts the whole operation.
    async fn copy_prefix(&self, src: &str, dst: &str) -> StorageResult<()>;

    /// Delete every object under `prefix`. Individual failures are logged
    /// and the loop continues.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()>;
}
