//! Metadata store.
//!
//! Key layout: `repl:<id>` hash with fields `id, name, user, template,
//! isActive`; `user:<owner>` set of repl ids; `sessions` set of active repl
//! ids. Related keys are always written in one atomic step so the
//! membership sets never reference a missing record.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::Repl;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("metadata backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Persist a new repl record and its owner-set membership atomically.
    async fn create_repl(&self, repl: &Repl) -> StoreResult<()>;

    async fn get_repl(&self, id: &str) -> StoreResult<Option<Repl>>;

    /// Repl ids owned by `owner`.
    async fn user_repls(&self, owner: &str) -> StoreResult<Vec<String>>;

    /// Flip the activation tuple: membership in the `sessions` set and the
    /// record's `isActive` flag change together.
    async fn set_active(&self, id: &str, active: bool) -> StoreResult<()>;

    async fn is_active(&self, id: &str) -> StoreResult<bool>;

    /// Remove the record and its owner-set membership atomically.
    async fn delete_repl(&self, owner: &str, id: &str) -> StoreResult<()>;
}
