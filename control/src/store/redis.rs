//! Redis-backed metadata store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

use crate::models::Repl;

use super::{MetadataStore, StoreError, StoreResult};

const SESSIONS_KEY: &str = "sessions";

fn repl_key(id: &str) -> String {
    format!("repl:{id}")
}

fn user_key(owner: &str) -> String {
    format!("user:{owner}")
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the server answers a PING.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(StoreError::from)?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(StoreError::from)?;
        info!("connected to metadata store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl MetadataStore for RedisStore {
    async fn create_repl(&self, repl: &Repl) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(
                repl_key(&repl.id),
                &[
                    ("id", repl.id.as_str()),
                    ("name", repl.name.as_str()),
                    ("user", repl.user.as_str()),
                    ("template", repl.template.as_str()),
                    ("isActive", if repl.is_active { "true" } else { "false" }),
                ],
            )
            .ignore()
            .sadd(user_key(&repl.user), repl.id.as_str())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_repl(&self, id: &str) -> StoreResult<Option<Repl>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(repl_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(Repl {
            id: id.to_string(),
            name: fields.get("name").cloned().unwrap_or_default(),
            user: fields.get("user").cloned().unwrap_or_default(),
            template: fields.get("template").cloned().unwrap_or_default(),
            is_active: fields.get("isActive").map(String::as_str) == Some("true"),
        }))
    }

    async fn user_repls(&self, owner: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(user_key(owner)).await?)
    }

    async fn set_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if active {
            pipe.sadd(SESSIONS_KEY, id).ignore();
        } else {
            pipe.srem(SESSIONS_KEY, id).ignore();
        }
        pipe.hset(repl_key(id), "isActive", if active { "true" } else { "false" })
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn is_active(&self, id: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(SESSIONS_KEY, id).await?)
    }

    async fn delete_repl(&self, owner: &str, id: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .del(repl_key(id))
            .ignore()
            .srem(user_key(owner), id)
            .ignore()
            .srem(SESSIONS_KEY, id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }
}
