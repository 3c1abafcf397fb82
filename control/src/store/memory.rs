//! In-memory metadata store for tests and local development.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::models::Repl;

use super::{MetadataStore, StoreResult};

#[derive(Default)]
struct Inner {
    repls: HashMap<String, Repl>,
    user_repls: HashMap<String, HashSet<String>>,
    sessions: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Referential check used by tests: every membership entry points at a
    /// record owned by that user, and every record is a member.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        let forward = inner.user_repls.iter().all(|(owner, ids)| {
            ids.iter()
                .all(|id| inner.repls.get(id).is_some_and(|r| &r.user == owner))
        });
        let backward = inner.repls.values().all(|repl| {
            inner
                .user_repls
                .get(&repl.user)
                .is_some_and(|ids| ids.contains(&repl.id))
        });
        let active = inner
            .sessions
            .iter()
            .all(|id| inner.repls.get(id).is_some_and(|r| r.is_active))
            && inner
                .repls
                .values()
                .all(|r| r.is_active == inner.sessions.contains(&r.id));
        forward && backward && active
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create_repl(&self, repl: &Repl) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.repls.insert(repl.id.clone(), repl.clone());
        inner
            .user_repls
            .entry(repl.user.clone())
            .or_default()
            .insert(repl.id.clone());
        Ok(())
    }

    async fn get_repl(&self, id: &str) -> StoreResult<Option<Repl>> {
        Ok(self.inner.lock().unwrap().repls.get(id).cloned())
    }

    async fn user_repls(&self, owner: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .user_repls
            .get(owner)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if active {
            inner.sessions.insert(id.to_string());
        } else {
            inner.sessions.remove(id);
        }
        if let Some(repl) = inner.repls.get_mut(id) {
            repl.is_active = active;
        }
        Ok(())
    }

    async fn is_active(&self, id: &str) -> StoreResult<bool> {
        Ok(self.inner.lock().unwrap().sessions.contains(id))
    }

    async fn delete_repl(&self, owner: &str, id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.repls.remove(id);
        if let Some(ids) = inner.user_repls.get_mut(owner) {
            ids.remove(id);
            if ids.is_empty() {
                inner.user_repls.remove(owner);
            }
        }
        inner.sessions.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repl(id: &str, owner: &str) -> Repl {
        Repl {
            id: id.to_string(),
            name: "demo".to_string(),
            user: owner.to_string(),
            template: "node".to_string(),
            is_active: false,
        }
    }

    #[tokio::test]
    async fn create_and_delete_keep_membership_consistent() {
        let store = MemoryStore::new();
        store.create_repl(&repl("repl-a", "alice")).await.unwrap();
        store.create_repl(&repl("repl-b", "alice")).await.unwrap();
        assert!(store.is_consistent());
        assert_eq!(store.user_repls("alice").await.unwrap().len(), 2);

        store.delete_repl("alice", "repl-a").await.unwrap();
        assert!(store.is_consistent());
        assert_eq!(store.user_repls("alice").await.unwrap(), vec!["repl-b"]);
    }

    #[tokio::test]
    async fn activation_tuple_stays_in_sync() {
        let store = MemoryStore::new();
        store.create_repl(&repl("repl-a", "alice")).await.unwrap();

        store.set_active("repl-a", true).await.unwrap();
        assert!(store.is_active("repl-a").await.unwrap());
        assert!(store.get_repl("repl-a").await.unwrap().unwrap().is_active);
        assert!(store.is_consistent());

        store.set_active("repl-a", false).await.unwrap();
        assert!(!store.is_active("repl-a").await.unwrap());
        assert!(store.is_consistent());
    }
}
