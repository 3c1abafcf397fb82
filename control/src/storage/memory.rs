//! In-memory object storage for tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ObjectStorage, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Keys whose copy should fail, to exercise abort semantics.
    fail_copies: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn fail_copy_of(&self, key: &str) {
        self.fail_copies.lock().unwrap().push(key.to_string());
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn copy_prefix(&self, src: &str, dst: &str) -> StorageResult<()> {
        let snapshot: Vec<(String, Vec<u8>)> = {
            let objects = self.objects.lock().unwrap();
            objects
                .iter()
                .filter(|(key, _)| key.starts_with(src))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };
        if snapshot.is_empty() {
            return Err(StorageError::EmptyPrefix(src.to_string()));
        }

        for (key, value) in snapshot {
            if key.ends_with('/') {
                continue;
            }
            if self.fail_copies.lock().unwrap().contains(&key) {
                return Err(StorageError::Backend(format!("copy of {key} failed")));
            }
            let relative = key.strip_prefix(src).unwrap_or(&key);
            self.objects
                .lock()
                .unwrap()
                .insert(format!("{dst}{relative}"), value);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        self.objects
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_prefix_skips_folder_placeholders() {
        let storage = MemoryStorage::new();
        storage.put("templates/node/", b"");
        storage.put("templates/node/index.js", b"console.log('hi')");
        storage.put("templates/node/lib/util.js", b"x");

        storage
            .copy_prefix("templates/node/", "repl/alice/repl-1/")
            .await
            .unwrap();

        let keys = storage.keys_under("repl/alice/repl-1/");
        assert_eq!(
            keys,
            vec![
                "repl/alice/repl-1/index.js".to_string(),
                "repl/alice/repl-1/lib/util.js".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn empty_source_prefix_is_an_error() {
        let storage = MemoryStorage::new();
        let err = storage
            .copy_prefix("templates/missing/", "repl/a/b/")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::EmptyPrefix(_)));
    }

    #[tokio::test]
    async fn delete_prefix_removes_everything_under_it() {
        let storage = MemoryStorage::new();
        storage.put("repl/alice/repl-1/a.txt", b"1");
        storage.put("repl/alice/repl-1/b/c.txt", b"2");
        storage.put("repl/alice/repl-2/d.txt", b"3");

        storage.delete_prefix("repl/alice/repl-1/").await.unwrap();

        assert!(storage.keys_under("repl/alice/repl-1/").is_empty());
        assert_eq!(storage.keys_under("repl/alice/repl-2/").len(), 1);
    }
}
