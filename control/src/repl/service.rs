//! Repl lifecycle service.
//!
//! Orchestrates metadata, object storage, and cluster resources through the
//! capability traits. Long-running steps (prefix copies, readiness probing,
//! snapshot polling) run inline in the calling task; there are no background
//! workers.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterBackend, ClusterError};
use crate::models::{validate_label, Repl};
use crate::storage::{ObjectStorage, StorageError};
use crate::store::{MetadataStore, StoreError};
use crate::templates;

/// Probe response body required before activation is reported successful.
const PONG_BODY: &str = "\"pong\"\n";

/// `repl-` plus a hyphenated uuid.
const CANONICAL_ID_LEN: usize = 5 + 36;

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("unsupported template: {0}")]
    InvalidTemplate(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("Free Account Limit Reached: at most {0} repls per account")]
    QuotaExceeded(usize),

    #[error("This Repl Id doesn't exist")]
    NotFound,

    #[error("This User doesn't have access to this Repl")]
    Forbidden,

    #[error("repl {0} is already active")]
    AlreadyActive(String),

    #[error("repl {0} is not active")]
    NotActive(String),

    #[error("runner did not become ready in time")]
    ProbeTimeout,

    #[error("template materialization failed: {0}")]
    StorageCopy(StorageError),

    #[error("workspace deletion failed: {0}")]
    StorageDelete(StorageError),

    #[error("provisioning failed: {0}")]
    Provision(ClusterError),

    #[error("teardown failed: {0}")]
    Teardown(ClusterError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub max_repls_per_owner: usize,
    /// Base URL the runner ingress is reachable on, e.g. `https://<host>`.
    pub runner_base_url: String,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            max_repls_per_owner: 2,
            runner_base_url: "https://localhost".to_string(),
            probe_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(60),
        }
    }
}

pub struct ReplService {
    store: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStorage>,
    cluster: Arc<dyn ClusterBackend>,
    http: reqwest::Client,
    config: ReplConfig,
}

impl ReplService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStorage>,
        cluster: Arc<dyn ClusterBackend>,
        config: ReplConfig,
    ) -> Self {
        Self {
            store,
            storage,
            cluster,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Create a repl: enforce the quota, materialize the template prefix,
    /// then persist the record. A failed copy writes no metadata at all.
    pub async fn create_repl(
        &self,
        caller: &str,
        name: &str,
        template: &str,
    ) -> Result<Repl, ReplError> {
        let owner = caller.to_lowercase();
        if !validate_label(&owner) {
            return Err(ReplError::InvalidId(owner));
        }

        let existing = self.store.user_repls(&owner).await?;
        if existing.len() >= self.config.max_repls_per_owner {
            return Err(ReplError::QuotaExceeded(self.config.max_repls_per_owner));
        }

        if templates::get(template).is_none() {
            return Err(ReplError::InvalidTemplate(template.to_string()));
        }

        let id = format!("repl-{}", Uuid::new_v4());

        self.storage
            .copy_prefix(
                &format!("templates/{template}/"),
                &format!("repl/{owner}/{id}/"),
            )
            .await
            .map_err(ReplError::StorageCopy)?;

        let repl = Repl {
            id: id.clone(),
            name: name.to_string(),
            user: owner,
            template: template.to_string(),
            is_active: false,
        };
        self.store.create_repl(&repl).await?;

        info!(id, template, owner = %repl.user, "created repl");
        Ok(repl)
    }

    pub async fn list_repls(&self, caller: &str) -> Result<Vec<Repl>, ReplError> {
        let owner = caller.to_lowercase();
        let ids = self.store.user_repls(&owner).await?;
        let mut repls = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_repl(&id).await? {
                Some(repl) => repls.push(repl),
                None => warn!(id, owner, "membership references missing repl record"),
            }
        }
        repls.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(repls)
    }

    /// Activate a repl: flip the activation tuple, provision the cluster
    /// resources, and wait for the runner to answer its readiness probe.
    pub async fn activate(&self, caller: &str, id: &str) -> Result<Repl, ReplError> {
        let repl = self.load_owned(caller, id).await?;

        if self.store.is_active(id).await? {
            return Err(ReplError::AlreadyActive(id.to_string()));
        }
        self.store.set_active(id, true).await?;

        let template_config = templates::get(&repl.template)
            .ok_or_else(|| ReplError::InvalidTemplate(repl.template.clone()))?;
        self.cluster
            .create_repl_resources(&repl.user, id, &repl.template, &template_config)
            .await
            .map_err(ReplError::Provision)?;

        // Resources are retained on probe timeout so the operator can
        // inspect or retry; activation itself is reported failed.
        self.probe_runner(id).await?;

        info!(id, "repl activated");
        Ok(repl)
    }

    /// Deactivate a repl: snapshot the workspace back to object storage,
    /// then free the cluster resources. Snapshot failure is reported as a
    /// warning and never blocks teardown.
    pub async fn deactivate(&self, caller: &str, id: &str) -> Result<(), ReplError> {
        let repl = self.load_owned(caller, id).await?;

        if !self.store.is_active(id).await? {
            return Err(ReplError::NotActive(id.to_string()));
        }
        self.store.set_active(id, false).await?;
        self.teardown(&repl).await?;

        info!(id, "repl deactivated");
        Ok(())
    }

    /// Delete a repl and everything it owns. An active repl is deactivated
    /// first.
    pub async fn delete(&self, caller: &str, id: &str) -> Result<(), ReplError> {
        let repl = self.load_owned(caller, id).await?;

        if self.store.is_active(id).await? {
            self.store.set_active(id, false).await?;
            self.teardown(&repl).await?;
        }

        self.storage
            .delete_prefix(&format!("repl/{}/{}/", repl.user, repl.id))
            .await
            .map_err(ReplError::StorageDelete)?;
        self.store.delete_repl(&repl.user, &repl.id).await?;

        info!(id, "repl deleted");
        Ok(())
    }

    /// Self-shutdown endpoint used by an idle runner. The caller is trusted
    /// at the network layer; the path parameter may carry a suffix after the
    /// canonical `repl-<uuid>` which is stripped for the lookup.
    pub async fn runner_shutdown(&self, raw_id: &str) -> Result<(), ReplError> {
        let id = normalize_runner_id(raw_id)?;
        let repl = self.store.get_repl(id).await?.ok_or(ReplError::NotFound)?;

        if self.store.is_active(id).await? {
            self.store.set_active(id, false).await?;
        }
        self.teardown(&repl).await?;

        info!(id, "repl shut down by its runner");
        Ok(())
    }

    async fn load_owned(&self, caller: &str, id: &str) -> Result<Repl, ReplError> {
        if !validate_label(id) {
            return Err(ReplError::InvalidId(id.to_string()));
        }
        let repl = self.store.get_repl(id).await?.ok_or(ReplError::NotFound)?;
        if repl.user != caller.to_lowercase() {
            return Err(ReplError::Forbidden);
        }
        Ok(repl)
    }

    async fn teardown(&self, repl: &Repl) -> Result<(), ReplError> {
        if let Err(err) = self.cluster.snapshot_workspace(&repl.user, &repl.id).await {
            warn!(id = %repl.id, %err, "workspace snapshot failed; continuing teardown");
        }
        self.cluster
            .delete_repl_resources(&repl.id)
            .await
            .map_err(ReplError::Teardown)
    }

    /// Poll `GET <base>/<id>/ping` until the literal pong body arrives.
    async fn probe_runner(&self, id: &str) -> Result<(), ReplError> {
        let url = format!(
            "{}/{}/ping",
            self.config.runner_base_url.trim_end_matches('/'),
            id
        );
        let deadline = Instant::now() + self.config.probe_timeout;

        loop {
            match self.http.get(&url).send().await {
                Ok(response) => match response.text().await {
                    Ok(body) if body == PONG_BODY => {
                        debug!(%url, "runner answered ping");
                        return Ok(());
                    }
                    Ok(body) => debug!(%url, %body, "unexpected ping response"),
                    Err(err) => debug!(%url, %err, "failed reading ping response"),
                },
                Err(err) => debug!(%url, %err, "ping failed"),
            }

            if Instant::now() >= deadline {
                return Err(ReplError::ProbeTimeout);
            }
            tokio::time::sleep(self.config.probe_interval).await;
        }
    }
}

/// Recover the canonical `repl-<uuid>` from a runner-supplied id that may
/// carry a suffix (the full id stays the cluster resource name).
fn normalize_runner_id(raw: &str) -> Result<&str, ReplError> {
    if !validate_label(raw) || !raw.starts_with("repl-") {
        return Err(ReplError::InvalidId(raw.to_string()));
    }
    if raw.len() > CANONICAL_ID_LEN {
        Ok(&raw[..CANONICAL_ID_LEN])
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::routing::get;
    use axum::Router;
    use std::sync::Mutex;

    use crate::cluster::ClusterResult;
    use crate::storage::MemoryStorage;
    use crate::store::MemoryStore;
    use crate::templates::TemplateConfig;

    #[derive(Default)]
    struct FakeCluster {
        created: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
        snapshots: Mutex<Vec<String>>,
        fail_snapshot: bool,
    }

    #[async_trait]
    impl ClusterBackend for FakeCluster {
        async fn create_repl_resources(
            &self,
            _owner: &str,
            id: &str,
            _template: &str,
            _config: &TemplateConfig,
        ) -> ClusterResult<()> {
            self.created.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn delete_repl_resources(&self, id: &str) -> ClusterResult<()> {
            self.deleted.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn snapshot_workspace(&self, _owner: &str, id: &str) -> ClusterResult<()> {
            if self.fail_snapshot {
                return Err(ClusterError::SnapshotTimeout);
            }
            self.snapshots.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    struct Harness {
        service: ReplService,
        store: Arc<MemoryStore>,
        storage: Arc<MemoryStorage>,
        cluster: Arc<FakeCluster>,
    }

    /// Serve `GET /{id}/ping` the way a healthy runner ingress would.
    async fn spawn_pong_server(body: &'static str) -> String {
        let app = Router::new().route(
            "/{id}/ping",
            get(move || async move {
                (
                    [(axum::http::header::CONTENT_TYPE, "application/json")],
                    body,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn harness(runner_base_url: String) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        storage.put("templates/node/index.js", b"console.log('hi')");
        storage.put("templates/node/", b"");
        storage.put("templates/python/main.py", b"print('hi')");
        let cluster = Arc::new(FakeCluster::default());
        let service = ReplService::new(
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            Arc::clone(&storage) as Arc<dyn ObjectStorage>,
            Arc::clone(&cluster) as Arc<dyn ClusterBackend>,
            ReplConfig {
                max_repls_per_owner: 2,
                runner_base_url,
                probe_interval: Duration::from_millis(10),
                probe_timeout: Duration::from_millis(500),
            },
        );
        Harness {
            service,
            store,
            storage,
            cluster,
        }
    }

    #[tokio::test]
    async fn create_materializes_template_and_record() {
        let h = harness(String::new()).await;
        let repl = h.service.create_repl("Alice", "demo", "node").await.unwrap();

        assert_eq!(repl.user, "alice");
        assert!(!repl.is_active);
        assert!(h
            .storage
            .keys_under(&format!("repl/alice/{}/", repl.id))
            .iter()
            .any(|key| key.ends_with("index.js")));
        assert_eq!(
            h.store.get_repl(&repl.id).await.unwrap().unwrap().name,
            "demo"
        );
        assert!(h.store.is_consistent());
    }

    #[tokio::test]
    async fn generated_ids_are_dns_safe() {
        let h = harness(String::new()).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();

        assert!(repl.id.len() <= 63);
        assert!(repl.id.starts_with("repl-"));
        assert!(validate_label(&repl.id));
        assert!(repl.id[5..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[tokio::test]
    async fn quota_rejects_the_third_create() {
        let h = harness(String::new()).await;
        h.service.create_repl("alice", "one", "node").await.unwrap();
        h.service.create_repl("alice", "two", "python").await.unwrap();

        let err = h.service.create_repl("alice", "three", "node").await.unwrap_err();
        assert!(matches!(err, ReplError::QuotaExceeded(2)));
        assert!(err.to_string().contains("Free Account Limit Reached"));

        // Another owner is unaffected.
        h.service.create_repl("bob", "one", "node").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_template_is_rejected_before_any_copy() {
        let h = harness(String::new()).await;
        let err = h.service.create_repl("alice", "x", "ruby").await.unwrap_err();
        assert!(matches!(err, ReplError::InvalidTemplate(_)));
        assert!(h.storage.keys_under("repl/alice/").is_empty());
    }

    #[tokio::test]
    async fn failed_copy_writes_no_metadata() {
        let h = harness(String::new()).await;
        h.storage.fail_copy_of("templates/node/index.js");

        let err = h.service.create_repl("alice", "demo", "node").await.unwrap_err();
        assert!(matches!(err, ReplError::StorageCopy(_)));
        assert!(h.store.user_repls("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn activate_provisions_probes_and_flips_the_tuple() {
        let base = spawn_pong_server("\"pong\"\n").await;
        let h = harness(base).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();

        h.service.activate("alice", &repl.id).await.unwrap();

        assert!(h.store.is_active(&repl.id).await.unwrap());
        assert!(h.store.get_repl(&repl.id).await.unwrap().unwrap().is_active);
        assert_eq!(*h.cluster.created.lock().unwrap(), vec![repl.id.clone()]);
        assert!(h.store.is_consistent());

        let err = h.service.activate("alice", &repl.id).await.unwrap_err();
        assert!(matches!(err, ReplError::AlreadyActive(_)));
    }

    #[tokio::test]
    async fn activation_fails_on_wrong_probe_body() {
        let base = spawn_pong_server("\"nope\"\n").await;
        let h = harness(base).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();

        let err = h.service.activate("alice", &repl.id).await.unwrap_err();
        assert!(matches!(err, ReplError::ProbeTimeout));
        // Resources are retained for inspection.
        assert_eq!(h.cluster.deleted.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn non_owner_is_forbidden_everywhere() {
        let h = harness(String::new()).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();

        for result in [
            h.service.activate("bob", &repl.id).await.err(),
            h.service.deactivate("bob", &repl.id).await.err(),
            h.service.delete("bob", &repl.id).await.err(),
        ] {
            let err = result.expect("non-owner access must fail");
            assert!(matches!(err, ReplError::Forbidden));
            assert_eq!(
                err.to_string(),
                "This User doesn't have access to this Repl"
            );
        }
        // No mutation happened.
        assert!(h.store.get_repl(&repl.id).await.unwrap().is_some());
        assert!(!h.store.is_active(&repl.id).await.unwrap());
    }

    #[tokio::test]
    async fn deactivate_snapshots_then_frees_resources() {
        let base = spawn_pong_server("\"pong\"\n").await;
        let h = harness(base).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();
        h.service.activate("alice", &repl.id).await.unwrap();

        h.service.deactivate("alice", &repl.id).await.unwrap();

        assert!(!h.store.is_active(&repl.id).await.unwrap());
        assert_eq!(*h.cluster.snapshots.lock().unwrap(), vec![repl.id.clone()]);
        assert_eq!(*h.cluster.deleted.lock().unwrap(), vec![repl.id.clone()]);
        assert!(h.store.is_consistent());

        let err = h.service.deactivate("alice", &repl.id).await.unwrap_err();
        assert!(matches!(err, ReplError::NotActive(_)));
    }

    #[tokio::test]
    async fn snapshot_failure_does_not_block_teardown() {
        let base = spawn_pong_server("\"pong\"\n").await;
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        storage.put("templates/node/index.js", b"console.log('hi')");
        let cluster = Arc::new(FakeCluster {
            fail_snapshot: true,
            ..Default::default()
        });
        let service = ReplService::new(
            Arc::clone(&store) as Arc<dyn MetadataStore>,
            Arc::clone(&storage) as Arc<dyn ObjectStorage>,
            Arc::clone(&cluster) as Arc<dyn ClusterBackend>,
            ReplConfig {
                max_repls_per_owner: 2,
                runner_base_url: base,
                probe_interval: Duration::from_millis(10),
                probe_timeout: Duration::from_millis(500),
            },
        );

        let repl = service.create_repl("alice", "demo", "node").await.unwrap();
        service.activate("alice", &repl.id).await.unwrap();
        service.deactivate("alice", &repl.id).await.unwrap();

        assert_eq!(*cluster.deleted.lock().unwrap(), vec![repl.id.clone()]);
        assert!(!store.is_active(&repl.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_storage_and_metadata() {
        let h = harness(String::new()).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();

        h.service.delete("alice", &repl.id).await.unwrap();

        assert!(h.store.get_repl(&repl.id).await.unwrap().is_none());
        assert!(h
            .storage
            .keys_under(&format!("repl/alice/{}/", repl.id))
            .is_empty());
        assert!(h.store.user_repls("alice").await.unwrap().is_empty());
        assert!(h.store.is_consistent());
    }

    #[tokio::test]
    async fn delete_of_active_repl_tears_down_first() {
        let base = spawn_pong_server("\"pong\"\n").await;
        let h = harness(base).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();
        h.service.activate("alice", &repl.id).await.unwrap();

        h.service.delete("alice", &repl.id).await.unwrap();

        assert_eq!(*h.cluster.deleted.lock().unwrap(), vec![repl.id.clone()]);
        assert!(h.store.get_repl(&repl.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn runner_shutdown_strips_id_suffix() {
        let base = spawn_pong_server("\"pong\"\n").await;
        let h = harness(base).await;
        let repl = h.service.create_repl("alice", "demo", "node").await.unwrap();
        h.service.activate("alice", &repl.id).await.unwrap();

        let suffixed = format!("{}-7f9b", repl.id);
        h.service.runner_shutdown(&suffixed).await.unwrap();

        assert!(!h.store.is_active(&repl.id).await.unwrap());
        assert_eq!(*h.cluster.deleted.lock().unwrap(), vec![repl.id.clone()]);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found_and_bad_ids_invalid() {
        let h = harness(String::new()).await;
        let err = h
            .service
            .activate("alice", "repl-00000000-0000-4000-8000-000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, ReplError::NotFound));

        let err = h.service.activate("alice", "Repl/../etc").await.unwrap_err();
        assert!(matches!(err, ReplError::InvalidId(_)));
    }
}
