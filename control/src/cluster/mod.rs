//! Cluster capability: repl resource provisioning and snapshot-on-shutdown.

mod kube;

pub use kube::{KubeBackend, KubeConfig};

use async_trait::async_trait;
use thiserror::Error;

use crate::templates::TemplateConfig;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no pod found for repl {0}")]
    PodNotFound(String),

    #[error("snapshot container failed with exit code {0}")]
    SnapshotFailed(i32),

    #[error("timed out waiting for snapshot to complete")]
    SnapshotTimeout,

    #[error("cluster backend error: {0}")]
    Backend(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Converge the repl's workload, service and ingress to present.
    async fn create_repl_resources(
        &self,
        owner: &str,
        id: &str,
        template: &str,
        config: &TemplateConfig,
    ) -> ClusterResult<()>;

    /// Converge the repl's resources to absent. Individual failures are
    /// logged; the remaining resources are still removed.
    async fn delete_repl_resources(&self, id: &str) -> ClusterResult<()>;

    /// Snapshot `/workspaces` back to object storage by attaching an
    /// ephemeral uploader to the live pod and waiting for it to terminate.
    async fn snapshot_workspace(&self, owner: &str, id: &str) -> ClusterResult<()>;
}
