//! Kubernetes-backed cluster adapter.
//!
//! A repl's resources are a deployment, a service, and an ingress, all named
//! after the repl id and carrying the selector label `app=<id>`. Presence
//! and absence are converged idempotently (server-side apply, delete
//! tolerating absence) so retries after partial failures do not leak.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EphemeralContainer, Pod, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Resource};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::templates::{self, TemplateConfig};

use super::{ClusterBackend, ClusterError, ClusterResult};

const UPLOADER_NAME: &str = "s3-uploader";
const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(120);
const FIELD_MANAGER: &str = "codepod-control";

#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// Explicit kubeconfig path; in-cluster/default config when unset.
    pub kubeconfig_path: Option<String>,
    pub namespace: String,
    /// Host the shared ingress routes on (`RUNNER_CLUSTER_IP`).
    pub runner_host: String,
    pub storage_bucket: String,
    pub storage_endpoint: String,
}

pub struct KubeBackend {
    client: Client,
    config: KubeConfig,
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        ClusterError::Backend(err.to_string())
    }
}

impl KubeBackend {
    pub async fn connect(config: KubeConfig) -> ClusterResult<Self> {
        let client = match &config.kubeconfig_path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|err| ClusterError::Backend(err.to_string()))?;
                let client_config =
                    kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .map_err(|err| ClusterError::Backend(err.to_string()))?;
                Client::try_from(client_config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self { client, config })
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn ingresses(&self) -> Api<Ingress> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    /// Poll the ephemeral container's status until it terminates.
    async fn wait_for_uploader(&self, pod_name: &str) -> ClusterResult<()> {
        let pods = self.pods();
        let deadline = tokio::time::Instant::now() + SNAPSHOT_TIMEOUT;

        loop {
            tokio::time::sleep(SNAPSHOT_POLL_INTERVAL).await;

            let pod = pods.get(pod_name).await?;
            let statuses = pod
                .status
                .and_then(|status| status.ephemeral_container_statuses)
                .unwrap_or_default();

            for status in statuses {
                if status.name != UPLOADER_NAME {
                    continue;
                }
                if let Some(terminated) = status.state.and_then(|state| state.terminated) {
                    if terminated.exit_code == 0 {
                        info!(pod = pod_name, "workspace snapshot finished");
                        return Ok(());
                    }
                    return Err(ClusterError::SnapshotFailed(terminated.exit_code));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ClusterError::SnapshotTimeout);
            }
        }
    }
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn create_repl_resources(
        &self,
        owner: &str,
        id: &str,
        template: &str,
        config: &TemplateConfig,
    ) -> ClusterResult<()> {
        ensure_present(
            &self.deployments(),
            id,
            &deployment_manifest(&self.config, owner, id, template, config),
        )
        .await?;
        ensure_present(
            &self.services(),
            id,
            &service_manifest(id, template, config),
        )
        .await?;
        ensure_present(
            &self.ingresses(),
            &format!("{id}-ingress"),
            &ingress_manifest(&self.config, id, config),
        )
        .await?;

        info!(id, template, "provisioned repl resources");
        Ok(())
    }

    async fn delete_repl_resources(&self, id: &str) -> ClusterResult<()> {
        if let Err(err) = ensure_absent(&self.ingresses(), &format!("{id}-ingress")).await {
            warn!(id, %err, "failed to delete ingress");
        }
        if let Err(err) = ensure_absent(&self.services(), id).await {
            warn!(id, %err, "failed to delete service");
        }
        if let Err(err) = ensure_absent(&self.deployments(), id).await {
            warn!(id, %err, "failed to delete deployment");
        }

        info!(id, "tore down repl resources");
        Ok(())
    }

    async fn snapshot_workspace(&self, owner: &str, id: &str) -> ClusterResult<()> {
        let pods = self.pods();
        let selector = ListParams::default().labels(&format!("app={id}"));
        let pod_list = pods.list(&selector).await?;
        let mut pod = pod_list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ClusterError::PodNotFound(id.to_string()))?;
        let pod_name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| ClusterError::PodNotFound(id.to_string()))?;

        let upload_cmd = format!(
            "aws s3 cp /workspaces s3://{bucket}/repl/{owner}/{id}/ --recursive --endpoint-url {endpoint}",
            bucket = self.config.storage_bucket,
            endpoint = self.config.storage_endpoint,
        );
        let uploader: EphemeralContainer = serde_json::from_value(json!({
            "name": UPLOADER_NAME,
            "image": "amazon/aws-cli",
            "command": ["sh", "-c"],
            "args": [upload_cmd],
            "volumeMounts": [
                { "name": "workspace-vol", "mountPath": "/workspaces" }
            ],
            "env": storage_credential_env(),
        }))
        .map_err(|err| ClusterError::Backend(err.to_string()))?;

        pod.spec
            .as_mut()
            .ok_or_else(|| ClusterError::PodNotFound(id.to_string()))?
            .ephemeral_containers
            .get_or_insert_with(Vec::new)
            .push(uploader);

        let payload =
            serde_json::to_vec(&pod).map_err(|err| ClusterError::Backend(err.to_string()))?;
        pods.replace_subresource(
            "ephemeralcontainers",
            &pod_name,
            &PostParams::default(),
            payload,
        )
        .await?;
        info!(id, pod = %pod_name, "injected ephemeral uploader");

        self.wait_for_uploader(&pod_name).await
    }
}

/// Converge a resource to present via server-side apply: creating when
/// absent, updating in place on conflict instead of leaking.
async fn ensure_present<K>(api: &Api<K>, name: &str, manifest: &Value) -> ClusterResult<()>
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(manifest)).await?;
    Ok(())
}

/// Converge a resource to absent; a missing resource already satisfies the
/// goal.
async fn ensure_absent<K>(api: &Api<K>, name: &str) -> ClusterResult<()>
where
    K: Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn storage_credential_env() -> Value {
    json!([
        {
            "name": "AWS_ACCESS_KEY_ID",
            "valueFrom": {
                "secretKeyRef": { "name": "aws-creds", "key": "access_key" }
            }
        },
        {
            "name": "AWS_SECRET_ACCESS_KEY",
            "valueFrom": {
                "secretKeyRef": { "name": "aws-creds", "key": "secret_key" }
            }
        }
    ])
}

fn deployment_manifest(
    cluster: &KubeConfig,
    owner: &str,
    id: &str,
    template: &str,
    config: &TemplateConfig,
) -> Value {
    let labels = json!({ "app": id, "template": template });
    let download_cmd = format!(
        "aws s3 cp s3://{bucket}/repl/{owner}/{id}/ /workspaces --recursive --endpoint-url {endpoint}",
        bucket = cluster.storage_bucket,
        endpoint = cluster.storage_endpoint,
    );

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": id, "labels": labels },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "volumes": [
                        { "name": "workspace-vol", "emptyDir": {} }
                    ],
                    "initContainers": [{
                        "name": "s3-downloader",
                        "image": "amazon/aws-cli",
                        "command": ["sh", "-c"],
                        "args": [download_cmd],
                        "volumeMounts": [
                            { "name": "workspace-vol", "mountPath": "/workspaces" }
                        ],
                        "env": storage_credential_env(),
                    }],
                    "containers": [{
                        "name": "runner",
                        "image": templates::runner_image(template),
                        "imagePullPolicy": "Always",
                        "env": [
                            { "name": "REPL_ID", "value": id },
                            { "name": "TEMPLATE", "value": template }
                        ],
                        "volumeMounts": [
                            { "name": "workspace-vol", "mountPath": "/workspaces" }
                        ],
                        "ports": [
                            { "containerPort": config.port }
                        ],
                        "resources": {
                            "requests": { "cpu": "250m", "memory": "512Mi" },
                            "limits": { "cpu": "750m", "memory": "1Gi" }
                        }
                    }]
                }
            }
        }
    })
}

fn service_manifest(id: &str, template: &str, config: &TemplateConfig) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": id },
        "spec": {
            "selector": { "app": id, "template": template },
            "ports": [
                { "port": config.port, "targetPort": config.port }
            ],
            "type": "ClusterIP"
        }
    })
}

fn ingress_manifest(cluster: &KubeConfig, id: &str, config: &TemplateConfig) -> Value {
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": {
            "name": format!("{id}-ingress"),
            "annotations": {
                "nginx.ingress.kubernetes.io/use-regex": "true",
                "nginx.ingress.kubernetes.io/rewrite-target": "/$1",
                "nginx.ingress.kubernetes.io/websocket-services": id,
                "nginx.ingress.kubernetes.io/ssl-redirect": "false",
                "nginx.ingress.kubernetes.io/proxy-read-timeout": "3600",
                "nginx.ingress.kubernetes.io/proxy-send-timeout": "3600"
            }
        },
        "spec": {
            "ingressClassName": "nginx",
            "tls": [{
                "hosts": [cluster.runner_host],
                "secretName": "tls-secret"
            }],
            "rules": [{
                "host": cluster.runner_host,
                "http": {
                    "paths": [{
                        "path": format!("/{id}/(.*)"),
                        "pathType": "ImplementationSpecific",
                        "backend": {
                            "service": {
                                "name": id,
                                "port": { "number": config.port }
                            }
                        }
                    }]
                }
            }]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_config() -> KubeConfig {
        KubeConfig {
            kubeconfig_path: None,
            namespace: "default".to_string(),
            runner_host: "runner.example.com".to_string(),
            storage_bucket: "codepod".to_string(),
            storage_endpoint: "https://blr1.digitaloceanspaces.com".to_string(),
        }
    }

    fn template_config() -> TemplateConfig {
        TemplateConfig {
            base_image: "node:20-slim",
            port: 8081,
        }
    }

    #[test]
    fn deployment_manifest_parses_and_carries_the_contract() {
        let manifest =
            deployment_manifest(&cluster_config(), "alice", "repl-1", "node", &template_config());

        let typed: Deployment = serde_json::from_value(manifest).unwrap();
        assert_eq!(typed.metadata.name.as_deref(), Some("repl-1"));
        let spec = typed.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(
            pod_spec.init_containers.as_ref().unwrap()[0].name,
            "s3-downloader"
        );
        let runner = &pod_spec.containers[0];
        assert_eq!(runner.image.as_deref(), Some("runner-node:latest"));
        let env = runner.env.as_ref().unwrap();
        assert!(env.iter().any(|var| var.name == "REPL_ID"));
        assert!(env.iter().any(|var| var.name == "TEMPLATE"));
        assert_eq!(
            pod_spec.volumes.as_ref().unwrap()[0].name,
            "workspace-vol"
        );
    }

    #[test]
    fn service_manifest_targets_template_port() {
        let manifest = service_manifest("repl-1", "node", &template_config());
        let typed: Service = serde_json::from_value(manifest).unwrap();
        assert_eq!(typed.metadata.name.as_deref(), Some("repl-1"));
        let spec = typed.spec.unwrap();
        assert_eq!(spec.ports.as_ref().unwrap()[0].port, 8081);
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn ingress_manifest_rewrites_repl_path() {
        let manifest = ingress_manifest(&cluster_config(), "repl-1", &template_config());
        let typed: Ingress = serde_json::from_value(manifest.clone()).unwrap();
        assert_eq!(typed.metadata.name.as_deref(), Some("repl-1-ingress"));
        let rule = &typed.spec.unwrap().rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("runner.example.com"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/repl-1/(.*)"));

        let annotations = &manifest["metadata"]["annotations"];
        assert_eq!(
            annotations["nginx.ingress.kubernetes.io/rewrite-target"],
            "/$1"
        );
        assert_eq!(
            annotations["nginx.ingress.kubernetes.io/websocket-services"],
            "repl-1"
        );
        assert_eq!(
            annotations["nginx.ingress.kubernetes.io/proxy-read-timeout"],
            "3600"
        );
    }
}
