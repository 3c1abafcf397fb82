use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use codepod_control::api::{self, AppState};
use codepod_control::auth::AuthState;
use codepod_control::cluster::{ClusterBackend, KubeBackend, KubeConfig};
use codepod_control::config::Settings;
use codepod_control::repl::{ReplConfig, ReplService};
use codepod_control::storage::{ObjectStorage, S3Config, S3Storage};
use codepod_control::store::{MetadataStore, RedisStore};

#[derive(Parser, Debug)]
#[command(name = "codepod-control")]
#[command(about = "Repl lifecycle control plane")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "CONTROL_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long, env = "CONTROL_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "codepod_control=debug,tower_http=debug"
    } else {
        "codepod_control=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let store = RedisStore::connect(&settings.redis_url)
        .await
        .context("connecting to metadata store")?;

    let object_storage = S3Storage::new(S3Config {
        access_key: settings.spaces_access_key.clone(),
        secret_key: settings.spaces_secret_key.clone(),
        region: settings.spaces_region.clone(),
        bucket: settings.spaces_bucket.clone(),
        endpoint: settings.spaces_endpoint.clone(),
    });

    let cluster = KubeBackend::connect(KubeConfig {
        kubeconfig_path: settings.kube_config_path.clone(),
        namespace: "default".to_string(),
        runner_host: settings.runner_cluster_ip.clone(),
        storage_bucket: settings.spaces_bucket.clone(),
        storage_endpoint: settings.spaces_endpoint.clone(),
    })
    .await
    .context("connecting to cluster")?;

    let repls = ReplService::new(
        Arc::new(store) as Arc<dyn MetadataStore>,
        Arc::new(object_storage) as Arc<dyn ObjectStorage>,
        Arc::new(cluster) as Arc<dyn ClusterBackend>,
        ReplConfig {
            runner_base_url: settings.runner_base_url(),
            ..ReplConfig::default()
        },
    );

    let auth = AuthState::new(&settings).context("building auth state")?;
    let app = api::create_router(AppState::new(repls, auth));

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!(%addr, "starting control plane");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("binding listener")?;
    axum::serve(listener, app).await.context("serving")?;

    Ok(())
}
