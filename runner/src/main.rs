use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod fsops;
mod proxy;
mod pty;
mod rpc;
mod shutdown;
mod state;
mod ws;

use shutdown::{IdleShutdown, ShutdownCallback};
use state::RunnerState;

#[derive(Parser, Debug)]
#[command(name = "codepod-runner")]
#[command(about = "Per-repl runtime: editor channel, terminals, user-app proxy")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "RUNNER_PORT", default_value = "8081")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "RUNNER_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Workspace root served to the editor
    #[arg(long, env = "WORKSPACE_ROOT", default_value = "/workspaces")]
    workspace_root: PathBuf,

    /// Identity of the repl this runtime serves
    #[arg(long, env = "REPL_ID", default_value = "")]
    repl_id: String,

    /// Base URL of the control plane, used for idle self-shutdown
    #[arg(long, env = "CONTROL_PLANE_URL", default_value = "http://localhost:8080")]
    control_plane_url: String,

    /// Seconds of inactivity before self-shutdown
    #[arg(long, env = "IDLE_SHUTDOWN_SECS", default_value = "240")]
    idle_shutdown_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, env = "RUNNER_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "codepod_runner=debug,tower_http=debug"
    } else {
        "codepod_runner=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !cli.workspace_root.is_dir() {
        anyhow::bail!(
            "workspace root does not exist: {}",
            cli.workspace_root.display()
        );
    }
    if cli.repl_id.is_empty() {
        warn!("REPL_ID is not set; idle shutdown will be a no-op upstream");
    }

    let callback = shutdown_callback(cli.control_plane_url.clone());
    let idle = IdleShutdown::new(
        cli.repl_id.clone(),
        Duration::from_secs(cli.idle_shutdown_secs),
        callback,
    );
    let state = RunnerState::new(cli.workspace_root.clone(), idle);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/api/v1/repl/ws", get(ws::ws_handler))
        .route("/user-app/{port}", any(proxy::user_app_proxy_root))
        .route("/user-app/{port}/{*rest}", any(proxy::user_app_proxy))
        .nest("/api/v1/rpc", rpc::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!(%addr, workspace = %cli.workspace_root.display(), "starting runner");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    state.pty.cleanup();
    Ok(())
}

/// GET /ping readiness probe. The body is the literal JSON string plus a
/// trailing newline; the control plane matches it byte-for-byte.
async fn ping() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], "\"pong\"\n")
}

/// Ask the control plane to deactivate this repl.
fn shutdown_callback(control_plane_url: String) -> ShutdownCallback {
    let base = control_plane_url.trim_end_matches('/').to_string();
    Arc::new(move |repl_id: String| {
        let url = format!("{base}/api/runner/{repl_id}");
        Box::pin(async move {
            let response = reqwest::Client::new().delete(&url).send().await?;
            if !response.status().is_success() {
                anyhow::bail!("control plane returned {}", response.status());
            }
            info!(%url, "requested self-shutdown");
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_body_matches_probe_expectation() {
        let response = ping().await.into_response();
        let body = axum::body::to_bytes(response.into_body(), 64).await.unwrap();
        assert_eq!(&body[..], b"\"pong\"\n");
    }
}
