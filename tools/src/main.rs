use std::net::SocketAddr;

use clap::Parser;
use codepod_proto::ReplClient;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod tools;

use tools::ReplTools;

#[derive(Parser, Debug)]
#[command(name = "codepod-tools")]
#[command(about = "MCP tool adapter for a repl runtime")]
#[command(version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "TOOLS_PORT", default_value = "8080")]
    port: u16,

    /// Address to bind to
    #[arg(short, long, env = "TOOLS_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Base URL of the runner RPC surface
    #[arg(long, env = "RUNNER_RPC_URL", default_value = "http://localhost:8081")]
    runner_url: String,

    /// Enable verbose logging
    #[arg(short, long, env = "TOOLS_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "codepod_tools=debug"
    } else {
        "codepod_tools=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = ReplClient::new(cli.runner_url.clone());
    let service = StreamableHttpService::new(
        move || Ok(ReplTools::new(client.clone())),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let app = axum::Router::new().nest_service("/mcp", service);

    let addr: SocketAddr = format!("{}:{}", cli.bind, cli.port).parse()?;
    info!(%addr, runner = %cli.runner_url, "starting tool adapter");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
