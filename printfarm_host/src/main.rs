use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use printfarm_host::raft::server::raft_router;
use printfarm_host::store::Store;
use printfarm_host::web::api::create_router;
use printfarm_shared::config::NodeConfig;

/// Replicated 3D-print workshop node.
#[derive(Parser, Debug)]
#[command(name = "printfarm_host", version)]
struct Args {
    /// Unique node identifier.
    #[arg(long)]
    id: String,

    /// TCP address for the consensus transport.
    #[arg(long, default_value = "127.0.0.1:7001")]
    raft_addr: String,

    /// TCP address for the HTTP API (raft port + 1000 by convention).
    #[arg(long, default_value = "127.0.0.1:8001")]
    http_addr: String,

    /// Parent directory for per-node persistence.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Declare a single-node initial cluster.
    #[arg(long)]
    bootstrap: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!("startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let config = NodeConfig {
        id: args.id,
        raft_addr: args.raft_addr,
        http_addr: args.http_addr,
        data_dir: args.data_dir,
        bootstrap: args.bootstrap,
    };

    tracing::info!("Starting printfarm workshop node");
    tracing::info!(
        "Node: {} (raft {}, http {})",
        config.id,
        config.raft_addr,
        config.http_addr
    );
    tracing::info!("Data dir: {}", config.node_dir().display());

    let store = Arc::new(Store::open(config.clone()).await?);

    let raft_listener = tokio::net::TcpListener::bind(&config.raft_addr).await?;
    let http_listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!("Raft transport listening on {}", raft_listener.local_addr()?);
    tracing::info!("HTTP API listening on http://{}", http_listener.local_addr()?);

    let raft_app = raft_router(store.raft_handle());
    let raft_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(raft_listener, raft_app).await {
            tracing::error!("raft transport server failed: {e}");
        }
    });

    let api_app = create_router(store.clone());
    axum::serve(http_listener, api_app).await?;

    raft_server.abort();
    store.shutdown().await?;
    Ok(())
}
