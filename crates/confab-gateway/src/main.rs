use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use confab_objstore::{ObjectStore, S3Store};
use confab_store::{DocumentStore, SqliteStore};

mod app;
mod bootstrap;
mod error;
mod extract;
mod http;

#[derive(Parser)]
#[command(name = "confab-gateway", about = "Multi-tenant LLM chat backend")]
struct Cli {
    /// Path to confab.toml (defaults to ~/.confab/confab.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "confab_gateway=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = confab_core::config::ConfabConfig::load(cli.config.as_deref())?;

    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        if config.database.path != ":memory:" {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.database.path)?);
    let storage: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config.objstore));

    bootstrap::prepare(&store, &storage, &config).await?;

    let bind = config.server.bind.clone();
    let port = config.server.port;
    info!(
        auth_mode = ?config.auth.mode,
        llm_provider = %config.llm.provider,
        bucket = %config.objstore.default_bucket,
        maintenance = config.maintenance.enabled,
        "configuration loaded"
    );

    let state = Arc::new(app::AppState::new(config, store, storage));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("confab gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
