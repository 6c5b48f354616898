use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use davfiles::{
    config::Config,
    plugins::SystemStatus,
    server::DavServer,
    services::dav::{ChunkStore, NodeContext},
    services::properties::MemoryPropertyStore,
    storage::LocalStorage,
    AppState,
};

/// WebDAV file server
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory served as the DAV root (overrides DATA_ROOT)
    #[arg(long)]
    data_root: Option<String>,

    /// Address to listen on (overrides SERVER_ADDRESS)
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,davfiles=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(data_root) = args.data_root {
        config.data_root = data_root;
    }
    if let Some(bind) = args.bind {
        config.server_address = bind;
    }

    let storage = LocalStorage::new(&config.data_root)
        .with_quota(config.quota_bytes)
        .with_max_name_length(config.max_filename_length);
    storage.initialize().await?;

    let status = Arc::new(SystemStatus::new(config.maintenance, config.upgrade_pending()));
    if status.in_maintenance() {
        warn!("Starting in maintenance mode, all DAV requests will be refused");
    }
    if status.upgrade_pending() {
        warn!(
            "Data was written by version {:?}, an upgrade is required",
            config.installed_version
        );
    }

    let chunks = Arc::new(ChunkStore::new());
    let env = NodeContext::new(
        Arc::new(storage),
        Arc::new(MemoryPropertyStore::new()),
        chunks.clone(),
    );
    let server = DavServer::with_default_plugins(env, &config, status.clone());
    info!("DAV plugins: {}", server.plugin_names().join(", "));

    // abandoned chunk uploads are dropped once they exceed the TTL
    let ttl = config.chunk_session_ttl()?;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            chunks.sweep_expired(ttl).await;
        }
    });

    let state = Arc::new(AppState {
        server: Arc::new(server),
        status,
        config: config.clone(),
    });
    let app = davfiles::routes::dav::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    info!("Server starting on {}", config.server_address);
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
