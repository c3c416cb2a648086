use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use interior_tracker::backend::{Backend, FsBlobStore, SqliteBackend, SupabaseBackend};
use interior_tracker::config::{BackendKind, Cli, Config};
use interior_tracker::db;
use interior_tracker::routes;
use interior_tracker::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;
    let backend = build_backend(&config)?;

    let state = AppState {
        backend,
        config: config.clone(),
    };
    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_backend(config: &Config) -> anyhow::Result<Backend> {
    match config.backend.kind {
        BackendKind::Local => {
            std::fs::create_dir_all(config.blobs_path())?;

            let pool = db::create_pool(&config.db_path())?;
            db::run_migrations(&pool)?;

            let records = SqliteBackend::new(pool, config.auth.session_hours);
            let blobs = FsBlobStore::new(
                config.blobs_path(),
                &config.storage.bucket,
                &config.storage.public_base,
            );
            tracing::info!(db = %config.db_path().display(), "Using local backend");
            Ok(Backend::local(records, blobs))
        }
        BackendKind::Supabase => {
            let url = config.supabase.url.as_deref().unwrap_or_default();
            let anon_key = config.supabase.anon_key.as_deref().unwrap_or_default();
            let client = SupabaseBackend::new(url, anon_key, &config.storage.bucket)?;
            tracing::info!(url, "Using supabase backend");
            Ok(Backend::supabase(client))
        }
    }
}
