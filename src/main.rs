use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kyozo::auth::{one_time, session};
use kyozo::config::{Cli, Config};
use kyozo::db;
use kyozo::state::{AppState, DbPool};

/// How often expired sessions and spent one-time tokens are swept.
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

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

    // Ensure uploads directory exists
    std::fs::create_dir_all(config.uploads_path())?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;

    if config.providers.kyozo_api_key.is_none() {
        tracing::warn!("KYOZO_API_KEY not set; /api/v1 endpoints accept any caller");
    }
    if config.storage.use_mock {
        tracing::info!("Mock storage enabled; uploads are not persisted");
    }

    let state = AppState::new(pool.clone(), config.clone())?;
    tokio::spawn(purge_loop(pool));

    let app = kyozo::app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn purge_loop(pool: DbPool) {
    let mut ticker = tokio::time::interval(PURGE_INTERVAL);
    loop {
        ticker.tick().await;
        let pool = pool.clone();
        let result = db::blocking(move || {
            let tokens = one_time::purge(&pool)?;
            let sessions = session::purge_expired(&pool)?;
            Ok((tokens, sessions))
        })
        .await;
        match result {
            Ok((tokens, sessions)) => {
                tracing::debug!(tokens, sessions, "Purged expired credentials")
            }
            Err(e) => tracing::warn!("Credential purge failed: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
