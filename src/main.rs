use anyhow::{Context, Result};
use land_registry::api::{router, AppState};
use land_registry::ingestion::fetch::SourceFetcher;
use land_registry::{init_tracing, open_store, Config, SaleStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("Starting Land Registry API server...");

    let config = Config::from_env()?;

    info!("Connecting to database...");
    let store = open_store(&config)
        .await
        .context("Failed to connect to database")?;

    let served = serve(&store, config).await;
    store.close().await;
    served
}

async fn serve(store: &SaleStore, config: Config) -> Result<()> {
    store.ensure_schema().await?;
    info!("Database connected ({} store)", store.backend_name());

    let fetcher = SourceFetcher::new(config.fetch.clone())?;
    let addr = config.bind_addr;
    let app = router(AppState::new(store.clone(), fetcher, config));

    info!("Server running on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
