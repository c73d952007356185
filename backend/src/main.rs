//! Farm Inventory Ledger - HTTP server

use std::{net::SocketAddr, sync::Arc};

use farm_inventory::{
    config::StorageBackend,
    connect_pool, create_app,
    services::{ConsumptionConfigSource, PgConsumptionConfigs, StaticConsumptionConfigs},
    store::{LedgerStore, MemoryLedgerStore, PgLedgerStore},
    AppState, Config,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farm_inventory=debug,ledger_server=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting Farm Inventory Ledger Server");
    tracing::info!("Environment: {}", config.environment);

    let state = match config.ledger.storage {
        StorageBackend::Postgres => {
            tracing::info!("Connecting to database...");
            let db_pool = connect_pool(&config.database).await?;
            tracing::info!("Database connection established");

            // Run migrations in development
            if config.environment == "development" {
                tracing::info!("Running database migrations...");
                sqlx::migrate!("./migrations").run(&db_pool).await?;
                tracing::info!("Migrations completed");
            }

            let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(db_pool.clone()));
            let configs: Arc<dyn ConsumptionConfigSource> =
                Arc::new(PgConsumptionConfigs::new(db_pool.clone()));
            AppState {
                store,
                configs,
                db: Some(db_pool),
                config: Arc::new(config.clone()),
            }
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, nothing survives a restart");
            AppState {
                store: Arc::new(MemoryLedgerStore::new()),
                configs: Arc::new(StaticConsumptionConfigs::default()),
                db: None,
                config: Arc::new(config.clone()),
            }
        }
    };

    let app = create_app(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
