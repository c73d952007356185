//! Farm Inventory Ledger
//!
//! Scoped stock ledger for farm supplies: balances per company, farm and
//! chicken house, an append-only movement ledger, and automatic consumption
//! cascading from production records.

use std::{sync::Arc, time::Duration};

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod store;

pub use config::Config;

use services::{ConsumptionConfigSource, ConsumptionTrigger, LedgerService};
use store::LedgerStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub configs: Arc<dyn ConsumptionConfigSource>,
    /// Present when running against PostgreSQL; used by the health check
    pub db: Option<sqlx::PgPool>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn ledger(&self) -> LedgerService {
        LedgerService::new(self.store.clone()).with_history(
            self.config.ledger.history_limit,
            self.config.ledger.history_window_days,
        )
    }

    pub fn trigger(&self) -> ConsumptionTrigger {
        ConsumptionTrigger::new(self.ledger(), self.configs.clone())
    }
}

/// Create the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", axum::routing::get(handlers::health_check))
        .nest("/api/v1", routes::api_routes(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

/// Open the PostgreSQL pool described by the configuration
pub async fn connect_pool(config: &config::DatabaseConfig) -> Result<sqlx::PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.url)
        .await
}
