//! Route definitions for the farm inventory ledger

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - inventory ledger
        .nest("/inventory", inventory_routes(state.clone()))
        // Protected routes - production record hook
        .nest("/production", production_routes(state.clone()))
        // Protected routes - consumption configurations
        .merge(consumption_config_routes(state))
}

/// Inventory ledger routes (protected)
fn inventory_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/receipts", post(handlers::record_receipt))
        .route("/consumptions", post(handlers::record_consumption))
        .route(
            "/consumptions/:entry_id/reverse",
            post(handlers::reverse_consumption),
        )
        .route("/resets", post(handlers::reset_balance))
        .route("/balances", get(handlers::list_balances))
        .route("/entries", get(handlers::list_entries))
        .route("/entries/export", get(handlers::export_entries))
        .route("/entries/:entry_id", get(handlers::get_entry))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Production record routes (protected)
fn production_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/consumption-changes",
            post(handlers::record_consumption_change),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Consumption configuration routes (protected)
fn consumption_config_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/consumption-configs",
            get(handlers::list_consumption_configs).post(handlers::create_consumption_config),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
