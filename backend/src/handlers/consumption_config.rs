//! HTTP handlers for consumption configurations

use axum::{extract::State, http::StatusCode, Json};
use shared::ConsumptionConfig;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::consumption::CreateConsumptionConfigInput;
use crate::AppState;

/// List consumption configurations
pub async fn list_consumption_configs(
    State(state): State<AppState>,
    current_user: CurrentUser,
) -> AppResult<Json<Vec<ConsumptionConfig>>> {
    check_permission(&current_user.0, "inventory", "read")?;
    let configs = state.configs.list().await?;
    Ok(Json(configs))
}

/// Register which product a farm or chicken house consumes
pub async fn create_consumption_config(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateConsumptionConfigInput>,
) -> AppResult<(StatusCode, Json<ConsumptionConfig>)> {
    check_permission(&current_user.0, "inventory", "configure")?;
    let config = state
        .configs
        .create(current_user.0.actor(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}
