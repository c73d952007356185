//! HTTP handlers for the production record hook

use axum::{extract::State, Json};
use serde::Deserialize;
use shared::LedgerEntry;

use crate::error::AppResult;
use crate::middleware::{check_permission, CurrentUser};
use crate::services::consumption::ProductionConsumptionChange;
use crate::AppState;

/// A production record changed or was deleted
#[derive(Debug, Deserialize)]
pub struct ConsumptionChangeRequest {
    #[serde(flatten)]
    pub change: ProductionConsumptionChange,
    #[serde(default)]
    pub deleted: bool,
}

/// Ledger a change in a production record's reported consumption
pub async fn record_consumption_change(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ConsumptionChangeRequest>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    check_permission(&current_user.0, "production", "write")?;
    let trigger = state.trigger();
    let actor = current_user.0.actor();

    let entries = if request.deleted {
        trigger.on_record_deleted(actor, request.change).await?
    } else {
        trigger.on_consumption_changed(actor, request.change).await?
    };
    Ok(Json(entries))
}
