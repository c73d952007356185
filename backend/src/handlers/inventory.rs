//! HTTP handlers for inventory ledger endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{Balance, LedgerEntry};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::{check_permission, CurrentUser};
use crate::services::export::entries_to_csv;
use crate::services::ledger::{
    ManualConsumptionInput, MovementHistory, ReceiptInput, ResetInput,
};
use crate::store::{BalanceFilter, EntryFilter};
use crate::AppState;

/// Result of a movement request; zero quantities record nothing
#[derive(Debug, Serialize)]
pub struct RecordedMovement {
    pub recorded: bool,
    pub entry: Option<LedgerEntry>,
}

impl From<Option<LedgerEntry>> for RecordedMovement {
    fn from(entry: Option<LedgerEntry>) -> Self {
        Self {
            recorded: entry.is_some(),
            entry,
        }
    }
}

/// Physical count request; must be explicitly confirmed
#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    #[serde(flatten)]
    pub input: ResetInput,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReverseConsumptionRequest {
    pub notes: Option<String>,
}

/// Register received goods
pub async fn record_receipt(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiptInput>,
) -> AppResult<(StatusCode, Json<RecordedMovement>)> {
    check_permission(&current_user.0, "inventory", "write")?;
    let entry = state
        .ledger()
        .register_receipt(current_user.0.actor(), input)
        .await?;
    let status = if entry.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(entry.into())))
}

/// Register a manual consumption
pub async fn record_consumption(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ManualConsumptionInput>,
) -> AppResult<(StatusCode, Json<RecordedMovement>)> {
    check_permission(&current_user.0, "inventory", "write")?;
    let entry = state
        .ledger()
        .register_manual_consumption(current_user.0.actor(), input)
        .await?;
    let status = if entry.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(entry.into())))
}

/// Reverse a manual consumption
pub async fn reverse_consumption(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(entry_id): Path<Uuid>,
    Json(input): Json<ReverseConsumptionRequest>,
) -> AppResult<(StatusCode, Json<LedgerEntry>)> {
    check_permission(&current_user.0, "inventory", "write")?;
    let entry = state
        .ledger()
        .reverse_manual_consumption(current_user.0.actor(), entry_id, input.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Set a balance to a physical count
pub async fn reset_balance(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<ResetRequest>,
) -> AppResult<(StatusCode, Json<LedgerEntry>)> {
    check_permission(&current_user.0, "inventory", "reset")?;
    if !request.confirm {
        return Err(AppError::Validation {
            field: "confirm".to_string(),
            message: "A reset must be confirmed".to_string(),
            message_es: "El reinicio debe ser confirmado".to_string(),
        });
    }

    let mut input = request.input;
    input.metadata.insert(
        "confirmed_by".into(),
        json!(current_user.0.user_id.to_string()),
    );
    let entry = state
        .ledger()
        .reset_scope(current_user.0.actor(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// List current balances
pub async fn list_balances(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<BalanceFilter>,
) -> AppResult<Json<Vec<Balance>>> {
    check_permission(&current_user.0, "inventory", "read")?;
    let balances = state.ledger().balances(&filter).await?;
    Ok(Json(balances))
}

/// Movement history with totals
pub async fn list_entries(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<EntryFilter>,
) -> AppResult<Json<MovementHistory>> {
    check_permission(&current_user.0, "inventory", "read")?;
    let history = state.ledger().history(filter).await?;
    Ok(Json(history))
}

/// Movement history as CSV
pub async fn export_entries(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(filter): Query<EntryFilter>,
) -> AppResult<impl IntoResponse> {
    check_permission(&current_user.0, "inventory", "read")?;
    let history = state.ledger().history(filter).await?;
    let csv = entries_to_csv(&history.entries)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"inventory_movements.csv\"",
            ),
        ],
        csv,
    ))
}

/// Get one ledger entry
pub async fn get_entry(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(entry_id): Path<Uuid>,
) -> AppResult<Json<LedgerEntry>> {
    check_permission(&current_user.0, "inventory", "read")?;
    let entry = state.ledger().find_entry(entry_id).await?;
    Ok(Json(entry))
}
