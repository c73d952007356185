//! CSV export of movement history

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use shared::LedgerEntry;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// One CSV line per ledger entry
#[derive(Debug, Serialize)]
pub struct EntryExportRow {
    pub effective_date: NaiveDate,
    pub kind: String,
    pub scope: String,
    pub farm_id: Option<Uuid>,
    pub chicken_house_id: Option<Uuid>,
    pub product_id: Uuid,
    pub quantity_in: Decimal,
    pub quantity_out: Decimal,
    pub balance_after: Decimal,
    pub shortage: bool,
    pub reference_type: Option<&'static str>,
    pub reference_id: Option<Uuid>,
    pub notes: String,
}

impl From<&LedgerEntry> for EntryExportRow {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            effective_date: entry.effective_date,
            kind: entry.kind.to_string(),
            scope: entry.scope.label(),
            farm_id: entry.scope.farm_id(),
            chicken_house_id: entry.scope.chicken_house_id(),
            product_id: entry.product_id,
            quantity_in: entry.quantity_in,
            quantity_out: entry.quantity_out,
            balance_after: entry.balance_after,
            shortage: entry.is_shortage(),
            reference_type: entry.reference.map(|r| r.type_name()),
            reference_id: entry.reference.map(|r| r.id()),
            notes: entry.notes.clone(),
        }
    }
}

/// Render entries as CSV with a header line
pub fn entries_to_csv(entries: &[LedgerEntry]) -> AppResult<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for entry in entries {
        wtr.serialize(EntryExportRow::from(entry))
            .map_err(|e| AppError::Internal(format!("CSV serialization error: {}", e)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| AppError::Internal(format!("CSV writer error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("UTF-8 conversion error: {}", e)))
}
