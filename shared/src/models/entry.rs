//! Immutable ledger entries

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntryReference, Scope};

/// Free-form metadata attached to an entry
pub type EntryMetadata = serde_json::Map<String, serde_json::Value>;

/// Metadata key marking the unmet remainder of an automatic consumption
pub const SHORTAGE_KEY: &str = "shortage";

/// What kind of movement an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Receipt,
    AutomaticConsumption,
    ManualConsumption,
    Reset,
    Adjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Receipt => "receipt",
            EntryKind::AutomaticConsumption => "automatic_consumption",
            EntryKind::ManualConsumption => "manual_consumption",
            EntryKind::Reset => "reset",
            EntryKind::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Receipt => write!(f, "Receipt"),
            EntryKind::AutomaticConsumption => write!(f, "Automatic Consumption"),
            EntryKind::ManualConsumption => write!(f, "Manual Consumption"),
            EntryKind::Reset => write!(f, "Reset"),
            EntryKind::Adjustment => write!(f, "Adjustment"),
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "receipt" => Ok(EntryKind::Receipt),
            "automatic_consumption" => Ok(EntryKind::AutomaticConsumption),
            "manual_consumption" => Ok(EntryKind::ManualConsumption),
            "reset" => Ok(EntryKind::Reset),
            "adjustment" => Ok(EntryKind::Adjustment),
            other => Err(format!("unknown entry kind '{}'", other)),
        }
    }
}

/// One recorded stock movement.
///
/// `balance_after` equals the `balance_after` of the previous entry for the
/// same product and scope (in `sequence` order) plus `net_delta()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Creation order across the whole ledger
    pub sequence: i64,
    pub product_id: Uuid,
    pub kind: EntryKind,
    #[serde(flatten)]
    pub scope: Scope,
    pub effective_date: NaiveDate,
    pub quantity_in: Decimal,
    pub quantity_out: Decimal,
    pub balance_after: Decimal,
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
    pub recorded_by: Option<Uuid>,
    pub executed_by: Option<Uuid>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn net_delta(&self) -> Decimal {
        self.quantity_in - self.quantity_out
    }

    pub fn is_shortage(&self) -> bool {
        self.metadata
            .get(SHORTAGE_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// An entry ready to be appended; the store assigns id, sequence and timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub product_id: Uuid,
    pub kind: EntryKind,
    pub scope: Scope,
    pub effective_date: NaiveDate,
    pub quantity_in: Decimal,
    pub quantity_out: Decimal,
    pub balance_after: Decimal,
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
    pub recorded_by: Option<Uuid>,
    pub executed_by: Option<Uuid>,
    pub notes: String,
}

/// Split a signed delta into the `(quantity_in, quantity_out)` pair
pub fn split_delta(delta: Decimal) -> (Decimal, Decimal) {
    if delta > Decimal::ZERO {
        (delta, Decimal::ZERO)
    } else {
        (Decimal::ZERO, -delta)
    }
}

/// Incoming, outgoing and net quantities over a set of entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MovementTotals {
    pub incoming: Decimal,
    pub outgoing: Decimal,
    pub net: Decimal,
}

impl MovementTotals {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        let (incoming, outgoing) = entries
            .into_iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(i, o), e| {
                (i + e.quantity_in, o + e.quantity_out)
            });
        Self {
            incoming,
            outgoing,
            net: incoming - outgoing,
        }
    }
}
