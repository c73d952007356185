//! Running stock totals per product and scope

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Scope;

/// Current quantity of a product at one scope.
///
/// Exactly one balance exists per `(product_id, scope)`. The quantity may be
/// negative when a shortage or an oversold manual consumption was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub id: Uuid,
    pub product_id: Uuid,
    #[serde(flatten)]
    pub scope: Scope,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A fresh zero balance, as created on first reference
    pub fn new(product_id: Uuid, scope: Scope) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id,
            scope,
            quantity: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Quantity after applying `delta`. Does not modify the balance.
    pub fn apply_delta(&self, delta: Decimal) -> Decimal {
        self.quantity + delta
    }

    /// Stock that can be drawn by an automatic consumption (never below zero)
    pub fn available(&self) -> Decimal {
        self.quantity.max(Decimal::ZERO)
    }

    pub fn is_oversold(&self) -> bool {
        self.quantity < Decimal::ZERO
    }
}
