//! Ledger service: the only writer of balances and ledger entries
//!
//! Every public operation runs in one store transaction. A balance row is
//! locked before it is read for a write, and an operation either commits its
//! balance updates together with their entries or leaves nothing behind.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{
    split_delta, validate_physical_count, validate_positive_quantity, validate_quantity_precision,
    Actor, Balance, EntryKind, EntryMetadata, EntryReference, LedgerEntry, Location,
    MovementTotals, NewLedgerEntry, Scope, ScopeTarget, SHORTAGE_KEY,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::{BalanceFilter, EntryFilter, LedgerStore, LedgerTransaction};

/// Notes used on a shortage entry when the caller gave none
pub const SHORTAGE_NOTES: &str = "Consumption with insufficient stock";

/// Notes used on an adjustment when the caller gave none
pub const ADJUSTMENT_NOTES: &str = "Adjustment from production record change";

const DEFAULT_HISTORY_LIMIT: i64 = 400;
const DEFAULT_HISTORY_WINDOW_DAYS: i64 = 30;

/// Input for registering received goods
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReceiptInput {
    pub product_id: Uuid,
    #[serde(flatten)]
    pub target: ScopeTarget,
    pub quantity: Decimal,
    pub effective_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
}

/// Input for an operator-recorded consumption
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManualConsumptionInput {
    pub product_id: Uuid,
    #[serde(flatten)]
    pub target: ScopeTarget,
    pub quantity: Decimal,
    pub effective_date: Option<NaiveDate>,
    /// Who physically took the stock; may differ from who records it
    pub executed_by: Option<Uuid>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
}

/// Input for a physical count
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResetInput {
    pub product_id: Uuid,
    #[serde(flatten)]
    pub target: ScopeTarget,
    /// Counted quantity the balance is set to
    pub quantity: Decimal,
    pub effective_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

/// Input for an automatic consumption drawn through the scope chain
#[derive(Debug, Clone)]
pub struct CascadeConsumptionInput {
    pub product_id: Uuid,
    pub location: Location,
    pub quantity: Decimal,
    pub effective_date: NaiveDate,
    pub notes: Option<String>,
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
}

/// Input for a signed correction on the narrowest scope of a location
#[derive(Debug, Clone)]
pub struct AdjustmentInput {
    pub product_id: Uuid,
    pub location: Location,
    /// Positive gives stock back, negative takes it
    pub delta: Decimal,
    pub effective_date: NaiveDate,
    pub notes: Option<String>,
    pub metadata: EntryMetadata,
    pub reference: Option<EntryReference>,
}

/// Page of movement history with its totals
#[derive(Debug, Clone, Serialize)]
pub struct MovementHistory {
    pub entries: Vec<LedgerEntry>,
    pub totals: MovementTotals,
}

/// One draw of a cascading consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeStep {
    /// Position in the scope chain
    pub index: usize,
    pub take: Decimal,
    pub shortage: bool,
}

/// Plan a cascading consumption over the balances of a scope chain, most
/// specific first.
///
/// Each scope gives at most its non-negative balance. Whatever is left once
/// the chain is exhausted becomes a shortage step on the last scope.
pub fn plan_cascade(balances: &[Decimal], quantity: Decimal) -> Vec<CascadeStep> {
    let mut steps = Vec::new();
    let mut remaining = quantity;

    for (index, balance) in balances.iter().enumerate() {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = shared::cascade_take(remaining, *balance);
        if take > Decimal::ZERO {
            steps.push(CascadeStep {
                index,
                take,
                shortage: false,
            });
            remaining -= take;
        }
    }

    if remaining > Decimal::ZERO && !balances.is_empty() {
        steps.push(CascadeStep {
            index: balances.len() - 1,
            take: remaining,
            shortage: true,
        });
    }

    steps
}

/// Everything about an entry except its delta and balance
#[derive(Debug, Clone)]
struct EntryDraft {
    kind: EntryKind,
    effective_date: NaiveDate,
    metadata: EntryMetadata,
    reference: Option<EntryReference>,
    recorded_by: Option<Uuid>,
    executed_by: Option<Uuid>,
    notes: String,
}

/// Apply `delta` to a balance locked by `tx` and append the entry explaining it
async fn append_movement(
    tx: &mut dyn LedgerTransaction,
    balance: &Balance,
    delta: Decimal,
    draft: EntryDraft,
) -> AppResult<LedgerEntry> {
    let balance_after = balance.apply_delta(delta);
    validate_quantity_precision(balance_after)
        .map_err(|_| AppError::invalid_quantity("quantity", "Resulting balance is out of range"))?;
    tx.update_balance(balance.id, balance_after).await?;

    let (quantity_in, quantity_out) = split_delta(delta);
    tx.insert_entry(NewLedgerEntry {
        product_id: balance.product_id,
        kind: draft.kind,
        scope: balance.scope,
        effective_date: draft.effective_date,
        quantity_in,
        quantity_out,
        balance_after,
        metadata: draft.metadata,
        reference: draft.reference,
        recorded_by: draft.recorded_by,
        executed_by: draft.executed_by,
        notes: draft.notes,
    })
    .await
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Ledger service over any [`LedgerStore`]
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    history_limit: i64,
    history_window_days: i64,
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_window_days: DEFAULT_HISTORY_WINDOW_DAYS,
        }
    }

    /// Override the history page cap and default window
    pub fn with_history(mut self, limit: i64, window_days: i64) -> Self {
        self.history_limit = limit.max(1);
        self.history_window_days = window_days.max(0);
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Register received goods on one scope.
    ///
    /// A zero quantity records nothing and returns `None`.
    pub async fn register_receipt(
        &self,
        actor: Actor,
        input: ReceiptInput,
    ) -> AppResult<Option<LedgerEntry>> {
        input.validate()?;
        if input.quantity.is_zero() {
            debug!(product_id = %input.product_id, "Zero quantity receipt ignored");
            return Ok(None);
        }
        validate_positive_quantity(input.quantity)
            .map_err(|m| AppError::invalid_quantity("quantity", m))?;
        let scope = input.target.resolve()?;

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_balance(input.product_id, &scope).await?;
        let entry = append_movement(
            tx.as_mut(),
            &balance,
            input.quantity,
            EntryDraft {
                kind: EntryKind::Receipt,
                effective_date: input.effective_date.unwrap_or_else(today),
                metadata: input.metadata,
                reference: input.reference,
                recorded_by: actor.user_id(),
                executed_by: None,
                notes: input.notes.unwrap_or_default(),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            product_id = %entry.product_id,
            scope = %scope.label(),
            delta = %input.quantity,
            balance_after = %entry.balance_after,
            "Receipt registered"
        );
        Ok(Some(entry))
    }

    /// Register a consumption on one scope. The balance may go negative.
    ///
    /// A zero quantity records nothing and returns `None`.
    pub async fn register_manual_consumption(
        &self,
        actor: Actor,
        input: ManualConsumptionInput,
    ) -> AppResult<Option<LedgerEntry>> {
        input.validate()?;
        if input.quantity.is_zero() {
            debug!(product_id = %input.product_id, "Zero quantity consumption ignored");
            return Ok(None);
        }
        validate_positive_quantity(input.quantity)
            .map_err(|m| AppError::invalid_quantity("quantity", m))?;
        let scope = input.target.resolve()?;

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_balance(input.product_id, &scope).await?;
        let entry = append_movement(
            tx.as_mut(),
            &balance,
            -input.quantity,
            EntryDraft {
                kind: EntryKind::ManualConsumption,
                effective_date: input.effective_date.unwrap_or_else(today),
                metadata: input.metadata,
                reference: input.reference,
                recorded_by: actor.user_id(),
                executed_by: input.executed_by,
                notes: input.notes.unwrap_or_default(),
            },
        )
        .await?;
        tx.commit().await?;

        if entry.balance_after < Decimal::ZERO {
            warn!(
                product_id = %entry.product_id,
                scope = %scope.label(),
                balance_after = %entry.balance_after,
                "Manual consumption left the balance oversold"
            );
        }
        info!(
            product_id = %entry.product_id,
            scope = %scope.label(),
            delta = %(-input.quantity),
            balance_after = %entry.balance_after,
            "Manual consumption registered"
        );
        Ok(Some(entry))
    }

    /// Set a scope's balance to a physical count.
    ///
    /// The count is recorded even when it matches the current balance.
    pub async fn reset_scope(&self, actor: Actor, input: ResetInput) -> AppResult<LedgerEntry> {
        input.validate()?;
        validate_physical_count(input.quantity)
            .map_err(|m| AppError::invalid_quantity("quantity", m))?;
        let scope = input.target.resolve()?;
        let effective_date = input.effective_date.unwrap_or_else(today);

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_balance(input.product_id, &scope).await?;
        let difference = input.quantity - balance.quantity;

        let mut metadata = input.metadata;
        metadata.insert("previous_balance".into(), json!(balance.quantity.to_string()));
        metadata.insert("reset_to".into(), json!(input.quantity.to_string()));
        metadata.insert("difference".into(), json!(difference.to_string()));
        metadata.insert(
            "reset_effective_date".into(),
            json!(effective_date.to_string()),
        );

        let entry = append_movement(
            tx.as_mut(),
            &balance,
            difference,
            EntryDraft {
                kind: EntryKind::Reset,
                effective_date,
                metadata,
                reference: None,
                recorded_by: actor.user_id(),
                executed_by: None,
                notes: input.notes.unwrap_or_default(),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            product_id = %entry.product_id,
            scope = %scope.label(),
            previous = %balance.quantity,
            reset_to = %entry.balance_after,
            "Balance reset to physical count"
        );
        Ok(entry)
    }

    /// Consume through the location's scope chain, narrowest scope first.
    ///
    /// Returns the entries in the order they were created. Demand that no
    /// scope can cover ends up as one shortage entry on the broadest scope,
    /// leaving it negative.
    pub async fn consume_across_scopes(
        &self,
        actor: Actor,
        input: CascadeConsumptionInput,
    ) -> AppResult<Vec<LedgerEntry>> {
        if input.quantity.is_zero() {
            debug!(product_id = %input.product_id, "Zero quantity cascade ignored");
            return Ok(Vec::new());
        }
        validate_positive_quantity(input.quantity)
            .map_err(|m| AppError::invalid_quantity("quantity", m))?;

        let chain = input.location.scope_chain();
        let mut tx = self.store.begin().await?;

        // Lock in chain order, stopping once the locked scopes can cover the demand
        let mut balances = Vec::with_capacity(chain.len());
        let mut covered = Decimal::ZERO;
        for scope in &chain {
            let balance = tx.lock_balance(input.product_id, scope).await?;
            covered += balance.available();
            balances.push(balance);
            if covered >= input.quantity {
                break;
            }
        }

        let quantities: Vec<Decimal> = balances.iter().map(|b| b.quantity).collect();
        let base = EntryDraft {
            kind: EntryKind::AutomaticConsumption,
            effective_date: input.effective_date,
            metadata: input.metadata,
            reference: input.reference,
            recorded_by: actor.user_id(),
            executed_by: None,
            notes: input.notes.unwrap_or_default(),
        };

        let mut entries = Vec::new();
        for step in plan_cascade(&quantities, input.quantity) {
            let mut draft = base.clone();
            if step.shortage {
                draft.metadata.insert(SHORTAGE_KEY.into(), json!(true));
                if draft.notes.is_empty() {
                    draft.notes = SHORTAGE_NOTES.to_string();
                }
            }

            let balance = &mut balances[step.index];
            let entry = append_movement(tx.as_mut(), balance, -step.take, draft).await?;
            balance.quantity = entry.balance_after;

            if step.shortage {
                warn!(
                    product_id = %entry.product_id,
                    scope = %entry.scope.label(),
                    shortage = %step.take,
                    "Consumption exceeded available stock"
                );
            }
            entries.push(entry);
        }
        tx.commit().await?;

        info!(
            product_id = %input.product_id,
            quantity = %input.quantity,
            entries = entries.len(),
            "Automatic consumption registered"
        );
        Ok(entries)
    }

    /// Apply a signed correction directly to the narrowest scope of a
    /// location, without cascading.
    ///
    /// A zero delta records nothing and returns `None`.
    pub async fn register_adjustment(
        &self,
        actor: Actor,
        input: AdjustmentInput,
    ) -> AppResult<Option<LedgerEntry>> {
        if input.delta.is_zero() {
            debug!(product_id = %input.product_id, "Zero adjustment ignored");
            return Ok(None);
        }
        validate_quantity_precision(input.delta)
            .map_err(|m| AppError::invalid_quantity("delta", m))?;
        let scope = input.location.most_specific_scope();

        let notes = input
            .notes
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| ADJUSTMENT_NOTES.to_string());

        let mut tx = self.store.begin().await?;
        let balance = tx.lock_balance(input.product_id, &scope).await?;
        let entry = append_movement(
            tx.as_mut(),
            &balance,
            input.delta,
            EntryDraft {
                kind: EntryKind::Adjustment,
                effective_date: input.effective_date,
                metadata: input.metadata,
                reference: input.reference,
                recorded_by: actor.user_id(),
                executed_by: None,
                notes,
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            product_id = %entry.product_id,
            scope = %scope.label(),
            delta = %input.delta,
            balance_after = %entry.balance_after,
            "Adjustment registered"
        );
        Ok(Some(entry))
    }

    /// Give back the stock taken by a manual consumption.
    ///
    /// The correction is a new adjustment entry on the same scope that
    /// references the reversed entry. Each consumption can be reversed once.
    pub async fn reverse_manual_consumption(
        &self,
        actor: Actor,
        entry_id: Uuid,
        notes: Option<String>,
    ) -> AppResult<LedgerEntry> {
        let mut tx = self.store.begin().await?;
        let original = tx
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Ledger entry".to_string()))?;

        if original.kind != EntryKind::ManualConsumption {
            return Err(AppError::Validation {
                field: "entry_id".to_string(),
                message: format!("Only manual consumptions can be reversed, got {}", original.kind),
                message_es: "Solo se pueden revertir consumos manuales".to_string(),
            });
        }
        // The balance lock serializes concurrent reversals of the same entry
        let balance = tx.lock_balance(original.product_id, &original.scope).await?;
        if tx.reversal_exists(entry_id).await? {
            return Err(AppError::Conflict {
                resource: "entry_id".to_string(),
                message: "Consumption has already been reversed".to_string(),
                message_es: "El consumo ya fue revertido".to_string(),
            });
        }

        let mut metadata = EntryMetadata::new();
        metadata.insert("reversed_entry_id".into(), json!(entry_id.to_string()));
        metadata.insert(
            "reversed_quantity".into(),
            json!(original.quantity_out.to_string()),
        );

        let entry = append_movement(
            tx.as_mut(),
            &balance,
            original.quantity_out,
            EntryDraft {
                kind: EntryKind::Adjustment,
                effective_date: today(),
                metadata,
                reference: Some(EntryReference::ReversedEntry(entry_id)),
                recorded_by: actor.user_id(),
                executed_by: None,
                notes: notes
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("Reversal of consumption {}", entry_id)),
            },
        )
        .await?;
        tx.commit().await?;

        info!(
            product_id = %entry.product_id,
            reversed = %entry_id,
            delta = %original.quantity_out,
            "Manual consumption reversed"
        );
        Ok(entry)
    }

    /// Current balances
    pub async fn balances(&self, filter: &BalanceFilter) -> AppResult<Vec<Balance>> {
        self.store.list_balances(filter).await
    }

    /// Movement history, newest first, capped at the configured limit.
    ///
    /// Without a start date the window reaches back the configured number of
    /// days from the end date (or today).
    pub async fn history(&self, filter: EntryFilter) -> AppResult<MovementHistory> {
        let mut filter = filter;
        if filter.start_date.is_none() {
            let end = filter.end_date.unwrap_or_else(today);
            filter.start_date = Some(end - Duration::days(self.history_window_days));
        }
        filter.limit = Some(
            filter
                .limit
                .map_or(self.history_limit, |l| l.clamp(1, self.history_limit)),
        );

        let entries = self.store.list_entries(&filter).await?;
        let totals = MovementTotals::from_entries(&entries);
        Ok(MovementHistory { entries, totals })
    }

    pub async fn find_entry(&self, entry_id: Uuid) -> AppResult<LedgerEntry> {
        self.store
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Ledger entry".to_string()))
    }

    /// Full history of one balance in creation order
    pub async fn scope_entries(&self, product_id: Uuid, scope: &Scope) -> AppResult<Vec<LedgerEntry>> {
        self.store.scope_entries(product_id, scope).await
    }
}
