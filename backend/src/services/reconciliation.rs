//! Rebuilds balances from the ledger
//!
//! Replays every entry per balance tuple in creation order. Entries are never
//! rewritten; drifted `balance_after` values are only reported. Balance rows
//! that disagree with the replayed total are corrected unless running dry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use shared::{LedgerEntry, Scope};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::store::{lock_order, LedgerStore};

/// An entry whose stored `balance_after` disagrees with the replay
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDrift {
    pub entry_id: Uuid,
    pub product_id: Uuid,
    pub scope: Scope,
    pub sequence: i64,
    pub recorded: Decimal,
    pub replayed: Decimal,
}

/// A balance row that disagrees with its ledger
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceCorrection {
    pub balance_id: Uuid,
    pub product_id: Uuid,
    pub scope: Scope,
    pub recorded: Decimal,
    pub replayed: Decimal,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationReport {
    pub balances_checked: usize,
    pub entries_replayed: usize,
    pub entry_drifts: Vec<EntryDrift>,
    pub balance_corrections: Vec<BalanceCorrection>,
    /// Whether corrections were written
    pub applied: bool,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.entry_drifts.is_empty() && self.balance_corrections.is_empty()
    }
}

/// Fold entries (grouped per tuple, creation order within a group) into
/// per-tuple totals, collecting entries whose snapshot drifted.
pub fn replay_entries(entries: &[LedgerEntry]) -> (BTreeMap<(Uuid, Scope), Decimal>, Vec<EntryDrift>) {
    let mut totals: BTreeMap<(Uuid, Scope), Decimal> = BTreeMap::new();
    let mut drifts = Vec::new();

    for entry in entries {
        let running = totals.entry((entry.product_id, entry.scope)).or_default();
        *running += entry.net_delta();
        if entry.balance_after != *running {
            drifts.push(EntryDrift {
                entry_id: entry.id,
                product_id: entry.product_id,
                scope: entry.scope,
                sequence: entry.sequence,
                recorded: entry.balance_after,
                replayed: *running,
            });
        }
    }

    (totals, drifts)
}

#[derive(Clone)]
pub struct ReconciliationService {
    store: Arc<dyn LedgerStore>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Replay the ledger of one product (or all) and correct balance rows.
    ///
    /// Runs in a single transaction holding every affected balance lock,
    /// taken in the same order as any other ledger write. With
    /// `dry_run` the transaction is rolled back and the report only describes
    /// what would change.
    pub async fn rebuild(
        &self,
        product_id: Option<Uuid>,
        dry_run: bool,
    ) -> AppResult<ReconciliationReport> {
        let mut tx = self.store.begin().await?;

        // Lock every tuple in the global lock order, creating rows for tuples
        // that only have entries, then replay under those locks.
        let mut keys = tx.balance_keys(product_id).await?;
        lock_order(&mut keys);
        let mut balances = Vec::with_capacity(keys.len());
        for (product, scope) in &keys {
            balances.push(tx.lock_balance(*product, scope).await?);
        }

        // Tuples first written after the key scan are not locked; their
        // writers keep them consistent.
        let locked: BTreeSet<(Uuid, Scope)> = keys.into_iter().collect();
        let entries: Vec<LedgerEntry> = tx
            .entries_for_replay(product_id)
            .await?
            .into_iter()
            .filter(|e| locked.contains(&(e.product_id, e.scope)))
            .collect();
        let (totals, entry_drifts) = replay_entries(&entries);

        let mut balance_corrections = Vec::new();
        for balance in &balances {
            let replayed = totals
                .get(&(balance.product_id, balance.scope))
                .copied()
                .unwrap_or(Decimal::ZERO);
            if balance.quantity != replayed {
                balance_corrections.push(BalanceCorrection {
                    balance_id: balance.id,
                    product_id: balance.product_id,
                    scope: balance.scope,
                    recorded: balance.quantity,
                    replayed,
                });
            }
        }

        for drift in &entry_drifts {
            warn!(
                entry_id = %drift.entry_id,
                recorded = %drift.recorded,
                replayed = %drift.replayed,
                "Entry balance snapshot drifted from replay"
            );
        }

        let applied = !dry_run && !balance_corrections.is_empty();
        if applied {
            for correction in &balance_corrections {
                tx.update_balance(correction.balance_id, correction.replayed)
                    .await?;
                info!(
                    product_id = %correction.product_id,
                    scope = %correction.scope.label(),
                    from = %correction.recorded,
                    to = %correction.replayed,
                    "Balance corrected from ledger"
                );
            }
            tx.commit().await?;
        }

        Ok(ReconciliationReport {
            balances_checked: balances.len(),
            entries_replayed: entries.len(),
            entry_drifts,
            balance_corrections,
            applied,
        })
    }
}
