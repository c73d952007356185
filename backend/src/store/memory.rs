//! In-memory ledger store
//!
//! Used for development without a database and by the test suite. A
//! transaction holds the store mutex for its whole lifetime and works on a
//! copy of the state, so transactions are serialized and a dropped
//! transaction leaves no trace.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use shared::{Balance, EntryReference, LedgerEntry, NewLedgerEntry, Scope};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{BalanceFilter, EntryFilter, LedgerStore, LedgerTransaction};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    balances: BTreeMap<(Uuid, Scope), Balance>,
    entries: Vec<LedgerEntry>,
    next_sequence: i64,
}

/// Ledger store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn list_balances(&self, filter: &BalanceFilter) -> AppResult<Vec<Balance>> {
        let state = self.state.lock().await;
        Ok(state
            .balances
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect())
    }

    async fn list_entries(&self, filter: &EntryFilter) -> AppResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut entries: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.effective_date
                .cmp(&a.effective_date)
                .then(b.sequence.cmp(&a.sequence))
        });
        if let Some(limit) = filter.limit {
            entries.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        }
        Ok(entries)
    }

    async fn scope_entries(&self, product_id: Uuid, scope: &Scope) -> AppResult<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.product_id == product_id && e.scope == *scope)
            .cloned()
            .collect())
    }

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state.entries.iter().find(|e| e.id == entry_id).cloned())
    }
}

/// Transaction over [`MemoryLedgerStore`]; changes land on commit
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait::async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn lock_balance(&mut self, product_id: Uuid, scope: &Scope) -> AppResult<Balance> {
        let balance = self
            .working
            .balances
            .entry((product_id, *scope))
            .or_insert_with(|| Balance::new(product_id, *scope));
        Ok(balance.clone())
    }

    async fn balance_keys(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<(Uuid, Scope)>> {
        let wanted = |p: &Uuid| product_id.map_or(true, |id| *p == id);
        let keys: BTreeSet<(Uuid, Scope)> = self
            .working
            .balances
            .keys()
            .copied()
            .chain(self.working.entries.iter().map(|e| (e.product_id, e.scope)))
            .filter(|(p, _)| wanted(p))
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn update_balance(&mut self, balance_id: Uuid, quantity: Decimal) -> AppResult<()> {
        let balance = self
            .working
            .balances
            .values_mut()
            .find(|b| b.id == balance_id)
            .ok_or_else(|| AppError::NotFound("Balance".to_string()))?;
        balance.quantity = quantity;
        balance.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> AppResult<LedgerEntry> {
        self.working.next_sequence += 1;
        let stored = LedgerEntry {
            id: Uuid::new_v4(),
            sequence: self.working.next_sequence,
            product_id: entry.product_id,
            kind: entry.kind,
            scope: entry.scope,
            effective_date: entry.effective_date,
            quantity_in: entry.quantity_in,
            quantity_out: entry.quantity_out,
            balance_after: entry.balance_after,
            metadata: entry.metadata,
            reference: entry.reference,
            recorded_by: entry.recorded_by,
            executed_by: entry.executed_by,
            notes: entry.notes,
            created_at: Utc::now(),
        };
        self.working.entries.push(stored.clone());
        Ok(stored)
    }

    async fn find_entry(&mut self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        Ok(self.working.entries.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn reversal_exists(&mut self, entry_id: Uuid) -> AppResult<bool> {
        Ok(self
            .working
            .entries
            .iter()
            .any(|e| e.reference == Some(EntryReference::ReversedEntry(entry_id))))
    }

    async fn entries_for_replay(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .working
            .entries
            .iter()
            .filter(|e| product_id.map_or(true, |p| e.product_id == p))
            .cloned()
            .collect();
        entries.sort_by_key(|e| (e.product_id, e.scope, e.sequence));
        Ok(entries)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::EntryKind;

    fn receipt(product_id: Uuid, scope: Scope, quantity: Decimal) -> NewLedgerEntry {
        NewLedgerEntry {
            product_id,
            kind: EntryKind::Receipt,
            scope,
            effective_date: Utc::now().date_naive(),
            quantity_in: quantity,
            quantity_out: Decimal::ZERO,
            balance_after: quantity,
            metadata: Default::default(),
            reference: None,
            recorded_by: None,
            executed_by: None,
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_persists_changes() {
        let store = MemoryLedgerStore::new();
        let product = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let balance = tx.lock_balance(product, &Scope::company()).await.unwrap();
        tx.update_balance(balance.id, Decimal::from(8)).await.unwrap();
        tx.insert_entry(receipt(product, Scope::company(), Decimal::from(8)))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let balances = store.list_balances(&BalanceFilter::default()).await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].quantity, Decimal::from(8));
        assert_eq!(
            store
                .scope_entries(product, &Scope::company())
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryLedgerStore::new();
        let product = Uuid::new_v4();

        {
            let mut tx = store.begin().await.unwrap();
            let balance = tx.lock_balance(product, &Scope::company()).await.unwrap();
            tx.update_balance(balance.id, Decimal::from(8)).await.unwrap();
            tx.insert_entry(receipt(product, Scope::company(), Decimal::from(8)))
                .await
                .unwrap();
        }

        assert!(store
            .list_balances(&BalanceFilter::default())
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list_entries(&EntryFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_lock_balance_is_get_or_create() {
        let store = MemoryLedgerStore::new();
        let product = Uuid::new_v4();
        let scope = Scope::farm(Uuid::new_v4());

        let mut tx = store.begin().await.unwrap();
        let first = tx.lock_balance(product, &scope).await.unwrap();
        let second = tx.lock_balance(product, &scope).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.quantity, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_sequences_increase_across_transactions() {
        let store = MemoryLedgerStore::new();
        let product = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        let a = tx
            .insert_entry(receipt(product, Scope::company(), Decimal::ONE))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let b = tx
            .insert_entry(receipt(product, Scope::company(), Decimal::ONE))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(b.sequence > a.sequence);
    }
}
