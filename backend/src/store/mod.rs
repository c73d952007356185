//! Storage for balances and ledger entries
//!
//! The ledger service only talks to storage through [`LedgerStore`] and the
//! [`LedgerTransaction`] it hands out. Reads on the store never take write
//! locks; everything that mutates goes through a transaction, which rolls
//! back when dropped without [`LedgerTransaction::commit`].
//!
//! Balance rows are always locked in [`lock_order`]: by product, then
//! narrowest scope first. A transaction locking several rows must acquire
//! them in that order.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::{Balance, EntryKind, LedgerEntry, NewLedgerEntry, Scope, ScopeKind};
use uuid::Uuid;

use crate::error::AppResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Entry point to ledger storage
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. All writes of one ledger operation share it.
    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>>;

    /// Current balances matching the filter
    async fn list_balances(&self, filter: &BalanceFilter) -> AppResult<Vec<Balance>>;

    /// Entries matching the filter, newest effective date first
    async fn list_entries(&self, filter: &EntryFilter) -> AppResult<Vec<LedgerEntry>>;

    /// Full history of one balance tuple in creation order
    async fn scope_entries(&self, product_id: Uuid, scope: &Scope) -> AppResult<Vec<LedgerEntry>>;

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>>;
}

/// One atomic unit of ledger work
#[async_trait::async_trait]
pub trait LedgerTransaction: Send {
    /// Get the balance for `(product_id, scope)`, creating it at zero if
    /// missing, and hold an exclusive lock on it until the transaction ends.
    async fn lock_balance(&mut self, product_id: Uuid, scope: &Scope) -> AppResult<Balance>;

    /// Every `(product, scope)` tuple that has a balance row or entries,
    /// optionally restricted to one product. Takes no locks.
    async fn balance_keys(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<(Uuid, Scope)>>;

    /// Persist a new quantity on a balance locked by this transaction
    async fn update_balance(&mut self, balance_id: Uuid, quantity: Decimal) -> AppResult<()>;

    /// Append an entry; the store assigns id, sequence and creation time
    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> AppResult<LedgerEntry>;

    async fn find_entry(&mut self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>>;

    /// Whether an entry referencing `entry_id` as reversed already exists
    async fn reversal_exists(&mut self, entry_id: Uuid) -> AppResult<bool>;

    /// Entries grouped by product and scope, each group in creation order
    async fn entries_for_replay(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<LedgerEntry>>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}

/// Sort and deduplicate balance tuples into lock order
pub fn lock_order(keys: &mut Vec<(Uuid, Scope)>) {
    keys.sort_by_key(|(product_id, scope)| (*product_id, scope.lock_key()));
    keys.dedup();
}

/// Filter for the balance listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BalanceFilter {
    pub product_id: Option<Uuid>,
    pub scope: Option<ScopeKind>,
    pub farm_id: Option<Uuid>,
    pub chicken_house_id: Option<Uuid>,
}

impl BalanceFilter {
    pub fn matches(&self, balance: &Balance) -> bool {
        self.product_id.map_or(true, |p| balance.product_id == p)
            && self.scope.map_or(true, |k| balance.scope.kind() == k)
            && self.farm_id.map_or(true, |f| balance.scope.farm_id() == Some(f))
            && self
                .chicken_house_id
                .map_or(true, |c| balance.scope.chicken_house_id() == Some(c))
    }
}

/// Filter for entry history.
///
/// A chicken house restricts to that chicken house; otherwise a farm
/// restricts to the farm and all of its chicken houses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryFilter {
    pub product_id: Option<Uuid>,
    pub farm_id: Option<Uuid>,
    pub chicken_house_id: Option<Uuid>,
    pub kind: Option<EntryKind>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<i64>,
}

impl EntryFilter {
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        let location_matches = match (self.chicken_house_id, self.farm_id) {
            (Some(house), _) => entry.scope.chicken_house_id() == Some(house),
            (None, Some(farm)) => entry.scope.farm_id() == Some(farm),
            (None, None) => true,
        };

        location_matches
            && self.product_id.map_or(true, |p| entry.product_id == p)
            && self.kind.map_or(true, |k| entry.kind == k)
            && self.start_date.map_or(true, |d| entry.effective_date >= d)
            && self.end_date.map_or(true, |d| entry.effective_date <= d)
    }
}
