//! PostgreSQL ledger store
//!
//! Balances are created with `INSERT .. ON CONFLICT DO NOTHING` and then read
//! with `SELECT .. FOR UPDATE`, so concurrent writers on the same tuple
//! serialize on the row lock for the rest of their transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use shared::{
    Balance, EntryKind, EntryMetadata, EntryReference, LedgerEntry, NewLedgerEntry, Scope,
    ScopeKind,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{BalanceFilter, EntryFilter, LedgerStore, LedgerTransaction};
use crate::error::{AppError, AppResult};

const SINGLE_REVERSAL_INDEX: &str = "idx_inventory_entries_single_reversal";

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Row for balance queries
#[derive(Debug, FromRow)]
struct BalanceRow {
    id: Uuid,
    product_id: Uuid,
    scope: String,
    farm_id: Option<Uuid>,
    chicken_house_id: Option<Uuid>,
    quantity: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BalanceRow> for Balance {
    type Error = AppError;

    fn try_from(row: BalanceRow) -> Result<Self, Self::Error> {
        Ok(Balance {
            id: row.id,
            product_id: row.product_id,
            scope: stored_scope(&row.scope, row.farm_id, row.chicken_house_id)?,
            quantity: row.quantity,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Row for entry queries
#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    sequence: i64,
    product_id: Uuid,
    kind: String,
    scope: String,
    farm_id: Option<Uuid>,
    chicken_house_id: Option<Uuid>,
    effective_date: NaiveDate,
    quantity_in: Decimal,
    quantity_out: Decimal,
    balance_after: Decimal,
    metadata: serde_json::Value,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    recorded_by: Option<Uuid>,
    executed_by: Option<Uuid>,
    notes: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<EntryKind>()
            .map_err(AppError::Internal)?;
        let metadata: EntryMetadata = match row.metadata {
            serde_json::Value::Object(map) => map,
            _ => EntryMetadata::new(),
        };
        let reference = match (row.reference_type.as_deref(), row.reference_id) {
            (Some(type_name), Some(id)) => Some(
                EntryReference::from_parts(type_name, id).ok_or_else(|| {
                    AppError::Internal(format!("unknown reference type '{}'", type_name))
                })?,
            ),
            _ => None,
        };

        Ok(LedgerEntry {
            id: row.id,
            sequence: row.sequence,
            product_id: row.product_id,
            kind,
            scope: stored_scope(&row.scope, row.farm_id, row.chicken_house_id)?,
            effective_date: row.effective_date,
            quantity_in: row.quantity_in,
            quantity_out: row.quantity_out,
            balance_after: row.balance_after,
            metadata,
            reference,
            recorded_by: row.recorded_by,
            executed_by: row.executed_by,
            notes: row.notes,
            created_at: row.created_at,
        })
    }
}

/// Stored rows passed the table's CHECK constraints, so a failure here means
/// the schema and the code disagree.
fn stored_scope(
    kind: &str,
    farm_id: Option<Uuid>,
    chicken_house_id: Option<Uuid>,
) -> AppResult<Scope> {
    let kind = kind
        .parse::<ScopeKind>()
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Scope::from_parts(kind, farm_id, chicken_house_id).map_err(|e| AppError::Internal(e.to_string()))
}

/// A second reversal of one entry trips the unique index; report it as a
/// conflict rather than a database failure.
fn single_reversal_conflict(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db)
            if db.constraint() == Some(SINGLE_REVERSAL_INDEX) =>
        {
            AppError::Conflict {
                resource: "entry_id".to_string(),
                message: "Consumption has already been reversed".to_string(),
                message_es: "El consumo ya fue revertido".to_string(),
            }
        }
        _ => AppError::DatabaseError(err),
    }
}

fn into_entries(rows: Vec<EntryRow>) -> AppResult<Vec<LedgerEntry>> {
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTransaction>> {
        let tx = self.db.begin().await?;
        Ok(Box::new(PgLedgerTransaction { tx }))
    }

    async fn list_balances(&self, filter: &BalanceFilter) -> AppResult<Vec<Balance>> {
        let rows = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT id, product_id, scope, farm_id, chicken_house_id, quantity, created_at, updated_at
            FROM inventory_balances
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::text IS NULL OR scope = $2)
              AND ($3::uuid IS NULL OR farm_id = $3)
              AND ($4::uuid IS NULL OR chicken_house_id = $4)
            ORDER BY product_id, scope, farm_id NULLS FIRST, chicken_house_id NULLS FIRST
            "#,
        )
        .bind(filter.product_id)
        .bind(filter.scope.map(|k| k.as_str()))
        .bind(filter.farm_id)
        .bind(filter.chicken_house_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Balance::try_from).collect()
    }

    async fn list_entries(&self, filter: &EntryFilter) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                   quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                   recorded_by, executed_by, notes, created_at
            FROM inventory_entries
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR chicken_house_id = $2)
              AND ($2::uuid IS NOT NULL OR $3::uuid IS NULL OR farm_id = $3)
              AND ($4::text IS NULL OR kind = $4)
              AND ($5::date IS NULL OR effective_date >= $5)
              AND ($6::date IS NULL OR effective_date <= $6)
            ORDER BY effective_date DESC, sequence DESC
            LIMIT $7
            "#,
        )
        .bind(filter.product_id)
        .bind(filter.chicken_house_id)
        .bind(filter.farm_id)
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(filter.limit)
        .fetch_all(&self.db)
        .await?;

        into_entries(rows)
    }

    async fn scope_entries(&self, product_id: Uuid, scope: &Scope) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                   quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                   recorded_by, executed_by, notes, created_at
            FROM inventory_entries
            WHERE product_id = $1 AND scope = $2
              AND farm_id IS NOT DISTINCT FROM $3
              AND chicken_house_id IS NOT DISTINCT FROM $4
            ORDER BY sequence
            "#,
        )
        .bind(product_id)
        .bind(scope.kind().as_str())
        .bind(scope.farm_id())
        .bind(scope.chicken_house_id())
        .fetch_all(&self.db)
        .await?;

        into_entries(rows)
    }

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                   quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                   recorded_by, executed_by, notes, created_at
            FROM inventory_entries
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }
}

/// Transaction over [`PgLedgerStore`]; rolled back by sqlx when dropped
pub struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    async fn lock_balance(&mut self, product_id: Uuid, scope: &Scope) -> AppResult<Balance> {
        sqlx::query(
            r#"
            INSERT INTO inventory_balances (id, product_id, scope, farm_id, chicken_house_id, quantity)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT ON CONSTRAINT inventory_balances_scope_key DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(product_id)
        .bind(scope.kind().as_str())
        .bind(scope.farm_id())
        .bind(scope.chicken_house_id())
        .execute(&mut *self.tx)
        .await?;

        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT id, product_id, scope, farm_id, chicken_house_id, quantity, created_at, updated_at
            FROM inventory_balances
            WHERE product_id = $1 AND scope = $2
              AND farm_id IS NOT DISTINCT FROM $3
              AND chicken_house_id IS NOT DISTINCT FROM $4
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(scope.kind().as_str())
        .bind(scope.farm_id())
        .bind(scope.chicken_house_id())
        .fetch_one(&mut *self.tx)
        .await?;

        Balance::try_from(row)
    }

    async fn balance_keys(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<(Uuid, Scope)>> {
        let rows = sqlx::query_as::<_, (Uuid, String, Option<Uuid>, Option<Uuid>)>(
            r#"
            SELECT product_id, scope, farm_id, chicken_house_id
            FROM inventory_balances
            WHERE ($1::uuid IS NULL OR product_id = $1)
            UNION
            SELECT DISTINCT product_id, scope, farm_id, chicken_house_id
            FROM inventory_entries
            WHERE ($1::uuid IS NULL OR product_id = $1)
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.into_iter()
            .map(|(product_id, scope, farm_id, chicken_house_id)| {
                Ok((product_id, stored_scope(&scope, farm_id, chicken_house_id)?))
            })
            .collect()
    }

    async fn update_balance(&mut self, balance_id: Uuid, quantity: Decimal) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE inventory_balances SET quantity = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(quantity)
        .bind(balance_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Balance".to_string()));
        }

        Ok(())
    }

    async fn insert_entry(&mut self, entry: NewLedgerEntry) -> AppResult<LedgerEntry> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            INSERT INTO inventory_entries (
                id, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                recorded_by, executed_by, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                      quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                      recorded_by, executed_by, notes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.product_id)
        .bind(entry.kind.as_str())
        .bind(entry.scope.kind().as_str())
        .bind(entry.scope.farm_id())
        .bind(entry.scope.chicken_house_id())
        .bind(entry.effective_date)
        .bind(entry.quantity_in)
        .bind(entry.quantity_out)
        .bind(entry.balance_after)
        .bind(serde_json::Value::Object(entry.metadata))
        .bind(entry.reference.map(|r| r.type_name()))
        .bind(entry.reference.map(|r| r.id()))
        .bind(entry.recorded_by)
        .bind(entry.executed_by)
        .bind(&entry.notes)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(single_reversal_conflict)?;

        LedgerEntry::try_from(row)
    }

    async fn find_entry(&mut self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                   quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                   recorded_by, executed_by, notes, created_at
            FROM inventory_entries
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn reversal_exists(&mut self, entry_id: Uuid) -> AppResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM inventory_entries
                WHERE reference_type = 'reversed_entry' AND reference_id = $1
            )
            "#,
        )
        .bind(entry_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(exists)
    }

    async fn entries_for_replay(&mut self, product_id: Option<Uuid>) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT id, sequence, product_id, kind, scope, farm_id, chicken_house_id, effective_date,
                   quantity_in, quantity_out, balance_after, metadata, reference_type, reference_id,
                   recorded_by, executed_by, notes, created_at
            FROM inventory_entries
            WHERE ($1::uuid IS NULL OR product_id = $1)
            ORDER BY product_id, scope, farm_id NULLS FIRST, chicken_house_id NULLS FIRST, sequence
            "#,
        )
        .bind(product_id)
        .fetch_all(&mut *self.tx)
        .await?;

        into_entries(rows)
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
