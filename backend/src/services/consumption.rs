//! Consumption trigger for production records and the consumption
//! configuration registry it resolves products from

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use shared::{
    resolve_consumed_product, validate_quantity_precision, Actor, ConsumptionConfig,
    ConsumptionTarget, EntryMetadata, EntryReference, LedgerEntry, Location,
};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use super::ledger::{AdjustmentInput, CascadeConsumptionInput, LedgerService};
use crate::error::{AppError, AppResult};

/// Notes on entries written by the trigger
pub const AUTOMATIC_NOTES: &str = "Consumption recorded automatically";

/// Input for registering a consumption configuration
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateConsumptionConfigInput {
    #[serde(flatten)]
    pub target: ConsumptionTarget,
    pub product_id: Uuid,
    pub start_date: NaiveDate,
    #[validate(length(max = 255))]
    pub notes: Option<String>,
}

/// Where consumption configurations come from
#[async_trait::async_trait]
pub trait ConsumptionConfigSource: Send + Sync {
    /// Configurations that may apply to a location (its farm and chicken house)
    async fn configs_for(&self, location: &Location) -> AppResult<Vec<ConsumptionConfig>>;

    async fn list(&self) -> AppResult<Vec<ConsumptionConfig>>;

    async fn create(
        &self,
        actor: Actor,
        input: CreateConsumptionConfigInput,
    ) -> AppResult<ConsumptionConfig>;
}

fn applies_to(config: &ConsumptionConfig, location: &Location) -> bool {
    match config.target {
        ConsumptionTarget::Farm { farm_id } => location.farm_id() == Some(farm_id),
        ConsumptionTarget::ChickenHouse {
            chicken_house_id, ..
        } => location.chicken_house_id() == Some(chicken_house_id),
    }
}

/// Configurations held in memory, for development and tests
#[derive(Default)]
pub struct StaticConsumptionConfigs {
    configs: RwLock<Vec<ConsumptionConfig>>,
}

impl StaticConsumptionConfigs {
    pub fn new(configs: Vec<ConsumptionConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
        }
    }
}

#[async_trait::async_trait]
impl ConsumptionConfigSource for StaticConsumptionConfigs {
    async fn configs_for(&self, location: &Location) -> AppResult<Vec<ConsumptionConfig>> {
        let configs = self.configs.read().await;
        Ok(configs
            .iter()
            .filter(|c| applies_to(c, location))
            .cloned()
            .collect())
    }

    async fn list(&self) -> AppResult<Vec<ConsumptionConfig>> {
        Ok(self.configs.read().await.clone())
    }

    async fn create(
        &self,
        actor: Actor,
        input: CreateConsumptionConfigInput,
    ) -> AppResult<ConsumptionConfig> {
        input.validate()?;
        let config = ConsumptionConfig {
            id: Uuid::new_v4(),
            target: input.target,
            product_id: input.product_id,
            start_date: input.start_date,
            notes: input.notes.unwrap_or_default(),
            created_by: actor.user_id(),
            created_at: Utc::now(),
        };
        self.configs.write().await.push(config.clone());
        Ok(config)
    }
}

/// Configurations stored in `product_consumption_configs`
#[derive(Clone)]
pub struct PgConsumptionConfigs {
    db: PgPool,
}

impl PgConsumptionConfigs {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Row for configuration queries
#[derive(Debug, FromRow)]
struct ConfigRow {
    id: Uuid,
    scope: String,
    farm_id: Uuid,
    chicken_house_id: Option<Uuid>,
    product_id: Uuid,
    start_date: NaiveDate,
    notes: String,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for ConsumptionConfig {
    type Error = AppError;

    fn try_from(row: ConfigRow) -> Result<Self, Self::Error> {
        let target = match (row.scope.as_str(), row.chicken_house_id) {
            ("farm", _) => ConsumptionTarget::Farm {
                farm_id: row.farm_id,
            },
            ("chicken_house", Some(chicken_house_id)) => ConsumptionTarget::ChickenHouse {
                farm_id: row.farm_id,
                chicken_house_id,
            },
            (other, _) => {
                return Err(AppError::Internal(format!(
                    "invalid consumption config scope '{}'",
                    other
                )))
            }
        };

        Ok(ConsumptionConfig {
            id: row.id,
            target,
            product_id: row.product_id,
            start_date: row.start_date,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[async_trait::async_trait]
impl ConsumptionConfigSource for PgConsumptionConfigs {
    async fn configs_for(&self, location: &Location) -> AppResult<Vec<ConsumptionConfig>> {
        let Some(farm_id) = location.farm_id() else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query_as::<_, ConfigRow>(
            r#"
            SELECT id, scope, farm_id, chicken_house_id, product_id, start_date, notes,
                   created_by, created_at
            FROM product_consumption_configs
            WHERE (scope = 'farm' AND farm_id = $1)
               OR (scope = 'chicken_house' AND chicken_house_id = $2)
            ORDER BY start_date DESC, created_at DESC
            "#,
        )
        .bind(farm_id)
        .bind(location.chicken_house_id())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ConsumptionConfig::try_from).collect()
    }

    async fn list(&self) -> AppResult<Vec<ConsumptionConfig>> {
        let rows = sqlx::query_as::<_, ConfigRow>(
            r#"
            SELECT id, scope, farm_id, chicken_house_id, product_id, start_date, notes,
                   created_by, created_at
            FROM product_consumption_configs
            ORDER BY farm_id, chicken_house_id NULLS FIRST, start_date DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ConsumptionConfig::try_from).collect()
    }

    async fn create(
        &self,
        actor: Actor,
        input: CreateConsumptionConfigInput,
    ) -> AppResult<ConsumptionConfig> {
        input.validate()?;
        let scope = match input.target {
            ConsumptionTarget::Farm { .. } => "farm",
            ConsumptionTarget::ChickenHouse { .. } => "chicken_house",
        };

        let row = sqlx::query_as::<_, ConfigRow>(
            r#"
            INSERT INTO product_consumption_configs (
                id, scope, farm_id, chicken_house_id, product_id, start_date, notes, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, scope, farm_id, chicken_house_id, product_id, start_date, notes,
                      created_by, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(scope)
        .bind(input.target.farm_id())
        .bind(input.target.chicken_house_id())
        .bind(input.product_id)
        .bind(input.start_date)
        .bind(input.notes.unwrap_or_default())
        .bind(actor.user_id())
        .fetch_one(&self.db)
        .await?;

        ConsumptionConfig::try_from(row)
    }
}

/// A production room record's reported consumption moved from `previous`
/// to `current`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductionConsumptionChange {
    pub record_id: Uuid,
    pub production_record_id: Uuid,
    pub room_id: Uuid,
    pub bird_batch_id: Option<Uuid>,
    pub location: Location,
    pub production_date: NaiveDate,
    #[serde(default)]
    pub previous: Decimal,
    #[serde(default)]
    pub current: Decimal,
}

impl ProductionConsumptionChange {
    /// The same record, removed: its consumption drops to zero
    pub fn deleted(self) -> Self {
        Self {
            current: Decimal::ZERO,
            ..self
        }
    }

    pub fn delta(&self) -> Decimal {
        self.current - self.previous
    }

    fn metadata(&self) -> EntryMetadata {
        let mut metadata = EntryMetadata::new();
        metadata.insert(
            "production_record_id".into(),
            json!(self.production_record_id.to_string()),
        );
        metadata.insert("room_id".into(), json!(self.room_id.to_string()));
        metadata.insert(
            "bird_batch_id".into(),
            json!(self.bird_batch_id.map(|id| id.to_string())),
        );
        metadata.insert("previous_consumption".into(), json!(self.previous.to_string()));
        metadata.insert("current_consumption".into(), json!(self.current.to_string()));
        metadata
    }
}

/// Turns production record changes into ledger movements
#[derive(Clone)]
pub struct ConsumptionTrigger {
    ledger: LedgerService,
    configs: Arc<dyn ConsumptionConfigSource>,
}

impl ConsumptionTrigger {
    pub fn new(ledger: LedgerService, configs: Arc<dyn ConsumptionConfigSource>) -> Self {
        Self { ledger, configs }
    }

    /// Product consumed at a location on a date, if one is configured
    pub async fn resolve_product(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> AppResult<Option<Uuid>> {
        let configs = self.configs.configs_for(location).await?;
        Ok(resolve_consumed_product(&configs, location, date))
    }

    /// React to a change in a record's reported consumption.
    ///
    /// More consumption cascades through the room's scope chain. Less
    /// consumption is given back to the room's narrowest scope. Locations
    /// without a configured product are not ledgered.
    pub async fn on_consumption_changed(
        &self,
        actor: Actor,
        change: ProductionConsumptionChange,
    ) -> AppResult<Vec<LedgerEntry>> {
        for (field, value) in [("previous", change.previous), ("current", change.current)] {
            if value < Decimal::ZERO {
                return Err(AppError::invalid_quantity(field, "Consumption cannot be negative"));
            }
            validate_quantity_precision(value).map_err(|m| AppError::invalid_quantity(field, m))?;
        }

        let delta = change.delta();
        if delta.is_zero() {
            debug!(record_id = %change.record_id, "Consumption unchanged");
            return Ok(Vec::new());
        }

        let Some(product_id) = self
            .resolve_product(&change.location, change.production_date)
            .await?
        else {
            debug!(
                record_id = %change.record_id,
                "No consumption configuration for location, nothing recorded"
            );
            return Ok(Vec::new());
        };

        let metadata = change.metadata();
        let reference = Some(EntryReference::ProductionRoomRecord(change.record_id));

        let entries = if delta > Decimal::ZERO {
            self.ledger
                .consume_across_scopes(
                    actor,
                    CascadeConsumptionInput {
                        product_id,
                        location: change.location,
                        quantity: delta,
                        effective_date: change.production_date,
                        notes: Some(AUTOMATIC_NOTES.to_string()),
                        metadata,
                        reference,
                    },
                )
                .await?
        } else {
            self.ledger
                .register_adjustment(
                    actor,
                    AdjustmentInput {
                        product_id,
                        location: change.location,
                        delta: -delta,
                        effective_date: change.production_date,
                        notes: None,
                        metadata,
                        reference,
                    },
                )
                .await?
                .into_iter()
                .collect()
        };

        info!(
            record_id = %change.record_id,
            product_id = %product_id,
            delta = %delta,
            entries = entries.len(),
            "Production consumption change ledgered"
        );
        Ok(entries)
    }

    /// A deleted record gives back everything it had consumed
    pub async fn on_record_deleted(
        &self,
        actor: Actor,
        change: ProductionConsumptionChange,
    ) -> AppResult<Vec<LedgerEntry>> {
        self.on_consumption_changed(actor, change.deleted()).await
    }
}
