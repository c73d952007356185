//! Consumption trigger tests
//!
//! Production record changes turned into ledger movements:
//! - Increases cascade through the room's scope chain
//! - Decreases and deletions give stock back to the narrowest scope
//! - Locations without a configured product are not ledgered

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use farm_inventory::error::AppError;
use farm_inventory::services::consumption::{
    ConsumptionTrigger, ProductionConsumptionChange, StaticConsumptionConfigs, AUTOMATIC_NOTES,
};
use farm_inventory::services::ledger::{LedgerService, ReceiptInput};
use farm_inventory::store::{BalanceFilter, MemoryLedgerStore};
use rust_decimal::Decimal;
use shared::{
    Actor, ConsumptionConfig, ConsumptionTarget, EntryKind, EntryReference, Location, Scope,
};
use uuid::Uuid;

struct Fixture {
    ledger: LedgerService,
    trigger: ConsumptionTrigger,
    farm_id: Uuid,
    chicken_house_id: Uuid,
    feed: Uuid,
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn config(target: ConsumptionTarget, product_id: Uuid, start_date: NaiveDate) -> ConsumptionConfig {
    ConsumptionConfig {
        id: Uuid::new_v4(),
        target,
        product_id,
        start_date,
        notes: String::new(),
        created_by: None,
        created_at: Utc::now(),
    }
}

fn fixture() -> Fixture {
    let farm_id = Uuid::new_v4();
    let chicken_house_id = Uuid::new_v4();
    let feed = Uuid::new_v4();
    let ledger = LedgerService::new(Arc::new(MemoryLedgerStore::new()));
    let configs = StaticConsumptionConfigs::new(vec![config(
        ConsumptionTarget::Farm { farm_id },
        feed,
        date(2024, 1, 1),
    )]);
    let trigger = ConsumptionTrigger::new(ledger.clone(), Arc::new(configs));

    Fixture {
        ledger,
        trigger,
        farm_id,
        chicken_house_id,
        feed,
    }
}

impl Fixture {
    fn location(&self) -> Location {
        Location::ChickenHouse {
            farm_id: self.farm_id,
            chicken_house_id: self.chicken_house_id,
        }
    }

    fn house(&self) -> Scope {
        Scope::chicken_house(self.farm_id, self.chicken_house_id)
    }

    fn change(&self, previous: i64, current: i64) -> ProductionConsumptionChange {
        ProductionConsumptionChange {
            record_id: Uuid::new_v4(),
            production_record_id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            bird_batch_id: Some(Uuid::new_v4()),
            location: self.location(),
            production_date: date(2024, 3, 15),
            previous: Decimal::from(previous),
            current: Decimal::from(current),
        }
    }

    async fn stock(&self, scope: Scope, quantity: i64) {
        self.ledger
            .register_receipt(
                Actor::System,
                ReceiptInput {
                    product_id: self.feed,
                    target: scope.into(),
                    quantity: Decimal::from(quantity),
                    effective_date: None,
                    notes: None,
                    metadata: Default::default(),
                    reference: None,
                },
            )
            .await
            .unwrap();
    }

    async fn balance(&self, scope: Scope) -> Decimal {
        self.ledger
            .balances(&BalanceFilter {
                product_id: Some(self.feed),
                ..Default::default()
            })
            .await
            .unwrap()
            .into_iter()
            .find(|b| b.scope == scope)
            .map(|b| b.quantity)
            .unwrap_or(Decimal::ZERO)
    }
}

#[tokio::test]
async fn test_increase_cascades_through_scope_chain() {
    let fx = fixture();
    fx.stock(fx.house(), 5).await;
    fx.stock(Scope::farm(fx.farm_id), 10).await;
    let change = fx.change(0, 12);
    let record_id = change.record_id;
    let production_record_id = change.production_record_id;

    let entries = fx
        .trigger
        .on_consumption_changed(Actor::System, change)
        .await
        .unwrap();

    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry.kind, EntryKind::AutomaticConsumption);
        assert_eq!(entry.product_id, fx.feed);
        assert_eq!(entry.effective_date, date(2024, 3, 15));
        assert_eq!(
            entry.reference,
            Some(EntryReference::ProductionRoomRecord(record_id))
        );
        assert_eq!(
            entry.metadata["production_record_id"],
            production_record_id.to_string()
        );
        assert!(entry.metadata.contains_key("room_id"));
        assert!(entry.metadata.contains_key("bird_batch_id"));
        assert_eq!(entry.notes, AUTOMATIC_NOTES);
    }
    assert_eq!(fx.balance(fx.house()).await, Decimal::ZERO);
    assert_eq!(fx.balance(Scope::farm(fx.farm_id)).await, Decimal::from(3));
}

#[tokio::test]
async fn test_decrease_gives_back_to_narrowest_scope() {
    let fx = fixture();

    let entries = fx
        .trigger
        .on_consumption_changed(Actor::System, fx.change(12, 5))
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, EntryKind::Adjustment);
    assert_eq!(entries[0].scope, fx.house());
    assert_eq!(entries[0].quantity_in, Decimal::from(7));
    assert_eq!(fx.balance(fx.house()).await, Decimal::from(7));
    assert_eq!(fx.balance(Scope::company()).await, Decimal::ZERO);
}

#[tokio::test]
async fn test_deleted_record_returns_its_consumption() {
    let fx = fixture();
    fx.stock(fx.house(), 20).await;
    fx.trigger
        .on_consumption_changed(Actor::System, fx.change(0, 8))
        .await
        .unwrap();
    assert_eq!(fx.balance(fx.house()).await, Decimal::from(12));

    let entries = fx
        .trigger
        .on_record_deleted(Actor::System, fx.change(8, 8))
        .await
        .unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].quantity_in, Decimal::from(8));
    assert_eq!(fx.balance(fx.house()).await, Decimal::from(20));
}

#[tokio::test]
async fn test_unchanged_consumption_is_a_no_op() {
    let fx = fixture();
    let entries = fx
        .trigger
        .on_consumption_changed(Actor::System, fx.change(6, 6))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_unconfigured_location_is_not_ledgered() {
    let fx = fixture();
    let mut change = fx.change(0, 5);
    change.location = Location::Farm {
        farm_id: Uuid::new_v4(),
    };

    let entries = fx
        .trigger
        .on_consumption_changed(Actor::System, change)
        .await
        .unwrap();

    assert!(entries.is_empty());
    assert!(fx
        .ledger
        .balances(&BalanceFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_configuration_before_start_date_does_not_apply() {
    let fx = fixture();
    let mut change = fx.change(0, 5);
    change.production_date = date(2023, 12, 31);

    let entries = fx
        .trigger
        .on_consumption_changed(Actor::System, change)
        .await
        .unwrap();

    assert!(entries.is_empty());
}

#[tokio::test]
async fn test_chicken_house_configuration_takes_priority() {
    let farm_id = Uuid::new_v4();
    let chicken_house_id = Uuid::new_v4();
    let farm_feed = Uuid::new_v4();
    let house_feed = Uuid::new_v4();
    let ledger = LedgerService::new(Arc::new(MemoryLedgerStore::new()));
    let trigger = ConsumptionTrigger::new(
        ledger,
        Arc::new(StaticConsumptionConfigs::new(vec![
            config(ConsumptionTarget::Farm { farm_id }, farm_feed, date(2024, 2, 1)),
            config(
                ConsumptionTarget::ChickenHouse {
                    farm_id,
                    chicken_house_id,
                },
                house_feed,
                date(2024, 1, 1),
            ),
        ])),
    );
    let location = Location::ChickenHouse {
        farm_id,
        chicken_house_id,
    };

    let product = trigger
        .resolve_product(&location, date(2024, 3, 1))
        .await
        .unwrap();

    assert_eq!(product, Some(house_feed));
}

#[tokio::test]
async fn test_negative_reported_consumption_rejected() {
    let fx = fixture();
    let result = fx
        .trigger
        .on_consumption_changed(Actor::System, fx.change(0, -3))
        .await;

    assert!(matches!(result, Err(AppError::InvalidQuantity { .. })));
}
