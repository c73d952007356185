//! Business logic services for the farm inventory ledger

pub mod consumption;
pub mod export;
pub mod ledger;
pub mod reconciliation;

pub use consumption::{
    ConsumptionConfigSource, ConsumptionTrigger, PgConsumptionConfigs, StaticConsumptionConfigs,
};
pub use ledger::LedgerService;
pub use reconciliation::ReconciliationService;
