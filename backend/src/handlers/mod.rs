//! HTTP handlers

pub mod consumption_config;
pub mod health;
pub mod inventory;
pub mod production;

pub use consumption_config::{create_consumption_config, list_consumption_configs};
pub use health::health_check;
pub use inventory::{
    export_entries, get_entry, list_balances, list_entries, record_consumption, record_receipt,
    reset_balance, reverse_consumption,
};
pub use production::record_consumption_change;
