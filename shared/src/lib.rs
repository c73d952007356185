//! Shared types and models for the farm inventory ledger
//!
//! This crate holds the pure domain: scopes and their fallback chain,
//! balances, ledger entries and quantity validation. It performs no I/O and
//! is shared by the backend service and its maintenance tools.

pub mod models;
pub mod validation;

pub use models::*;
pub use validation::*;
