//! Domain models for the farm inventory ledger

mod actor;
mod balance;
mod consumption;
mod entry;
mod reference;
mod scope;

pub use actor::*;
pub use balance::*;
pub use consumption::*;
pub use entry::*;
pub use reference::*;
pub use scope::*;
