//! Actor identity passed explicitly to every ledger operation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is performing a ledger operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// Automated processes with no user behind them
    #[default]
    System,
    User(Uuid),
}

impl Actor {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Actor::System => None,
            Actor::User(id) => Some(*id),
        }
    }
}

impl From<Option<Uuid>> for Actor {
    fn from(user_id: Option<Uuid>) -> Self {
        user_id.map(Actor::User).unwrap_or(Actor::System)
    }
}
