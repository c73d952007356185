//! Back-references from ledger entries to the records that caused them

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The external record a movement originates from.
///
/// Stored as a `(reference_type, reference_id)` pair; only the kinds listed
/// here can be attached to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntryReference {
    /// Goods reception from the purchasing workflow
    Receipt(Uuid),
    /// A production room record whose reported consumption changed
    ProductionRoomRecord(Uuid),
    /// An operator form submission (manual consumption, physical count)
    Manual(Uuid),
    /// A ledger entry being corrected by this one
    ReversedEntry(Uuid),
}

impl EntryReference {
    pub fn type_name(&self) -> &'static str {
        match self {
            EntryReference::Receipt(_) => "receipt",
            EntryReference::ProductionRoomRecord(_) => "production_room_record",
            EntryReference::Manual(_) => "manual",
            EntryReference::ReversedEntry(_) => "reversed_entry",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            EntryReference::Receipt(id)
            | EntryReference::ProductionRoomRecord(id)
            | EntryReference::Manual(id)
            | EntryReference::ReversedEntry(id) => *id,
        }
    }

    /// Rebuild a reference from its stored columns. Unknown type names yield `None`.
    pub fn from_parts(type_name: &str, id: Uuid) -> Option<Self> {
        match type_name {
            "receipt" => Some(EntryReference::Receipt(id)),
            "production_room_record" => Some(EntryReference::ProductionRoomRecord(id)),
            "manual" => Some(EntryReference::Manual(id)),
            "reversed_entry" => Some(EntryReference::ReversedEntry(id)),
            _ => None,
        }
    }
}
