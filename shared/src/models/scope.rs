//! Scope hierarchy models and the scope resolver
//!
//! Stock is tracked at three granularities: company-wide, per farm and per
//! chicken house. A chicken house always belongs to exactly one farm.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Level of the location hierarchy a balance is kept at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    Company,
    Farm,
    ChickenHouse,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Company => "company",
            ScopeKind::Farm => "farm",
            ScopeKind::ChickenHouse => "chicken_house",
        }
    }
}

impl std::fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeKind::Company => write!(f, "Company"),
            ScopeKind::Farm => write!(f, "Farm"),
            ScopeKind::ChickenHouse => write!(f, "Chicken House"),
        }
    }
}

impl std::str::FromStr for ScopeKind {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "company" => Ok(ScopeKind::Company),
            "farm" => Ok(ScopeKind::Farm),
            "chicken_house" => Ok(ScopeKind::ChickenHouse),
            other => Err(ScopeError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors raised while building a scope from loose identifiers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("unknown scope kind '{0}'")]
    UnknownKind(String),

    #[error("farm scope requires a farm")]
    MissingFarm,

    #[error("chicken house scope requires a chicken house")]
    MissingChickenHouse,

    #[error("chicken house {0} has no farm")]
    OrphanChickenHouse(Uuid),
}

/// Identity of one balance row: the scope tuple without the product.
///
/// Only the constructors below can build a `Scope`, so the identifiers always
/// match the kind (company carries none, farm carries a farm, chicken house
/// carries both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    kind: ScopeKind,
    farm_id: Option<Uuid>,
    chicken_house_id: Option<Uuid>,
}

impl Scope {
    pub fn company() -> Self {
        Self {
            kind: ScopeKind::Company,
            farm_id: None,
            chicken_house_id: None,
        }
    }

    pub fn farm(farm_id: Uuid) -> Self {
        Self {
            kind: ScopeKind::Farm,
            farm_id: Some(farm_id),
            chicken_house_id: None,
        }
    }

    pub fn chicken_house(farm_id: Uuid, chicken_house_id: Uuid) -> Self {
        Self {
            kind: ScopeKind::ChickenHouse,
            farm_id: Some(farm_id),
            chicken_house_id: Some(chicken_house_id),
        }
    }

    /// Build a scope from its stored columns.
    ///
    /// Identifiers that do not apply to the kind are dropped, the same way a
    /// company balance never keeps a farm.
    pub fn from_parts(
        kind: ScopeKind,
        farm_id: Option<Uuid>,
        chicken_house_id: Option<Uuid>,
    ) -> Result<Self, ScopeError> {
        match kind {
            ScopeKind::Company => Ok(Self::company()),
            ScopeKind::Farm => farm_id.map(Self::farm).ok_or(ScopeError::MissingFarm),
            ScopeKind::ChickenHouse => {
                let chicken_house_id = chicken_house_id.ok_or(ScopeError::MissingChickenHouse)?;
                let farm_id = farm_id.ok_or(ScopeError::OrphanChickenHouse(chicken_house_id))?;
                Ok(Self::chicken_house(farm_id, chicken_house_id))
            }
        }
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn farm_id(&self) -> Option<Uuid> {
        self.farm_id
    }

    pub fn chicken_house_id(&self) -> Option<Uuid> {
        self.chicken_house_id
    }

    /// Position in the global balance lock order: narrowest scope first,
    /// matching the order a consumption chain is walked in.
    pub fn lock_key(&self) -> (u8, Option<Uuid>, Option<Uuid>) {
        let rank = match self.kind {
            ScopeKind::ChickenHouse => 0,
            ScopeKind::Farm => 1,
            ScopeKind::Company => 2,
        };
        (rank, self.farm_id, self.chicken_house_id)
    }

    /// Human readable label used in exports
    pub fn label(&self) -> String {
        match (self.kind, self.farm_id, self.chicken_house_id) {
            (ScopeKind::ChickenHouse, _, Some(house)) => format!("Chicken House · {}", house),
            (ScopeKind::Farm, Some(farm), _) => format!("Farm · {}", farm),
            _ => "Company".to_string(),
        }
    }
}

impl Serialize for Scope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ScopeTarget::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        ScopeTarget::deserialize(deserializer)?
            .resolve()
            .map_err(serde::de::Error::custom)
    }
}

/// Loose scope selection as submitted by a form: a kind plus whichever
/// identifiers the operator filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTarget {
    pub scope: ScopeKind,
    #[serde(default)]
    pub farm_id: Option<Uuid>,
    #[serde(default)]
    pub chicken_house_id: Option<Uuid>,
}

impl ScopeTarget {
    pub fn resolve(&self) -> Result<Scope, ScopeError> {
        Scope::from_parts(self.scope, self.farm_id, self.chicken_house_id)
    }
}

impl From<Scope> for ScopeTarget {
    fn from(scope: Scope) -> Self {
        Self {
            scope: scope.kind,
            farm_id: scope.farm_id,
            chicken_house_id: scope.chicken_house_id,
        }
    }
}

/// Physical place where consumption happens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Location {
    Company,
    Farm { farm_id: Uuid },
    ChickenHouse { farm_id: Uuid, chicken_house_id: Uuid },
}

impl Location {
    /// Build a location from optional identifiers (a room may not be assigned
    /// to a chicken house). A chicken house without its farm is rejected.
    pub fn from_ids(
        farm_id: Option<Uuid>,
        chicken_house_id: Option<Uuid>,
    ) -> Result<Self, ScopeError> {
        match (farm_id, chicken_house_id) {
            (Some(farm_id), Some(chicken_house_id)) => Ok(Location::ChickenHouse {
                farm_id,
                chicken_house_id,
            }),
            (None, Some(chicken_house_id)) => Err(ScopeError::OrphanChickenHouse(chicken_house_id)),
            (Some(farm_id), None) => Ok(Location::Farm { farm_id }),
            (None, None) => Ok(Location::Company),
        }
    }

    pub fn farm_id(&self) -> Option<Uuid> {
        match self {
            Location::Company => None,
            Location::Farm { farm_id } | Location::ChickenHouse { farm_id, .. } => Some(*farm_id),
        }
    }

    pub fn chicken_house_id(&self) -> Option<Uuid> {
        match self {
            Location::ChickenHouse {
                chicken_house_id, ..
            } => Some(*chicken_house_id),
            _ => None,
        }
    }

    /// Ordered fallback chain, most specific first, always ending at company.
    pub fn scope_chain(&self) -> Vec<Scope> {
        resolve_scope_chain(self.farm_id(), self.chicken_house_id())
    }

    /// The narrowest scope that applies to this location
    pub fn most_specific_scope(&self) -> Scope {
        match *self {
            Location::Company => Scope::company(),
            Location::Farm { farm_id } => Scope::farm(farm_id),
            Location::ChickenHouse {
                farm_id,
                chicken_house_id,
            } => Scope::chicken_house(farm_id, chicken_house_id),
        }
    }
}

/// Enumerate the scopes to consult for a location, narrowest first.
///
/// Levels that do not apply are omitted. A chicken house without a farm can
/// only be consulted at company level, since its farm tuple is unknown.
pub fn resolve_scope_chain(farm_id: Option<Uuid>, chicken_house_id: Option<Uuid>) -> Vec<Scope> {
    let mut chain = Vec::with_capacity(3);
    if let Some(farm_id) = farm_id {
        if let Some(chicken_house_id) = chicken_house_id {
            chain.push(Scope::chicken_house(farm_id, chicken_house_id));
        }
        chain.push(Scope::farm(farm_id));
    }
    chain.push(Scope::company());
    chain
}
