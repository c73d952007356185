//! Default product consumed per farm or chicken house

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Location;

/// Where a consumption configuration applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum ConsumptionTarget {
    Farm { farm_id: Uuid },
    ChickenHouse { farm_id: Uuid, chicken_house_id: Uuid },
}

impl ConsumptionTarget {
    pub fn farm_id(&self) -> Uuid {
        match self {
            ConsumptionTarget::Farm { farm_id } | ConsumptionTarget::ChickenHouse { farm_id, .. } => {
                *farm_id
            }
        }
    }

    pub fn chicken_house_id(&self) -> Option<Uuid> {
        match self {
            ConsumptionTarget::ChickenHouse {
                chicken_house_id, ..
            } => Some(*chicken_house_id),
            ConsumptionTarget::Farm { .. } => None,
        }
    }
}

/// Which product a farm or chicken house consumes from `start_date` on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionConfig {
    pub id: Uuid,
    #[serde(flatten)]
    pub target: ConsumptionTarget,
    pub product_id: Uuid,
    pub start_date: NaiveDate,
    pub notes: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Pick the product consumed at `location` on `date`.
///
/// The most recent configuration starting on or before `date` wins, and a
/// chicken house configuration always takes priority over its farm's.
pub fn resolve_consumed_product(
    configs: &[ConsumptionConfig],
    location: &Location,
    date: NaiveDate,
) -> Option<Uuid> {
    let latest = |matches: &dyn Fn(&ConsumptionTarget) -> bool| {
        configs
            .iter()
            .filter(|c| c.start_date <= date && matches(&c.target))
            .max_by_key(|c| (c.start_date, c.created_at))
            .map(|c| c.product_id)
    };

    if let Some(house) = location.chicken_house_id() {
        let found = latest(&|t: &ConsumptionTarget| t.chicken_house_id() == Some(house));
        if found.is_some() {
            return found;
        }
    }
    let farm = location.farm_id()?;
    latest(&|t: &ConsumptionTarget| matches!(t, ConsumptionTarget::Farm { farm_id } if *farm_id == farm))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn config(target: ConsumptionTarget, product_id: Uuid, start: NaiveDate) -> ConsumptionConfig {
        ConsumptionConfig {
            id: Uuid::new_v4(),
            target,
            product_id,
            start_date: start,
            notes: String::new(),
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_chicken_house_config_wins_over_farm() {
        let farm_id = Uuid::new_v4();
        let chicken_house_id = Uuid::new_v4();
        let farm_feed = Uuid::new_v4();
        let house_feed = Uuid::new_v4();
        let configs = vec![
            config(ConsumptionTarget::Farm { farm_id }, farm_feed, date(2024, 1, 1)),
            config(
                ConsumptionTarget::ChickenHouse {
                    farm_id,
                    chicken_house_id,
                },
                house_feed,
                date(2024, 3, 1),
            ),
        ];
        let location = Location::ChickenHouse {
            farm_id,
            chicken_house_id,
        };

        assert_eq!(
            resolve_consumed_product(&configs, &location, date(2024, 4, 1)),
            Some(house_feed)
        );
        // Before the chicken house configuration starts, the farm one applies
        assert_eq!(
            resolve_consumed_product(&configs, &location, date(2024, 2, 1)),
            Some(farm_feed)
        );
    }

    #[test]
    fn test_most_recent_start_date_wins() {
        let farm_id = Uuid::new_v4();
        let old_feed = Uuid::new_v4();
        let new_feed = Uuid::new_v4();
        let configs = vec![
            config(ConsumptionTarget::Farm { farm_id }, new_feed, date(2024, 6, 1)),
            config(ConsumptionTarget::Farm { farm_id }, old_feed, date(2024, 1, 1)),
        ];
        let location = Location::Farm { farm_id };

        assert_eq!(
            resolve_consumed_product(&configs, &location, date(2024, 6, 1)),
            Some(new_feed)
        );
        assert_eq!(
            resolve_consumed_product(&configs, &location, date(2024, 5, 31)),
            Some(old_feed)
        );
        assert_eq!(
            resolve_consumed_product(&configs, &location, date(2023, 12, 31)),
            None
        );
    }

    #[test]
    fn test_company_location_has_no_product() {
        let farm_id = Uuid::new_v4();
        let configs = vec![config(
            ConsumptionTarget::Farm { farm_id },
            Uuid::new_v4(),
            date(2024, 1, 1),
        )];

        assert_eq!(
            resolve_consumed_product(&configs, &Location::Company, date(2024, 2, 1)),
            None
        );
    }
}
