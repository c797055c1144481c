use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline phase of a checkpoint. Serialized as its number (1-4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Arrange {
    SupplierPickup = 1,
    SlaughterhouseIntake = 2,
    SlaughterhouseDispatch = 3,
    CustomerDelivery = 4,
}

impl Arrange {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Arrange {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Arrange::SupplierPickup),
            2 => Ok(Arrange::SlaughterhouseIntake),
            3 => Ok(Arrange::SlaughterhouseDispatch),
            4 => Ok(Arrange::CustomerDelivery),
            other => Err(format!("arrange number must be 1-4, got {other}")),
        }
    }
}

impl From<Arrange> for u8 {
    fn from(arrange: Arrange) -> Self {
        arrange.number()
    }
}

impl fmt::Display for Arrange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Ordered set of item ids physically present at a checkpoint.
///
/// Two records are equal when they hold the same ids, regardless of the
/// order the ids were added in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemRecord(BTreeSet<Uuid>);

impl ItemRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item_id: Uuid) -> bool {
        self.0.insert(item_id)
    }

    pub fn contains(&self, item_id: &Uuid) -> bool {
        self.0.contains(item_id)
    }

    pub fn is_subset_of(&self, other: &ItemRecord) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn merge(&mut self, other: &ItemRecord) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Uuid> {
        self.0.iter()
    }
}

impl FromIterator<Uuid> for ItemRecord {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: Uuid,
    pub order_id: Uuid,
    pub company_id: Uuid,
    pub location_id: Uuid,
    #[serde(rename = "arrange_number")]
    pub arrange: Arrange,
    pub item_record: ItemRecord,
    pub created_at: DateTime<Utc>,
}
