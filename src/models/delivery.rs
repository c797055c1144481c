use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Scheduled,
    InProgress,
    Completed,
}

/// One physical vehicle run. Trips point at it through `Trip::delivery_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Delivery {
    pub id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_user_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn status(&self) -> DeliveryStatus {
        match (self.start_timestamp, self.end_timestamp) {
            (_, Some(_)) => DeliveryStatus::Completed,
            (Some(_), None) => DeliveryStatus::InProgress,
            (None, None) => DeliveryStatus::Scheduled,
        }
    }
}
