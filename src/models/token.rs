use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryLocationToken {
    pub delivery_id: Uuid,
    pub location_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub issued_by: Uuid,
}

impl DeliveryLocationToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
