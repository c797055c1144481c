use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directed edge between two checkpoints of the same order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: Uuid,
    pub order_id: Uuid,
    pub start_check_id: Uuid,
    pub end_check_id: Uuid,
    pub delivery_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn touches(&self, check_id: Uuid) -> bool {
        self.start_check_id == check_id || self.end_check_id == check_id
    }

    pub fn endpoints(&self) -> [Uuid; 2] {
        [self.start_check_id, self.end_check_id]
    }
}
