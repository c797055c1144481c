use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub address: String,
}

/// A catalog item as supplied by the marketplace.
///
/// `slaughterhouse_location_id` is `None` for goods that skip processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub supplier_company_id: Uuid,
    pub location_id: Uuid,
    pub slaughterhouse_location_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub plate_number: String,
    pub driver_user_ids: Vec<Uuid>,
}

impl Vehicle {
    pub fn is_driven_by(&self, user_id: Uuid) -> bool {
        self.driver_user_ids.contains(&user_id)
    }
}
