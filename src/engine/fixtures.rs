use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::models::directory::{Company, Item, Location, Vehicle};
use crate::models::order::{Order, OrderKind, OrderLine};
use crate::models::principal::Principal;
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
pub struct Supplier {
    pub company_id: Uuid,
    pub location_id: Uuid,
}

/// Broiler order from one farm with two items: chicken routed through a
/// slaughterhouse, eggs going straight to the customer.
pub struct Scenario {
    pub state: AppState,
    pub order_id: Uuid,
    pub farm_company_id: Uuid,
    pub farm_location_id: Uuid,
    pub slaughterhouse_location_id: Uuid,
    pub customer_location_id: Uuid,
    pub chicken_id: Uuid,
    pub eggs_id: Uuid,
    pub vehicle_id: Uuid,
    pub driver: Principal,
    pub dispatcher: Principal,
}

impl Scenario {
    pub fn seeded() -> Self {
        let state = AppState::new(&Config::default());

        let mut scenario = Self {
            state,
            order_id: Uuid::new_v4(),
            farm_company_id: Uuid::nil(),
            farm_location_id: Uuid::nil(),
            slaughterhouse_location_id: Uuid::nil(),
            customer_location_id: Uuid::nil(),
            chicken_id: Uuid::nil(),
            eggs_id: Uuid::nil(),
            vehicle_id: Uuid::new_v4(),
            driver: Principal::new(Uuid::new_v4()),
            dispatcher: Principal::new(Uuid::new_v4()),
        };

        let farm = scenario.add_supplier("green acres farm");
        let slaughterhouse = scenario.add_supplier("halal abattoir");
        let customer = scenario.add_supplier("corner restaurant");

        scenario.farm_company_id = farm.company_id;
        scenario.farm_location_id = farm.location_id;
        scenario.slaughterhouse_location_id = slaughterhouse.location_id;
        scenario.customer_location_id = customer.location_id;
        scenario.chicken_id =
            scenario.add_item("broiler chicken", farm, Some(slaughterhouse.location_id));
        scenario.eggs_id = scenario.add_item("eggs", farm, None);

        scenario.state.store.orders.insert(
            scenario.order_id,
            Order {
                id: scenario.order_id,
                customer_id: Uuid::new_v4(),
                kind: OrderKind::Broiler,
                delivery_location_id: customer.location_id,
                lines: vec![
                    OrderLine {
                        item_id: scenario.chicken_id,
                        quantity: 20,
                        unit_price_cents: 1_250,
                    },
                    OrderLine {
                        item_id: scenario.eggs_id,
                        quantity: 30,
                        unit_price_cents: 40,
                    },
                ],
                paid_at: None,
                order_status: "pending".to_string(),
                created_at: Utc::now(),
            },
        );

        scenario.state.store.vehicles.insert(
            scenario.vehicle_id,
            Vehicle {
                id: scenario.vehicle_id,
                plate_number: "WXY 1234".to_string(),
                driver_user_ids: vec![scenario.driver.user_id],
            },
        );

        scenario
    }

    pub fn add_supplier(&self, name: &str) -> Supplier {
        let company_id = Uuid::new_v4();
        let location_id = Uuid::new_v4();
        self.state.store.companies.insert(
            company_id,
            Company {
                id: company_id,
                name: name.to_string(),
            },
        );
        self.state.store.locations.insert(
            location_id,
            Location {
                id: location_id,
                company_id,
                name: format!("{name} site"),
                address: "1 Jalan Utama".to_string(),
            },
        );
        Supplier {
            company_id,
            location_id,
        }
    }

    pub fn add_item(&self, name: &str, supplier: Supplier, slaughterhouse: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.state.store.items.insert(
            id,
            Item {
                id,
                name: name.to_string(),
                supplier_company_id: supplier.company_id,
                location_id: supplier.location_id,
                slaughterhouse_location_id: slaughterhouse,
            },
        );
        id
    }

    pub fn add_line(&self, item_id: Uuid) {
        if let Some(mut order) = self.state.store.orders.get_mut(&self.order_id) {
            order.lines.push(OrderLine {
                item_id,
                quantity: 1,
                unit_price_cents: 100,
            });
        }
    }

    pub fn locations(&self) -> HashMap<Uuid, Location> {
        self.state
            .store
            .locations
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    pub fn scheduled_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date")
    }
}
