use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::checkpoint::Checkpoint;
use crate::models::delivery::Delivery;
use crate::models::directory::{Company, Item, Location, Vehicle};
use crate::models::order::Order;
use crate::models::token::DeliveryLocationToken;
use crate::models::trip::Trip;
use crate::models::verify::Verify;

const MAX_TOKEN_DRAWS: usize = 16;

#[derive(Debug, Clone, Default)]
struct OrderGraph {
    checkpoint_ids: Vec<Uuid>,
    trip_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub checkpoints: Vec<Checkpoint>,
    pub trips: Vec<Trip>,
}

#[derive(Debug, Clone)]
pub struct GraphCommit {
    pub graph: GraphSnapshot,
    pub created: bool,
}

/// In-memory tables for the checkpoint subsystem.
///
/// Rows that belong to a multi-row unit are inserted before the index entry
/// that makes them reachable, and every read goes through that index.
#[derive(Default)]
pub struct Store {
    pub companies: DashMap<Uuid, Company>,
    pub locations: DashMap<Uuid, Location>,
    pub items: DashMap<Uuid, Item>,
    pub vehicles: DashMap<Uuid, Vehicle>,
    pub orders: DashMap<Uuid, Order>,
    checkpoints: DashMap<Uuid, Checkpoint>,
    trips: DashMap<Uuid, Trip>,
    graphs: DashMap<Uuid, OrderGraph>,
    deliveries: DashMap<Uuid, Delivery>,
    trips_by_delivery: DashMap<Uuid, Vec<Uuid>>,
    verifies: DashMap<Uuid, Verify>,
    verify_keys: DashMap<(Uuid, Uuid), Uuid>,
    verifies_by_check: DashMap<Uuid, Vec<Uuid>>,
    tokens: DashMap<(Uuid, Uuid), DeliveryLocationToken>,
    token_index: DashMap<String, (Uuid, Uuid)>,
    assignments: RwLock<()>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_company(&self, company: Company) -> Result<Company, AppError> {
        insert_unique(&self.companies, company.id, company, "company")
    }

    pub fn insert_location(&self, location: Location) -> Result<Location, AppError> {
        insert_unique(&self.locations, location.id, location, "location")
    }

    pub fn insert_item(&self, item: Item) -> Result<Item, AppError> {
        insert_unique(&self.items, item.id, item, "item")
    }

    pub fn insert_vehicle(&self, vehicle: Vehicle) -> Result<Vehicle, AppError> {
        insert_unique(&self.vehicles, vehicle.id, vehicle, "vehicle")
    }

    pub fn insert_order(&self, order: Order) -> Result<Order, AppError> {
        insert_unique(&self.orders, order.id, order, "order")
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.orders.get(&id).map(|entry| entry.value().clone())
    }

    pub fn item(&self, id: Uuid) -> Option<Item> {
        self.items.get(&id).map(|entry| entry.value().clone())
    }

    pub fn location(&self, id: Uuid) -> Option<Location> {
        self.locations.get(&id).map(|entry| entry.value().clone())
    }

    pub fn vehicle(&self, id: Uuid) -> Option<Vehicle> {
        self.vehicles.get(&id).map(|entry| entry.value().clone())
    }

    /// Marks an order paid once. Returns the stored order.
    pub fn mark_paid(&self, order_id: Uuid, now: DateTime<Utc>) -> Result<Order, AppError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if order.paid_at.is_none() {
            order.paid_at = Some(now);
        }
        Ok(order.clone())
    }

    // -- checkpoint graph ---------------------------------------------------

    pub fn order_graph(&self, order_id: Uuid) -> Option<GraphSnapshot> {
        let graph = self.graphs.get(&order_id)?.value().clone();
        Some(self.load_graph(&graph))
    }

    /// Commits the graph produced by `plan` unless the order already has one.
    ///
    /// The order's index entry stays locked while `plan` runs, so concurrent
    /// callers for the same order wait and then observe the committed graph.
    pub fn commit_graph<F>(&self, order_id: Uuid, plan: F) -> Result<GraphCommit, AppError>
    where
        F: FnOnce() -> Result<(Vec<Checkpoint>, Vec<Trip>), AppError>,
    {
        let graph = match self.graphs.entry(order_id) {
            Entry::Occupied(existing) => {
                let graph = existing.get().clone();
                drop(existing);
                return Ok(GraphCommit {
                    graph: self.load_graph(&graph),
                    created: false,
                });
            }
            Entry::Vacant(slot) => {
                let (checkpoints, trips) = plan()?;

                let graph = OrderGraph {
                    checkpoint_ids: checkpoints.iter().map(|c| c.id).collect(),
                    trip_ids: trips.iter().map(|t| t.id).collect(),
                };
                for checkpoint in &checkpoints {
                    self.checkpoints.insert(checkpoint.id, checkpoint.clone());
                }
                for trip in &trips {
                    self.trips.insert(trip.id, trip.clone());
                }
                slot.insert(graph.clone());
                graph
            }
        };

        Ok(GraphCommit {
            graph: self.load_graph(&graph),
            created: true,
        })
    }

    fn load_graph(&self, graph: &OrderGraph) -> GraphSnapshot {
        GraphSnapshot {
            checkpoints: graph
                .checkpoint_ids
                .iter()
                .filter_map(|id| self.checkpoint(*id))
                .collect(),
            trips: graph
                .trip_ids
                .iter()
                .filter_map(|id| self.trip(*id))
                .collect(),
        }
    }

    pub fn checkpoint(&self, id: Uuid) -> Option<Checkpoint> {
        self.checkpoints.get(&id).map(|entry| entry.value().clone())
    }

    pub fn trip(&self, id: Uuid) -> Option<Trip> {
        self.trips.get(&id).map(|entry| entry.value().clone())
    }

    /// Trips of any order with at least one endpoint in `check_ids`.
    pub fn trips_touching(&self, check_ids: &BTreeSet<Uuid>) -> Vec<Trip> {
        let order_ids: BTreeSet<Uuid> = check_ids
            .iter()
            .filter_map(|id| self.checkpoint(*id).map(|c| c.order_id))
            .collect();

        order_ids
            .into_iter()
            .filter_map(|order_id| self.graphs.get(&order_id).map(|g| g.trip_ids.clone()))
            .flatten()
            .filter_map(|trip_id| self.trip(trip_id))
            .filter(|trip| check_ids.iter().any(|id| trip.touches(*id)))
            .collect()
    }

    pub fn unassigned_trips(&self) -> Vec<Trip> {
        let mut trips: Vec<Trip> = self
            .trips
            .iter()
            .filter(|entry| entry.value().delivery_id.is_none())
            .map(|entry| entry.value().clone())
            .collect();
        // Only trips of committed graphs are visible.
        trips.retain(|trip| self.graphs.contains_key(&trip.order_id));
        trips.sort_by_key(|trip| trip.created_at);
        trips
    }

    // -- deliveries ---------------------------------------------------------

    /// Exclusive section for delivery creation and trip binding.
    pub fn assignment_write(&self) -> Result<RwLockWriteGuard<'_, ()>, AppError> {
        self.assignments
            .write()
            .map_err(|_| AppError::Internal("assignment lock poisoned".to_string()))
    }

    /// Shared section for reads that must see whole assignments.
    pub fn assignment_read(&self) -> Result<RwLockReadGuard<'_, ()>, AppError> {
        self.assignments
            .read()
            .map_err(|_| AppError::Internal("assignment lock poisoned".to_string()))
    }

    pub fn insert_delivery(&self, delivery: Delivery) {
        self.trips_by_delivery.entry(delivery.id).or_default();
        self.deliveries.insert(delivery.id, delivery);
    }

    /// Binds an unassigned trip to a delivery. Already-bound trips are left as is.
    pub fn bind_trip(&self, trip_id: Uuid, delivery_id: Uuid) -> Option<Trip> {
        let bound = {
            let mut trip = self.trips.get_mut(&trip_id)?;
            if trip.delivery_id.is_some() {
                return None;
            }
            trip.delivery_id = Some(delivery_id);
            trip.clone()
        };

        self.trips_by_delivery
            .entry(delivery_id)
            .or_default()
            .push(trip_id);
        Some(bound)
    }

    pub fn delivery(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn delivery_trips(&self, delivery_id: Uuid) -> Vec<Trip> {
        let trip_ids = self
            .trips_by_delivery
            .get(&delivery_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        trip_ids
            .into_iter()
            .filter_map(|trip_id| self.trip(trip_id))
            .collect()
    }

    /// Runs `update` with the delivery row locked.
    pub fn update_delivery<T, F>(&self, delivery_id: Uuid, update: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Delivery) -> Result<T, AppError>,
    {
        let mut delivery = self
            .deliveries
            .get_mut(&delivery_id)
            .ok_or_else(|| AppError::NotFound(format!("delivery {delivery_id} not found")))?;
        update(&mut delivery)
    }

    pub fn active_deliveries(&self) -> usize {
        self.deliveries
            .iter()
            .filter(|entry| entry.value().end_timestamp.is_none())
            .count()
    }

    // -- verifications ------------------------------------------------------

    pub fn verify(&self, id: Uuid) -> Option<Verify> {
        self.verifies.get(&id).map(|entry| entry.value().clone())
    }

    pub fn verify_for(&self, delivery_id: Uuid, check_id: Uuid) -> Option<Verify> {
        let verify_id = *self.verify_keys.get(&(delivery_id, check_id))?;
        self.verify(verify_id)
    }

    /// Inserts `verify` unless its (delivery, checkpoint) pair already has a
    /// row. Returns the stored row and whether it was inserted.
    pub fn insert_verify_if_absent(&self, verify: Verify) -> (Verify, bool) {
        match self.verify_keys.entry((verify.delivery_id, verify.check_id)) {
            Entry::Occupied(existing) => {
                let verify_id = *existing.get();
                drop(existing);
                match self.verify(verify_id) {
                    Some(stored) => (stored, false),
                    None => (verify, false),
                }
            }
            Entry::Vacant(slot) => {
                self.verifies.insert(verify.id, verify.clone());
                self.verifies_by_check
                    .entry(verify.check_id)
                    .or_default()
                    .push(verify.id);
                slot.insert(verify.id);
                (verify, true)
            }
        }
    }

    /// Runs `update` with the verify row locked.
    pub fn update_verify<T, F>(&self, verify_id: Uuid, update: F) -> Result<T, AppError>
    where
        F: FnOnce(&mut Verify) -> Result<T, AppError>,
    {
        let mut verify = self
            .verifies
            .get_mut(&verify_id)
            .ok_or_else(|| AppError::NotFound(format!("verification {verify_id} not found")))?;
        update(&mut verify)
    }

    /// Every verify row, across deliveries, for the given checkpoints.
    pub fn verifies_for_checkpoints<'a, I>(&self, check_ids: I) -> Vec<Verify>
    where
        I: IntoIterator<Item = &'a Uuid>,
    {
        check_ids
            .into_iter()
            .filter_map(|check_id| self.verifies_by_check.get(check_id).map(|ids| ids.value().clone()))
            .flatten()
            .filter_map(|verify_id| self.verify(verify_id))
            .collect()
    }

    // -- tokens -------------------------------------------------------------

    pub fn token(&self, delivery_id: Uuid, location_id: Uuid) -> Option<DeliveryLocationToken> {
        self.tokens
            .get(&(delivery_id, location_id))
            .map(|entry| entry.value().clone())
    }

    /// Returns the live token for the pair or replaces it with a fresh one.
    ///
    /// The pair's entry is held for the whole check-then-insert, so the pair
    /// never has more than one row. `draw` yields candidate token strings;
    /// candidates already present in the global index are discarded.
    pub fn live_token_or_issue<F>(
        &self,
        delivery_id: Uuid,
        location_id: Uuid,
        issued_by: Uuid,
        now: DateTime<Utc>,
        ttl: Duration,
        mut draw: F,
    ) -> Result<(DeliveryLocationToken, bool), AppError>
    where
        F: FnMut() -> String,
    {
        let key = (delivery_id, location_id);
        let entry = self.tokens.entry(key);

        if let Entry::Occupied(existing) = &entry {
            if existing.get().is_valid_at(now) {
                return Ok((existing.get().clone(), false));
            }
        }

        let token = self.reserve_token(key, &mut draw)?;
        let issued = DeliveryLocationToken {
            delivery_id,
            location_id,
            token,
            expires_at: now + ttl,
            issued_by,
        };

        match entry {
            Entry::Occupied(mut expired) => {
                let previous = expired.insert(issued.clone());
                self.token_index.remove(&previous.token);
            }
            Entry::Vacant(slot) => {
                slot.insert(issued.clone());
            }
        }

        Ok((issued, true))
    }

    fn reserve_token<F>(&self, key: (Uuid, Uuid), draw: &mut F) -> Result<String, AppError>
    where
        F: FnMut() -> String,
    {
        for _ in 0..MAX_TOKEN_DRAWS {
            let candidate = draw();
            if let Entry::Vacant(slot) = self.token_index.entry(candidate.clone()) {
                slot.insert(key);
                return Ok(candidate);
            }
        }

        Err(AppError::Internal(format!(
            "no unique token after {MAX_TOKEN_DRAWS} draws"
        )))
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            orders: self.orders.len(),
            checkpoints: self.checkpoints.len(),
            trips: self.trips.len(),
            deliveries: self.deliveries.len(),
            active_deliveries: self.active_deliveries(),
            verifications: self.verifies.len(),
        }
    }
}

/// Inserts under the key's entry guard; an existing row is never replaced.
fn insert_unique<V: Clone>(
    table: &DashMap<Uuid, V>,
    id: Uuid,
    row: V,
    kind: &str,
) -> Result<V, AppError> {
    match table.entry(id) {
        Entry::Occupied(_) => Err(AppError::Conflict(format!("{kind} {id} already exists"))),
        Entry::Vacant(slot) => {
            slot.insert(row.clone());
            Ok(row)
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct StoreCounts {
    pub orders: usize,
    pub checkpoints: usize,
    pub trips: usize,
    pub deliveries: usize,
    pub active_deliveries: usize,
    pub verifications: usize,
}
