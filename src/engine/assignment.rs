use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::models::principal::Principal;
use crate::models::trip::Trip;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct AssignRequest {
    pub check_ids: Vec<Uuid>,
    pub vehicle_id: Uuid,
    pub driver_user_id: Uuid,
    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignOutcome {
    pub delivery: Delivery,
    pub trips: Vec<Trip>,
}

/// Creates a delivery and binds to it every unassigned trip touching the
/// given checkpoints, across orders.
pub fn assign_delivery(
    state: &AppState,
    principal: &Principal,
    request: AssignRequest,
    now: DateTime<Utc>,
) -> Result<AssignOutcome, AppError> {
    let store = &state.store;

    let vehicle = store
        .vehicle(request.vehicle_id)
        .ok_or_else(|| AppError::NotFound(format!("vehicle {} not found", request.vehicle_id)))?;
    if !vehicle.is_driven_by(request.driver_user_id) {
        return Err(AppError::Validation(format!(
            "driver {} is not registered on vehicle {}",
            request.driver_user_id, vehicle.id
        )));
    }

    let check_ids: BTreeSet<Uuid> = request.check_ids.iter().copied().collect();
    if let Some(missing) = check_ids.iter().find(|id| store.checkpoint(**id).is_none()) {
        return Err(AppError::NotFound(format!("checkpoint {missing} not found")));
    }

    let delivery = Delivery {
        id: Uuid::new_v4(),
        vehicle_id: vehicle.id,
        driver_user_id: request.driver_user_id,
        scheduled_date: request.scheduled_date,
        start_timestamp: None,
        end_timestamp: None,
        created_by: principal.user_id,
        created_at: now,
    };

    let trips = {
        let _txn = store.assignment_write()?;
        store.insert_delivery(delivery.clone());

        let mut bound = Vec::new();
        for trip in store.trips_touching(&check_ids) {
            match store.bind_trip(trip.id, delivery.id) {
                Some(trip) => bound.push(trip),
                None => warn!(
                    trip_id = %trip.id,
                    delivery_id = ?trip.delivery_id,
                    "trip already bound to another delivery; skipped"
                ),
            }
        }
        bound
    };

    state.metrics.deliveries_active.inc();

    if trips.is_empty() {
        warn!(delivery_id = %delivery.id, "delivery created without any trips");
    }
    info!(
        delivery_id = %delivery.id,
        vehicle_id = %delivery.vehicle_id,
        driver_user_id = %delivery.driver_user_id,
        created_by = %principal.user_id,
        trips = trips.len(),
        "delivery assigned"
    );

    Ok(AssignOutcome { delivery, trips })
}

pub fn start_delivery(
    state: &AppState,
    principal: &Principal,
    delivery_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Delivery, AppError> {
    let delivery = state.store.update_delivery(delivery_id, |delivery| {
        if delivery.driver_user_id != principal.user_id {
            return Err(AppError::AccessDenied);
        }
        if delivery.start_timestamp.is_some() {
            return Err(AppError::AlreadyStarted(delivery.id));
        }
        delivery.start_timestamp = Some(now);
        Ok(delivery.clone())
    })?;

    info!(delivery_id = %delivery_id, driver_user_id = %principal.user_id, "delivery started");
    Ok(delivery)
}

pub fn delivery_trips(state: &AppState, delivery_id: Uuid) -> Result<Vec<Trip>, AppError> {
    let _txn = state.store.assignment_read()?;
    Ok(state.store.delivery_trips(delivery_id))
}

/// Distinct checkpoints at either end of the delivery's trips.
pub fn delivery_checkpoints(state: &AppState, delivery_id: Uuid) -> Result<BTreeSet<Uuid>, AppError> {
    Ok(delivery_trips(state, delivery_id)?
        .iter()
        .flat_map(Trip::endpoints)
        .collect())
}

pub fn delivery_locations(state: &AppState, delivery_id: Uuid) -> Result<BTreeSet<Uuid>, AppError> {
    Ok(delivery_checkpoints(state, delivery_id)?
        .into_iter()
        .filter_map(|check_id| state.store.checkpoint(check_id))
        .map(|checkpoint| checkpoint.location_id)
        .collect())
}
