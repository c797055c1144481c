use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::engine::assignment::{
    assign_delivery, delivery_trips, start_delivery, AssignOutcome, AssignRequest,
};
use crate::engine::tokens::issue_or_refresh;
use crate::error::AppError;
use crate::models::delivery::{Delivery, DeliveryStatus};
use crate::models::principal::Principal;
use crate::models::trip::Trip;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery))
        .route("/deliveries/:id", get(get_delivery))
        .route("/deliveries/:id/start", post(start))
        .route(
            "/deliveries/:id/locations/:location_id/token",
            post(issue_token),
        )
        .route("/trips/unassigned", get(list_unassigned_trips))
}

#[derive(Serialize)]
pub struct DeliveryResponse {
    pub delivery: Delivery,
    pub status: DeliveryStatus,
    pub trips: Vec<Trip>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub delivery_id: Uuid,
    pub location_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub reused: bool,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<AssignOutcome>, AppError> {
    let Json(payload) = payload?;
    let outcome = assign_delivery(&state, &principal, payload, Utc::now())?;
    Ok(Json(outcome))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryResponse>, AppError> {
    let delivery = state
        .store
        .delivery(id)
        .ok_or_else(|| AppError::NotFound(format!("delivery {} not found", id)))?;
    let trips = delivery_trips(&state, id)?;

    Ok(Json(DeliveryResponse {
        status: delivery.status(),
        delivery,
        trips,
    }))
}

async fn start(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = start_delivery(&state, &principal, id, Utc::now())?;
    Ok(Json(delivery))
}

/// Called by the QR generator once it has authorized the caller.
async fn issue_token(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((id, location_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TokenResponse>, AppError> {
    let issue = issue_or_refresh(&state, &principal, id, location_id, Utc::now())?;

    Ok(Json(TokenResponse {
        delivery_id: issue.token.delivery_id,
        location_id: issue.token.location_id,
        token: issue.token.token,
        expires_at: issue.token.expires_at,
        reused: issue.reused,
    }))
}

async fn list_unassigned_trips(State(state): State<Arc<AppState>>) -> Json<Vec<Trip>> {
    Json(state.store.unassigned_trips())
}
