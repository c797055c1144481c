use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::graph::record_payment;
use crate::engine::projector::{project_status, StatusTree};
use crate::error::AppError;
use crate::models::checkpoint::Checkpoint;
use crate::models::order::{Order, OrderKind, OrderLine};
use crate::models::trip::Trip;
use crate::state::AppState;
use crate::store::GraphSnapshot;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/payment", post(confirm_payment))
        .route("/orders/:id/checkpoints", get(get_checkpoints))
        .route("/orders/:id/status", get(get_status))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub kind: OrderKind,
    pub delivery_location_id: Uuid,
    pub lines: Vec<OrderLine>,
    pub order_status: Option<String>,
}

#[derive(Serialize)]
pub struct GraphResponse {
    pub order_id: Uuid,
    pub created: bool,
    pub checkpoints: Vec<Checkpoint>,
    pub trips: Vec<Trip>,
}

impl GraphResponse {
    fn new(order_id: Uuid, graph: GraphSnapshot, created: bool) -> Self {
        let mut checkpoints = graph.checkpoints;
        checkpoints.sort_by_key(|c| (c.arrange, c.location_id));
        Self {
            order_id,
            created,
            checkpoints,
            trips: graph.trips,
        }
    }
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<Json<Order>, AppError> {
    let Json(payload) = payload?;

    if payload.lines.is_empty() {
        return Err(AppError::Validation("order must have at least one line".to_string()));
    }
    if payload.lines.iter().any(|line| line.quantity == 0) {
        return Err(AppError::Validation("line quantity must be > 0".to_string()));
    }
    if state.store.location(payload.delivery_location_id).is_none() {
        return Err(AppError::NotFound(format!(
            "location {} not found",
            payload.delivery_location_id
        )));
    }
    if let Some(line) = payload
        .lines
        .iter()
        .find(|line| state.store.item(line.item_id).is_none())
    {
        return Err(AppError::NotFound(format!("item {} not found", line.item_id)));
    }

    let order = Order {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        customer_id: payload.customer_id,
        kind: payload.kind,
        delivery_location_id: payload.delivery_location_id,
        lines: payload.lines,
        paid_at: None,
        order_status: payload.order_status.unwrap_or_else(|| "pending".to_string()),
        created_at: Utc::now(),
    };

    Ok(Json(state.store.insert_order(order)?))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order))
}

async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GraphResponse>, AppError> {
    let commit = record_payment(&state, id, Utc::now())?;
    Ok(Json(GraphResponse::new(id, commit.graph, commit.created)))
}

async fn get_checkpoints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<GraphResponse>, AppError> {
    let graph = state
        .store
        .order_graph(id)
        .ok_or_else(|| AppError::NotFound(format!("no checkpoints for order {id}")))?;

    Ok(Json(GraphResponse::new(id, graph, false)))
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusTree>, AppError> {
    let order = state
        .store
        .order(id)
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    let checkpoints = state
        .store
        .order_graph(id)
        .map(|graph| graph.checkpoints)
        .unwrap_or_default();
    let verifies = state
        .store
        .verifies_for_checkpoints(checkpoints.iter().map(|c| &c.id));

    Ok(Json(project_status(&order, &checkpoints, &verifies)))
}
