use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, put};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::tokens::validate;
use crate::engine::verification::{pending_at_location, update_verification, VerifyUpdate};
use crate::error::AppError;
use crate::models::principal::Principal;
use crate::models::verify::{Verify, VerifyStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/verifications", get(list_pending))
        .route("/verifications/:id", put(update))
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(rename = "deliveryID")]
    pub delivery_id: Uuid,
    #[serde(rename = "locationID")]
    pub location_id: Uuid,
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateVerificationRequest {
    pub status: VerifyStatus,
    pub comment: Option<String>,
}

async fn list_pending(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Verify>>, AppError> {
    let Query(query) = query?;
    let token = query.token.unwrap_or_default();

    let grant = validate(&state, query.delivery_id, query.location_id, &token, Utc::now())?;
    Ok(Json(pending_at_location(&state, &grant)?))
}

async fn update(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path(id): Path<Uuid>,
    query: Result<Query<TokenQuery>, QueryRejection>,
    payload: Result<Json<UpdateVerificationRequest>, JsonRejection>,
) -> Result<Json<VerifyUpdate>, AppError> {
    let Query(query) = query?;
    let token = query.token.unwrap_or_default();
    let now = Utc::now();

    // The token is bound to the row's own delivery and location.
    let verify = state
        .store
        .verify(id)
        .ok_or_else(|| AppError::NotFound(format!("verification {id} not found")))?;
    let location_id = state
        .store
        .checkpoint(verify.check_id)
        .map(|checkpoint| checkpoint.location_id)
        .ok_or_else(|| AppError::Internal(format!("verification {id} has no checkpoint")))?;
    let grant = validate(&state, verify.delivery_id, location_id, &token, now)?;

    let Json(payload) = payload?;
    let outcome = update_verification(
        &state,
        &grant,
        &principal,
        id,
        payload.status,
        payload.comment,
        now,
    )?;

    Ok(Json(outcome))
}
