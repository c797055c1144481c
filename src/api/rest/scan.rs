use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::verification::{record_scan, Scan, ScanOutcome};
use crate::error::AppError;
use crate::models::principal::Principal;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/checkpoints/scan/:location_id/:company_id",
        get(scan).post(scan),
    )
}

/// Freshness window baked into the QR payload, in epoch milliseconds.
#[derive(Debug, Deserialize)]
pub struct ScanWindow {
    pub timestamp: i64,
    pub expires: i64,
}

impl ScanWindow {
    pub fn check(&self, now_ms: i64) -> Result<(), AppError> {
        if self.timestamp > self.expires {
            return Err(AppError::Validation(
                "timestamp must not be after expires".to_string(),
            ));
        }
        if now_ms > self.expires {
            return Err(AppError::AccessDenied);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ScannedCheckpoint {
    #[serde(rename = "checkID")]
    pub check_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(rename = "deliveryID")]
    pub delivery_id: Uuid,
    #[serde(rename = "locationID")]
    pub location_id: Uuid,
    pub checkpoints: Vec<ScannedCheckpoint>,
}

async fn scan(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Path((location_id, company_id)): Path<(Uuid, Uuid)>,
    window: Result<Query<ScanWindow>, QueryRejection>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanOutcome>, AppError> {
    let Query(window) = window?;
    let now = Utc::now();
    window.check(now.timestamp_millis())?;

    let Json(payload) = payload?;
    if payload.location_id != location_id {
        return Err(AppError::Validation(format!(
            "body locationID {} does not match scanned location {location_id}",
            payload.location_id
        )));
    }

    let outcome = record_scan(
        &state,
        &principal,
        Scan {
            delivery_id: payload.delivery_id,
            location_id,
            company_id,
            check_ids: payload.checkpoints.iter().map(|c| c.check_id).collect(),
        },
        now,
    )?;

    Ok(Json(outcome))
}
