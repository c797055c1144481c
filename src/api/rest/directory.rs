use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::directory::{Company, Item, Location, Vehicle};
use crate::state::AppState;

/// Intake for the company, location, catalog and fleet directories that
/// other subsystems own.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/companies", post(create_company))
        .route("/locations", post(create_location))
        .route("/items", post(create_item))
        .route("/vehicles", post(create_vehicle))
}

#[derive(Deserialize)]
pub struct CreateCompanyRequest {
    pub id: Option<Uuid>,
    pub name: String,
}

#[derive(Deserialize)]
pub struct CreateLocationRequest {
    pub id: Option<Uuid>,
    pub company_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub supplier_company_id: Uuid,
    pub location_id: Uuid,
    pub slaughterhouse_location_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct CreateVehicleRequest {
    pub id: Option<Uuid>,
    pub plate_number: String,
    #[serde(default)]
    pub driver_user_ids: Vec<Uuid>,
}

fn require_name(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

async fn create_company(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateCompanyRequest>, JsonRejection>,
) -> Result<Json<Company>, AppError> {
    let Json(payload) = payload?;
    require_name("name", &payload.name)?;

    let company = Company {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name,
    };

    Ok(Json(state.store.insert_company(company)?))
}

async fn create_location(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateLocationRequest>, JsonRejection>,
) -> Result<Json<Location>, AppError> {
    let Json(payload) = payload?;
    require_name("name", &payload.name)?;

    if !state.store.companies.contains_key(&payload.company_id) {
        return Err(AppError::NotFound(format!(
            "company {} not found",
            payload.company_id
        )));
    }

    let location = Location {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        company_id: payload.company_id,
        name: payload.name,
        address: payload.address,
    };

    Ok(Json(state.store.insert_location(location)?))
}

async fn create_item(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateItemRequest>, JsonRejection>,
) -> Result<Json<Item>, AppError> {
    let Json(payload) = payload?;
    require_name("name", &payload.name)?;

    if !state.store.companies.contains_key(&payload.supplier_company_id) {
        return Err(AppError::NotFound(format!(
            "company {} not found",
            payload.supplier_company_id
        )));
    }
    let referenced = std::iter::once(payload.location_id).chain(payload.slaughterhouse_location_id);
    for location_id in referenced {
        if state.store.location(location_id).is_none() {
            return Err(AppError::NotFound(format!("location {location_id} not found")));
        }
    }

    let item = Item {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        name: payload.name,
        supplier_company_id: payload.supplier_company_id,
        location_id: payload.location_id,
        slaughterhouse_location_id: payload.slaughterhouse_location_id,
    };

    Ok(Json(state.store.insert_item(item)?))
}

async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateVehicleRequest>, JsonRejection>,
) -> Result<Json<Vehicle>, AppError> {
    let Json(payload) = payload?;
    require_name("plate_number", &payload.plate_number)?;

    let vehicle = Vehicle {
        id: payload.id.unwrap_or_else(Uuid::new_v4),
        plate_number: payload.plate_number,
        driver_user_ids: payload.driver_user_ids,
    };

    Ok(Json(state.store.insert_vehicle(vehicle)?))
}
