use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{DriverAvailability, GeoPoint};
use crate::models::order::Priority;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver).get(list_drivers))
        .route("/drivers/:id/online", patch(set_online))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/offers", get(list_offers))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    /// Identity comes from the session layer; tests and local setups may
    /// supply their own id.
    pub driver_id: Option<Uuid>,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct SetOnlineRequest {
    pub online: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

/// One pending offer joined with the order fields a driver needs to decide.
#[derive(Debug, Serialize)]
pub struct OfferView {
    pub order_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub total: Decimal,
    pub priority: Priority,
    pub offered_at: DateTime<Utc>,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Json<DriverAvailability> {
    let driver_id = payload.driver_id.unwrap_or_else(Uuid::new_v4);
    let availability = DriverAvailability::online_now(driver_id, payload.location);

    state.drivers.insert(driver_id, availability.clone());
    state.refresh_online_gauge();

    Json(availability)
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverAvailability>> {
    let drivers = state
        .drivers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(drivers)
}

/// Going offline keeps already-extended offers valid; it only blocks new
/// ones. Unknown drivers are registered on first toggle.
async fn set_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetOnlineRequest>,
) -> Json<DriverAvailability> {
    let mut availability = state
        .drivers
        .entry(id)
        .or_insert_with(|| DriverAvailability::online_now(id, None));

    availability.online = payload.online;
    availability.last_seen = Utc::now();
    let snapshot = availability.clone();
    drop(availability);

    state.refresh_online_gauge();
    Json(snapshot)
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<DriverAvailability>, AppError> {
    let mut availability = state
        .drivers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    availability.location = Some(payload.location);
    availability.last_seen = Utc::now();

    Ok(Json(availability.clone()))
}

async fn list_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OfferView>>, AppError> {
    Ok(Json(offer_views(&state, id)?))
}

/// Pending offers for one driver, joined with their orders. Offers whose
/// order has already been claimed are filtered out; the sweeper rejects
/// them eventually.
pub(crate) fn offer_views(state: &AppState, driver_id: Uuid) -> Result<Vec<OfferView>, AppError> {
    let mut views = Vec::new();
    for offer in state.store.pending_offers_for(driver_id)? {
        let Some(order) = state.store.get_order(offer.order_id)? else {
            continue;
        };
        if !order.is_unclaimed() {
            continue;
        }
        views.push(OfferView {
            order_id: order.id,
            pickup: order.pickup,
            dropoff: order.dropoff,
            total: order.total,
            priority: order.priority,
            offered_at: offer.created_at,
        });
    }
    Ok(views)
}
