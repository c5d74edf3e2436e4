use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::engine::distributor::{distribute, enqueue_for_broadcast};
use crate::engine::resolver::{self, RejectSweep};
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::order::{DeliveryOrder, OrderStatus, Priority};
use crate::state::AppState;
use crate::store::StatusOutcome;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/pending", get(pending_pool))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/broadcast", post(rebroadcast))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_offer))
        .route("/orders/:id/claim", post(claim_order))
        .route("/orders/:id/status", post(update_status))
        .route("/orders/:id/cancel", post(cancel_order))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub total: Decimal,
    pub priority: Priority,
}

#[derive(Deserialize)]
pub struct DriverRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub driver_id: Uuid,
    pub status: OrderStatus,
}

#[derive(Serialize)]
struct BroadcastResponse {
    offers_created: usize,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    if payload.total < Decimal::ZERO {
        return Err(AppError::BadRequest("total cannot be negative".to_string()));
    }

    let now = Utc::now();
    let order = DeliveryOrder {
        id: Uuid::new_v4(),
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        total: payload.total,
        priority: payload.priority,
        status: OrderStatus::Pending,
        driver_id: None,
        created_at: now,
        updated_at: now,
    };

    state.store.insert_order(&order)?;
    enqueue_for_broadcast(&state, order.clone()).await?;

    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = state
        .store
        .get_order(id)?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order))
}

/// Unclaimed orders, including ones with outstanding offers. This is the
/// direct-claim pool, so an order with zero eligible drivers at broadcast
/// time is never stuck.
async fn pending_pool(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DeliveryOrder>>, AppError> {
    Ok(Json(state.store.list_unclaimed()?))
}

async fn rebroadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BroadcastResponse>, AppError> {
    let order = state
        .store
        .get_order(id)?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    if !order.is_unclaimed() {
        return Err(AppError::Conflict(format!("order {id} is no longer unclaimed")));
    }

    let offers_created = distribute(&state, &order)?;
    Ok(Json(BroadcastResponse { offers_created }))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = resolver::accept(&state, id, payload.driver_id).await?;
    Ok(Json(order))
}

async fn claim_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = resolver::claim(&state, id, payload.driver_id).await?;
    Ok(Json(order))
}

async fn reject_offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<StatusCode, AppError> {
    resolver::reject(&state, id, payload.driver_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DeliveryOrder>, AppError> {
    let order = resolver::update_status(&state, id, payload.driver_id, payload.status).await?;
    Ok(Json(order))
}

/// Operator-initiated cancellation; legal from any non-terminal state.
async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeliveryOrder>, AppError> {
    match state.store.cancel_order(id)? {
        StatusOutcome::Updated(order) => {
            // Sweep any offers still pending; a cancelled order has left
            // the unclaimed state.
            if state
                .sweep_tx
                .send(RejectSweep { order_id: id, winner: Uuid::nil() })
                .await
                .is_err()
            {
                warn!(order_id = %id, "reject sweeper unavailable");
            }
            Ok(Json(order))
        }
        StatusOutcome::Invalid { from } => Err(AppError::InvalidTransition {
            from,
            to: OrderStatus::Cancelled,
        }),
        StatusOutcome::NotFound => Err(AppError::NotFound(format!("order {id} not found"))),
        StatusOutcome::Forbidden => Err(AppError::Forbidden(format!(
            "order {id} cannot be cancelled by this caller"
        ))),
    }
}
