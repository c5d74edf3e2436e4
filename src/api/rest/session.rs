//! Per-driver polling session.
//!
//! A connected driver holds a websocket; the server runs the discovery
//! queries (pending offers + direct-claim pool) on a fixed interval and
//! sends each snapshot down the socket. A `"refresh"` text frame polls
//! immediately. This is polling surfaced over the session, not push
//! delivery: nothing is sent outside the driver's own poll cadence.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::rest::drivers::{offer_views, OfferView};
use crate::models::driver::DriverAvailability;
use crate::models::order::DeliveryOrder;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SessionParams {
    pub driver_id: Uuid,
}

#[derive(Serialize)]
struct PollSnapshot {
    offers: Vec<OfferView>,
    pending_pool: Vec<DeliveryOrder>,
}

pub async fn session_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SessionParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session(socket, state, params.driver_id))
}

async fn handle_session(socket: WebSocket, state: Arc<AppState>, driver_id: Uuid) {
    // Connecting re-announces the driver.
    state
        .drivers
        .entry(driver_id)
        .and_modify(|availability| {
            availability.online = true;
            availability.last_seen = Utc::now();
        })
        .or_insert_with(|| DriverAvailability::online_now(driver_id, None));
    state.refresh_online_gauge();

    info!(driver_id = %driver_id, "polling session connected");

    let (mut sender, mut receiver) = socket.split();
    let mut ticks = tokio::time::interval(state.poll_interval);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if send_snapshot(&state, driver_id, &mut sender).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) if text == "refresh" => {
                    if send_snapshot(&state, driver_id, &mut sender).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    // Disconnect only stamps last_seen; availability is toggled
    // exclusively through SetOnline.
    if let Some(mut availability) = state.drivers.get_mut(&driver_id) {
        availability.last_seen = Utc::now();
    }

    info!(driver_id = %driver_id, "polling session disconnected");
}

async fn send_snapshot(
    state: &AppState,
    driver_id: Uuid,
    sender: &mut (impl SinkExt<Message> + Unpin),
) -> Result<(), ()> {
    if let Some(mut availability) = state.drivers.get_mut(&driver_id) {
        availability.last_seen = Utc::now();
    }

    let snapshot = match build_snapshot(state, driver_id) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!(driver_id = %driver_id, error = %err, "poll query failed");
            return Ok(());
        }
    };

    let json = match serde_json::to_string(&snapshot) {
        Ok(json) => json,
        Err(err) => {
            warn!(driver_id = %driver_id, error = %err, "failed to serialize poll snapshot");
            return Ok(());
        }
    };

    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

fn build_snapshot(state: &AppState, driver_id: Uuid) -> Result<PollSnapshot, crate::error::AppError> {
    Ok(PollSnapshot {
        offers: offer_views(state, driver_id)?,
        pending_pool: state.store.list_unclaimed()?,
    })
}
