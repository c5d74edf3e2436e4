//! Acceptance resolution: race-safe accept, direct claim, reject, and
//! driver-issued status transitions.
//!
//! Accept and claim go through the same compare-and-set guard in the store
//! ([`OrderStore::try_assign`]); across any number of concurrent callers
//! exactly one observes success for a given order. Losing offers are
//! rejected by an asynchronous sweeper, never on the caller's critical
//! path.
//!
//! [`OrderStore::try_assign`]: crate::store::OrderStore::try_assign

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::state::AppState;
use crate::store::{AssignOutcome, StatusOutcome};

/// Cleanup job queued after a winning assignment commits.
#[derive(Debug, Clone, Copy)]
pub struct RejectSweep {
    pub order_id: Uuid,
    pub winner: Uuid,
}

/// Accept an offered order. Idempotent for the winning driver; losers get
/// `Conflict`.
pub async fn accept(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    resolve_assignment(state, order_id, driver_id, "accept").await
}

/// Claim an order straight from the pending pool. Races against accepts
/// through the same guard; missing or terminal orders are `NotFound`.
pub async fn claim(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
) -> Result<DeliveryOrder, AppError> {
    resolve_assignment(state, order_id, driver_id, "claim").await
}

async fn resolve_assignment(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    via: &'static str,
) -> Result<DeliveryOrder, AppError> {
    let start = Instant::now();
    let outcome = state.store.try_assign(order_id, driver_id);

    let (label, result) = match outcome {
        Ok(AssignOutcome::Won(order)) => {
            if state
                .sweep_tx
                .send(RejectSweep { order_id, winner: driver_id })
                .await
                .is_err()
            {
                // Advisory cleanup only; pending loser offers are already
                // unable to produce a second winner.
                warn!(order_id = %order_id, "reject sweeper unavailable");
            }
            info!(order_id = %order_id, driver_id = %driver_id, via, "order assigned");
            ("won", Ok(order))
        }
        Ok(AssignOutcome::AlreadyOwned(order)) => {
            debug!(order_id = %order_id, driver_id = %driver_id, via, "idempotent retry");
            ("retry", Ok(order))
        }
        Ok(AssignOutcome::Lost) => (
            "conflict",
            Err(AppError::Conflict(format!(
                "order {order_id} already assigned to another driver"
            ))),
        ),
        Ok(AssignOutcome::Unavailable) => (
            "unavailable",
            Err(AppError::NotFound(format!("order {order_id} no longer available"))),
        ),
        Err(err) => ("error", Err(err.into())),
    };

    state
        .metrics
        .accept_latency_seconds
        .with_label_values(&[label])
        .observe(start.elapsed().as_secs_f64());
    state.metrics.accepts_total.with_label_values(&[label]).inc();

    result
}

/// Decline an offer. Succeeds as a no-op when the offer is missing or
/// already resolved, and never affects the order or other drivers.
pub async fn reject(state: &AppState, order_id: Uuid, driver_id: Uuid) -> Result<(), AppError> {
    let rejected = state.store.reject_offer(order_id, driver_id)?;
    debug!(order_id = %order_id, driver_id = %driver_id, rejected, "offer rejected");
    Ok(())
}

/// Driver-issued lifecycle transition for an order the driver owns.
pub async fn update_status(
    state: &AppState,
    order_id: Uuid,
    driver_id: Uuid,
    new_status: OrderStatus,
) -> Result<DeliveryOrder, AppError> {
    match state.store.update_status(order_id, driver_id, new_status)? {
        StatusOutcome::Updated(order) => {
            info!(order_id = %order_id, status = ?order.status, "order status updated");
            Ok(order)
        }
        StatusOutcome::Forbidden => Err(AppError::Forbidden(format!(
            "driver {driver_id} is not assigned to order {order_id}"
        ))),
        StatusOutcome::Invalid { from } => {
            Err(AppError::InvalidTransition { from, to: new_status })
        }
        StatusOutcome::NotFound => Err(AppError::NotFound(format!("order {order_id} not found"))),
    }
}

/// Background worker rejecting loser offers after each winning assignment.
pub async fn run_reject_sweeper(state: Arc<AppState>, mut sweep_rx: mpsc::Receiver<RejectSweep>) {
    info!("reject sweeper started");

    while let Some(sweep) = sweep_rx.recv().await {
        match state.store.reject_losing_offers(sweep.order_id, sweep.winner) {
            Ok(rejected) if rejected > 0 => {
                info!(order_id = %sweep.order_id, rejected, "losing offers rejected");
            }
            Ok(_) => {}
            Err(err) => {
                error!(order_id = %sweep.order_id, error = %err, "reject sweep failed");
            }
        }
    }

    warn!("reject sweeper stopped: queue channel closed");
}
