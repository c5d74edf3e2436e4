//! Broadcast distributor: fans a newly pending order out to eligible
//! drivers by writing one pending offer per candidate into the ledger.
//! Discovery is pull-based; offers are found by driver polling, never
//! pushed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::order::DeliveryOrder;
use crate::state::AppState;

pub async fn enqueue_for_broadcast(state: &AppState, order: DeliveryOrder) -> Result<(), AppError> {
    state
        .broadcast_tx
        .send(order)
        .await
        .map_err(|err| AppError::Internal(format!("broadcast queue send failed: {err}")))?;

    state.metrics.orders_awaiting_broadcast.inc();
    Ok(())
}

pub async fn run_distributor(state: Arc<AppState>, mut broadcast_rx: mpsc::Receiver<DeliveryOrder>) {
    info!("broadcast distributor started");

    while let Some(order) = broadcast_rx.recv().await {
        state.metrics.orders_awaiting_broadcast.dec();

        if let Err(err) = distribute(&state, &order) {
            error!(order_id = %order.id, error = %err, "failed to distribute order");
        }
    }

    warn!("broadcast distributor stopped: queue channel closed");
}

/// Create pending offers for every eligible driver. Idempotent on the
/// (order_id, driver_id) key: re-distribution never duplicates or resets an
/// offer. Returns the number of offers created.
pub fn distribute(state: &AppState, order: &DeliveryOrder) -> Result<usize, AppError> {
    // The order may have been claimed between enqueue and processing.
    let Some(current) = state.store.get_order(order.id)? else {
        return Err(AppError::NotFound(format!("order {} not found", order.id)));
    };
    if !current.is_unclaimed() {
        info!(order_id = %order.id, "order no longer unclaimed; skipping broadcast");
        return Ok(0);
    }

    let candidates = eligible_drivers(state, &current);
    if candidates.is_empty() {
        // The order stays pending with no offers and remains discoverable
        // through the direct-claim pool.
        info!(order_id = %order.id, "no eligible drivers; order stays in pending pool");
        return Ok(0);
    }

    let created = state.store.upsert_offers(current.id, &candidates)?;
    state.metrics.offers_created_total.inc_by(created as u64);

    info!(
        order_id = %current.id,
        candidates = candidates.len(),
        created,
        "order broadcast"
    );

    Ok(created)
}

/// Online drivers, optionally filtered by the advisory broadcast radius.
/// Drivers without a known location always pass the radius filter.
pub fn eligible_drivers(state: &AppState, order: &DeliveryOrder) -> Vec<Uuid> {
    state
        .drivers
        .iter()
        .filter_map(|entry| {
            let driver = entry.value();
            if !driver.online {
                return None;
            }

            if state.broadcast_radius_km > 0.0 {
                if let Some(location) = &driver.location {
                    if haversine_km(location, &order.pickup) > state.broadcast_radius_km {
                        return None;
                    }
                }
            }

            Some(driver.driver_id)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::{distribute, eligible_drivers};
    use crate::config::Config;
    use crate::models::driver::{DriverAvailability, GeoPoint};
    use crate::models::order::{DeliveryOrder, OrderStatus, Priority};
    use crate::state::AppState;
    use crate::store::OrderStore;

    fn test_state() -> AppState {
        let config = Config {
            http_port: 0,
            log_level: "info".to_string(),
            db_path: String::new(),
            broadcast_queue_size: 16,
            sweep_queue_size: 16,
            poll_interval_secs: 30,
            broadcast_radius_km: 0.0,
        };
        let store = OrderStore::open_in_memory().unwrap();
        let (state, _broadcast_rx, _sweep_rx) = AppState::new(store, &config);
        state
    }

    fn pending_order() -> DeliveryOrder {
        let now = Utc::now();
        DeliveryOrder {
            id: Uuid::new_v4(),
            pickup: GeoPoint { lat: 52.52, lng: 13.405 },
            dropoff: GeoPoint { lat: 52.54, lng: 13.42 },
            total: Decimal::new(2400, 2),
            priority: Priority::High,
            status: OrderStatus::Pending,
            driver_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn announce(state: &AppState, seed: u128, online: bool, location: Option<GeoPoint>) -> Uuid {
        let driver_id = Uuid::from_u128(seed);
        let mut availability = DriverAvailability::online_now(driver_id, location);
        availability.online = online;
        state.drivers.insert(driver_id, availability);
        driver_id
    }

    #[test]
    fn offline_drivers_are_excluded() {
        let state = test_state();
        let online = announce(&state, 1, true, None);
        let offline = announce(&state, 2, false, None);

        let order = pending_order();
        let candidates = eligible_drivers(&state, &order);

        assert_eq!(candidates, vec![online]);
        assert!(!candidates.contains(&offline));
    }

    #[test]
    fn radius_filter_drops_distant_drivers_but_keeps_unlocated_ones() {
        let mut state = test_state();
        state.broadcast_radius_km = 5.0;

        let near = announce(&state, 1, true, Some(GeoPoint { lat: 52.53, lng: 13.41 }));
        let far = announce(&state, 2, true, Some(GeoPoint { lat: 53.55, lng: 9.99 }));
        let unlocated = announce(&state, 3, true, None);

        let order = pending_order();
        let candidates = eligible_drivers(&state, &order);

        assert!(candidates.contains(&near));
        assert!(!candidates.contains(&far));
        assert!(candidates.contains(&unlocated));
    }

    #[test]
    fn redistribution_creates_no_duplicate_offers() {
        let state = test_state();
        announce(&state, 1, true, None);
        announce(&state, 2, true, None);

        let order = pending_order();
        state.store.insert_order(&order).unwrap();

        assert_eq!(distribute(&state, &order).unwrap(), 2);
        assert_eq!(distribute(&state, &order).unwrap(), 0);
        assert_eq!(state.store.offers_for_order(order.id).unwrap().len(), 2);
    }

    #[test]
    fn zero_candidates_leaves_order_in_pending_pool() {
        let state = test_state();
        let order = pending_order();
        state.store.insert_order(&order).unwrap();

        assert_eq!(distribute(&state, &order).unwrap(), 0);
        let pool = state.store.list_unclaimed().unwrap();
        assert!(pool.iter().any(|pending| pending.id == order.id));
    }

    #[test]
    fn claimed_order_is_not_broadcast() {
        let state = test_state();
        announce(&state, 1, true, None);

        let order = pending_order();
        state.store.insert_order(&order).unwrap();
        state.store.try_assign(order.id, Uuid::from_u128(9)).unwrap();

        assert_eq!(distribute(&state, &order).unwrap(), 0);
        // Only the winner's synthesized offer exists.
        let offers = state.store.offers_for_order(order.id).unwrap();
        assert_eq!(offers.len(), 1);
    }
}
