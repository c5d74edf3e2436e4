use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::Config;
use crate::engine::resolver::RejectSweep;
use crate::models::driver::DriverAvailability;
use crate::models::order::DeliveryOrder;
use crate::observability::metrics::Metrics;
use crate::store::OrderStore;

pub struct AppState {
    /// Durable orders + offer ledger. Owns all order and offer mutations.
    pub store: OrderStore,
    /// Ephemeral availability registry; drivers re-announce on reconnect.
    pub drivers: DashMap<Uuid, DriverAvailability>,
    pub broadcast_tx: mpsc::Sender<DeliveryOrder>,
    pub sweep_tx: mpsc::Sender<RejectSweep>,
    pub metrics: Metrics,
    pub poll_interval: Duration,
    pub broadcast_radius_km: f64,
}

impl AppState {
    pub fn new(
        store: OrderStore,
        config: &Config,
    ) -> (Self, mpsc::Receiver<DeliveryOrder>, mpsc::Receiver<RejectSweep>) {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_queue_size);
        let (sweep_tx, sweep_rx) = mpsc::channel(config.sweep_queue_size);

        (
            Self {
                store,
                drivers: DashMap::new(),
                broadcast_tx,
                sweep_tx,
                metrics: Metrics::new(),
                poll_interval: Duration::from_secs(config.poll_interval_secs),
                broadcast_radius_km: config.broadcast_radius_km,
            },
            broadcast_rx,
            sweep_rx,
        )
    }

    pub fn online_driver_count(&self) -> usize {
        self.drivers.iter().filter(|entry| entry.value().online).count()
    }

    pub fn refresh_online_gauge(&self) {
        self.metrics.drivers_online.set(self.online_driver_count() as i64);
    }
}
