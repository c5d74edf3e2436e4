use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub accepts_total: IntCounterVec,
    pub offers_created_total: IntCounter,
    pub orders_awaiting_broadcast: IntGauge,
    pub accept_latency_seconds: HistogramVec,
    pub drivers_online: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let accepts_total = IntCounterVec::new(
            Opts::new("accepts_total", "Accept/claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid accepts_total metric");

        let offers_created_total = IntCounter::new(
            "offers_created_total",
            "Total broadcast offers created",
        )
        .expect("valid offers_created_total metric");

        let orders_awaiting_broadcast = IntGauge::new(
            "orders_awaiting_broadcast",
            "Orders queued for the broadcast distributor",
        )
        .expect("valid orders_awaiting_broadcast metric");

        let accept_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "accept_latency_seconds",
                "Latency of accept/claim resolution in seconds",
            ),
            &["outcome"],
        )
        .expect("valid accept_latency_seconds metric");

        let drivers_online = IntGauge::new("drivers_online", "Drivers currently online")
            .expect("valid drivers_online metric");

        registry
            .register(Box::new(accepts_total.clone()))
            .expect("register accepts_total");
        registry
            .register(Box::new(offers_created_total.clone()))
            .expect("register offers_created_total");
        registry
            .register(Box::new(orders_awaiting_broadcast.clone()))
            .expect("register orders_awaiting_broadcast");
        registry
            .register(Box::new(accept_latency_seconds.clone()))
            .expect("register accept_latency_seconds");
        registry
            .register(Box::new(drivers_online.clone()))
            .expect("register drivers_online");

        Self {
            registry,
            accepts_total,
            offers_created_total,
            orders_awaiting_broadcast,
            accept_latency_seconds,
            drivers_online,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
