use lazy_static::lazy_static;
use prometheus::{
    Counter, Gauge, Histogram, IntCounterVec, register_counter, register_gauge,
    register_histogram, register_int_counter_vec,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("gateway_requests_total", "Total number of proxied requests").unwrap();
    pub static ref THROTTLE_ADMITTED: IntCounterVec = register_int_counter_vec!(
        "throttle_admitted_total",
        "Requests admitted per throttle policy",
        &["policy"]
    )
    .unwrap();
    pub static ref THROTTLE_REJECTED: IntCounterVec = register_int_counter_vec!(
        "throttle_rejected_total",
        "Requests rejected per throttle policy",
        &["policy"]
    )
    .unwrap();
    pub static ref THROTTLE_ENTRIES: Gauge =
        register_gauge!("throttle_tracked_entries", "Current number of throttle entries").unwrap();
    pub static ref THROTTLE_EVICTED: Counter =
        register_counter!("throttle_evicted_total", "Entries removed by the sweeper").unwrap();
    pub static ref UPSTREAM_LATENCY: Histogram = register_histogram!(
        "gateway_upstream_latency_seconds",
        "Upstream request latency in seconds"
    )
    .unwrap();
}
