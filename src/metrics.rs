use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();
    pub static ref RECORDS_CREATED_TOTAL: IntCounter =
        IntCounter::new("dns_records_created_total", "Total A records created").unwrap();
    pub static ref RECORDS_DELETED_TOTAL: IntCounter =
        IntCounter::new("dns_records_deleted_total", "Total A records deleted").unwrap();
    pub static ref SWEEP_ERRORS_TOTAL: IntCounter =
        IntCounter::new("sweep_errors_total", "Total errors recorded across reconcile sweeps").unwrap();
    pub static ref NODE_TRANSITIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("node_transitions_total", "Node state machine transitions"),
        &["to_state"]
    )
    .unwrap();
    pub static ref WATCH_RECONNECTS_TOTAL: IntCounter =
        IntCounter::new("node_watch_reconnects_total", "Node watch stream reconnects").unwrap();
}

/// Register every metric with the process-wide registry. Idempotent:
/// registering the same metric twice is ignored.
pub fn init_metrics() {
    PROMETHEUS_REGISTRY
        .register(Box::new(RECORDS_CREATED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(RECORDS_DELETED_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(SWEEP_ERRORS_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(NODE_TRANSITIONS_TOTAL.clone()))
        .ok();
    PROMETHEUS_REGISTRY
        .register(Box::new(WATCH_RECONNECTS_TOTAL.clone()))
        .ok();
}
