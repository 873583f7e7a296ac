//! Bridge client metrics

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter,
    register_int_counter_vec, CounterVec, HistogramVec, IntCounter, IntCounterVec,
};

lazy_static::lazy_static! {
    /// Bridge requests by collection and outcome
    pub static ref BRIDGE_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "tally_bridge_requests_total",
        "Total bridge requests by collection and outcome",
        &["collection", "outcome"]
    )
    .unwrap();

    /// Request creation to resolution latency
    pub static ref BRIDGE_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "tally_bridge_request_duration_seconds",
        "Time from request creation to resolution",
        &["collection"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .unwrap();

    /// Status polls issued
    pub static ref BRIDGE_POLLS_TOTAL: IntCounter = register_int_counter!(
        "tally_bridge_status_polls_total",
        "Status polls issued against the request queue"
    )
    .unwrap();

    /// Per-month fallbacks by detected anomaly
    pub static ref MONTH_WISE_FALLBACKS: IntCounterVec = register_int_counter_vec!(
        "tally_bridge_month_wise_fallbacks_total",
        "Bulk month-wise results replaced by the per-month fallback",
        &["anomaly"]
    )
    .unwrap();

    /// Sessions lost to a failed liveness probe
    pub static ref LIVENESS_FAILURES: IntCounter = register_int_counter!(
        "tally_bridge_liveness_failures_total",
        "Sessions demoted by a failed liveness probe"
    )
    .unwrap();

    /// Fetch outcomes by operation
    pub static ref FETCH_OUTCOMES: IntCounterVec = register_int_counter_vec!(
        "tally_bridge_fetch_outcomes_total",
        "Client fetch operations by operation and outcome",
        &["operation", "outcome"]
    )
    .unwrap();
}
