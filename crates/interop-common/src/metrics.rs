//! Prometheus metrics shared by the client and server sides
//!
//! Registered in the default registry; the server exposes them on its
//! metrics listener.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec,
};
use lazy_static::lazy_static;

lazy_static! {
    // Inbound
    pub static ref INBOUND_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "interop_inbound_requests_total",
        "Inbound Backend Interfaces requests by message type and result code",
        &["message_type", "result_code"]
    ).expect("register interop_inbound_requests_total");

    pub static ref INBOUND_DURATION: HistogramVec = register_histogram_vec!(
        "interop_inbound_request_duration_seconds",
        "Inbound request handling latency in seconds",
        &["message_type"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).expect("register interop_inbound_request_duration_seconds");

    // Outbound
    pub static ref OUTBOUND_RPCS: IntCounterVec = register_int_counter_vec!(
        "interop_outbound_rpcs_total",
        "Outbound Backend Interfaces RPCs by message type and outcome",
        &["message_type", "outcome"]
    ).expect("register interop_outbound_rpcs_total");

    pub static ref RACES: IntCounterVec = register_int_counter_vec!(
        "interop_join_server_races_total",
        "Join Server race outcomes",
        &["outcome"]
    ).expect("register interop_join_server_races_total");

    // Authentication
    pub static ref JWKS_FETCHES: IntCounterVec = register_int_counter_vec!(
        "interop_jwks_fetches_total",
        "Token issuer key set fetches by outcome",
        &["outcome"]
    ).expect("register interop_jwks_fetches_total");
}

/// Record an inbound request
pub fn record_inbound(message_type: &str, result_code: &str, seconds: f64) {
    INBOUND_REQUESTS
        .with_label_values(&[message_type, result_code])
        .inc();
    INBOUND_DURATION
        .with_label_values(&[message_type])
        .observe(seconds);
}

/// Record an outbound RPC; outcome is `success` or an error kind name
pub fn record_outbound(message_type: &str, outcome: &str) {
    OUTBOUND_RPCS
        .with_label_values(&[message_type, outcome])
        .inc();
}

/// Record a race result: `success`, `error` or `consensus_unknown`
pub fn record_race(outcome: &str) {
    RACES.with_label_values(&[outcome]).inc();
}

pub fn record_jwks_fetch(outcome: &str) {
    JWKS_FETCHES.with_label_values(&[outcome]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = RACES.with_label_values(&["consensus_unknown"]).get();
        record_race("consensus_unknown");
        assert_eq!(RACES.with_label_values(&["consensus_unknown"]).get(), before + 1);

        record_inbound("JoinReq", "Success", 0.01);
        assert!(INBOUND_REQUESTS.with_label_values(&["JoinReq", "Success"]).get() >= 1);
    }
}
