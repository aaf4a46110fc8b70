// src/core/metrics.rs

//! Defines and registers Prometheus metrics for controller monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Fleet gauges ---
    /// The number of media nodes currently holding a control stream.
    pub static ref CONNECTED_NODES: Gauge =
        register_gauge!("foghorn_connected_nodes", "Number of currently connected media nodes.").unwrap();
    /// The number of nodes currently marked inactive by the staleness sweep.
    pub static ref STALE_NODES: Gauge =
        register_gauge!("foghorn_stale_nodes", "Number of nodes marked inactive by the staleness sweep.").unwrap();

    // --- Selection ---
    /// Node selections performed, labeled by outcome.
    pub static ref SELECTIONS_TOTAL: CounterVec =
        register_counter_vec!("foghorn_selections_total", "Node selections performed, labeled by outcome.", &["status"]).unwrap();
    /// Latency of a full selection pass over the node set.
    pub static ref SELECTION_SECONDS: Histogram =
        register_histogram!("foghorn_selection_seconds", "Latency of node selection in seconds.").unwrap();

    // --- Control stream ---
    /// Control-stream messages received, labeled by message kind.
    pub static ref CONTROL_MESSAGES_TOTAL: CounterVec =
        register_counter_vec!("foghorn_control_messages_total", "Control-stream messages received, labeled by kind.", &["kind"]).unwrap();
    /// Node registrations rejected at enrollment.
    pub static ref ENROLLMENT_REJECTED_TOTAL: CounterVec =
        register_counter_vec!("foghorn_enrollment_rejected_total", "Registrations rejected, labeled by reason code.", &["code"]).unwrap();

    // --- Relay ---
    /// Commands forwarded to peer controllers, labeled by command type and status.
    pub static ref RELAY_FORWARDS_TOTAL: CounterVec =
        register_counter_vec!("foghorn_relay_forwards_total", "Commands relayed to peer controllers.", &["command_type", "status"]).unwrap();

    // --- Workflows ---
    /// DVR recordings started.
    pub static ref DVR_STARTS_TOTAL: Counter =
        register_counter!("foghorn_dvr_starts_total", "DVR recordings started.").unwrap();
    /// Defrost operations started, labeled by outcome.
    pub static ref DEFROSTS_TOTAL: CounterVec =
        register_counter_vec!("foghorn_defrosts_total", "Defrost operations, labeled by outcome.", &["status"]).unwrap();
    /// Freeze permissions granted, labeled by asset type.
    pub static ref FREEZE_PERMITS_TOTAL: CounterVec =
        register_counter_vec!("foghorn_freeze_permits_total", "Freeze permissions granted, labeled by asset type.", &["asset_type"]).unwrap();
    /// Artifacts expired by the retention job.
    pub static ref RETENTION_EXPIRED_TOTAL: Counter =
        register_counter!("foghorn_retention_expired_total", "Artifacts expired by the retention job.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
