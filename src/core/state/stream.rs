// src/core/state/stream.rs

//! Stream tracking: one instance per (stream, node) pair plus the unified
//! per-stream view the workflow engines consult.

use crate::core::protocol::{BufferState, StreamStats, StreamStatus};
use std::collections::HashMap;
use std::time::Instant;

/// One copy of a stream on one node.
#[derive(Debug, Clone)]
pub struct StreamInstance {
    pub internal_name: String,
    pub node_id: String,
    pub viewers: u64,
    pub inputs: u64,
    /// Per-viewer bandwidth in bytes/s as measured by the node; 0 if unknown.
    pub bandwidth: u64,
    pub bytes_up: u64,
    pub bytes_down: u64,
    /// A replicated copy cannot serve as the stream's source.
    pub replicated: bool,
    pub status: StreamStatus,
    /// Free-form tags merged from health updates (`dvr_status`, ...).
    pub info: HashMap<String, String>,
    pub last_update: Instant,
}

impl StreamInstance {
    pub fn new(internal_name: &str, node_id: &str) -> Self {
        Self {
            internal_name: internal_name.to_string(),
            node_id: node_id.to_string(),
            viewers: 0,
            inputs: 0,
            bandwidth: 0,
            bytes_up: 0,
            bytes_down: 0,
            replicated: false,
            status: StreamStatus::Offline,
            info: HashMap::new(),
            last_update: Instant::now(),
        }
    }

    pub fn apply_stats(&mut self, stats: &StreamStats) {
        self.viewers = stats.total;
        self.inputs = stats.inputs;
        self.bytes_up = stats.bytes_up;
        self.bytes_down = stats.bytes_down;
        self.bandwidth = stats.bandwidth;
        self.replicated = stats.replicated;
        self.last_update = Instant::now();
    }

    /// A node is usable as the stream's source only through an instance that
    /// ingests it directly.
    pub fn is_source(&self) -> bool {
        self.inputs > 0 && !self.replicated && self.status != StreamStatus::Offline
    }
}

/// The aggregate view of a stream across every node carrying it.
#[derive(Debug, Clone)]
pub struct UnifiedStream {
    pub internal_name: String,
    pub status: StreamStatus,
    pub buffer_state: BufferState,
    /// Union viewer count over all instances.
    pub viewers: u64,
    pub has_issues: bool,
    pub issues: String,
    pub tenant_id: Option<String>,
    /// The node that first ingested the stream; early-start flows pin to it.
    pub primary_node: Option<String>,
    pub last_update: Instant,
}

impl UnifiedStream {
    pub fn new(internal_name: &str) -> Self {
        Self {
            internal_name: internal_name.to_string(),
            status: StreamStatus::Offline,
            buffer_state: BufferState::Empty,
            viewers: 0,
            has_issues: false,
            issues: String::new(),
            tenant_id: None,
            primary_node: None,
            last_update: Instant::now(),
        }
    }

    /// The readiness gate for DVR recording: a live, issue-free stream whose
    /// ingest buffer holds enough data to serve a sink.
    pub fn is_dvr_ready(&self) -> bool {
        !self.has_issues
            && self.status == StreamStatus::Live
            && matches!(self.buffer_state, BufferState::Full | BufferState::Recover)
    }
}
