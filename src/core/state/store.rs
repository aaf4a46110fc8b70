// src/core/state/store.rs

//! The in-memory authoritative registry of nodes and streams.
//!
//! One reader-writer lock per top-level map; no operation holds two locks at
//! once. Reads hand out clones so callers never alias guarded data.

use super::node::{BinaryHost, MediaNode, parse_outputs};
use super::stream::{StreamInstance, UnifiedStream};
use crate::core::protocol::{
    BufferState, Capabilities, GeoLocation, LoadMetrics, OperationalMode, StorageInfo,
    StreamStats, StreamStatus,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fallback per-viewer bandwidth estimate in bytes/s when a stream reports none.
const DEFAULT_VIEWER_BANDWIDTH: u64 = 131_072;
/// Bounds applied to the per-selection admission penalty.
const MIN_VIEWER_BANDWIDTH: u64 = 64 * 1024;
const MAX_VIEWER_BANDWIDTH: u64 = 1024 * 1024;

/// A consistent point-in-time copy of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: Vec<MediaNode>,
    /// stream -> node -> instance
    pub streams: HashMap<String, HashMap<String, StreamInstance>>,
}

/// Outcome of one staleness sweep pass.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub marked_inactive: Vec<String>,
    pub removed: Vec<String>,
    pub stale_total: usize,
}

#[derive(Debug, Default)]
pub struct StateStore {
    nodes: RwLock<HashMap<String, MediaNode>>,
    /// stream -> node -> instance
    streams: RwLock<HashMap<String, HashMap<String, StreamInstance>>>,
    unified: RwLock<HashMap<String, UnifiedStream>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates a node's heartbeat, creating a shell record if it is unknown.
    pub fn touch_node(&self, id: &str, healthy: bool) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| MediaNode::new(id.to_string()));
        node.is_healthy = healthy;
        node.is_active = true;
        node.last_update = Some(Instant::now());
    }

    /// Idempotent upsert of descriptive fields.
    pub fn set_node_info(
        &self,
        id: &str,
        base_url: &str,
        active: bool,
        location: Option<GeoLocation>,
        outputs_raw: &str,
    ) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| MediaNode::new(id.to_string()));
        if !base_url.is_empty() {
            node.base_url = base_url.to_string();
        }
        node.is_active = active;
        if location.is_some() {
            node.location = location;
        }
        if !outputs_raw.is_empty() {
            node.outputs_raw = outputs_raw.to_string();
            node.outputs = parse_outputs(outputs_raw);
        }
    }

    /// Records the peer address for same-host filtering plus tenant and
    /// cluster bindings learned at connection time.
    pub fn set_node_connection_info(
        &self,
        id: &str,
        peer_host: &str,
        tenant_id: Option<String>,
        cluster_id: Option<String>,
        labels: Vec<String>,
    ) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| MediaNode::new(id.to_string()));
        if let Some(host) = BinaryHost::parse(peer_host) {
            node.host = host;
        } else if !peer_host.is_empty() {
            warn!("Could not parse peer host '{}' for node {}", peer_host, id);
        }
        if tenant_id.is_some() {
            node.tenant_id = tenant_id.filter(|t| !t.is_empty());
        }
        if cluster_id.is_some() {
            node.cluster_id = cluster_id.filter(|c| !c.is_empty());
        }
        if !labels.is_empty() {
            node.labels = labels;
        }
    }

    /// Overwrites the raw load sample. Each call decays the admission penalty
    /// by a quarter so the bias from recent selections backs off exponentially.
    pub fn update_node_metrics(&self, id: &str, metrics: LoadMetrics) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| MediaNode::new(id.to_string()));
        node.metrics = metrics;
        node.add_bandwidth = node.add_bandwidth * 3 / 4;
        node.last_update = Some(Instant::now());
        node.is_active = true;
    }

    /// Applies capability, tag, and storage fields from a `NodeUpdate`.
    pub fn update_node_attributes(
        &self,
        id: &str,
        capabilities: Capabilities,
        tags: Vec<String>,
        configured_streams: Vec<String>,
        storage: Option<StorageInfo>,
    ) {
        let mut nodes = self.nodes.write();
        let node = nodes
            .entry(id.to_string())
            .or_insert_with(|| MediaNode::new(id.to_string()));
        node.capabilities = capabilities;
        node.tags = tags;
        node.configured_streams = configured_streams;
        if storage.is_some() {
            node.storage = storage;
        }
    }

    /// Sets the operational mode (admin action or registration resolution).
    pub fn set_node_mode(&self, id: &str, mode: OperationalMode) -> bool {
        let mut nodes = self.nodes.write();
        match nodes.get_mut(id) {
            Some(node) => {
                if node.mode != mode {
                    info!("Node {} operational mode -> {:?}", id, mode);
                }
                node.mode = mode;
                true
            }
            None => false,
        }
    }

    /// Marks a node disconnected and drops all of its stream instances.
    pub fn mark_node_disconnected(&self, id: &str) {
        {
            let mut nodes = self.nodes.write();
            if let Some(node) = nodes.get_mut(id) {
                node.is_active = false;
                node.is_healthy = false;
            }
        }
        let mut streams = self.streams.write();
        for instances in streams.values_mut() {
            instances.remove(id);
        }
        streams.retain(|_, instances| !instances.is_empty());
    }

    /// Replaces the set of stream instances a node reports in a `NodeUpdate`.
    /// Instances the node stopped reporting are dropped.
    pub fn update_node_stats(&self, node_id: &str, reported: &HashMap<String, StreamStats>) {
        let mut streams = self.streams.write();
        for (name, stats) in reported {
            let instance = streams
                .entry(name.clone())
                .or_default()
                .entry(node_id.to_string())
                .or_insert_with(|| StreamInstance::new(name, node_id));
            instance.apply_stats(stats);
            if instance.status == StreamStatus::Offline {
                instance.status = StreamStatus::Live;
            }
        }
        for (name, instances) in streams.iter_mut() {
            if !reported.contains_key(name) {
                instances.remove(node_id);
            }
        }
        streams.retain(|_, instances| !instances.is_empty());
    }

    /// Applies a health update to the unified stream view and the reporting
    /// node's instance.
    pub fn update_stream_from_buffer(
        &self,
        node_id: &str,
        internal_name: &str,
        status: StreamStatus,
        buffer_state: BufferState,
        has_issues: bool,
        issues: &str,
        stats: &StreamStats,
    ) {
        {
            let mut unified = self.unified.write();
            let entry = unified
                .entry(internal_name.to_string())
                .or_insert_with(|| UnifiedStream::new(internal_name));
            entry.status = status;
            entry.buffer_state = buffer_state;
            entry.has_issues = has_issues;
            entry.issues = issues.to_string();
            entry.last_update = Instant::now();
            if entry.primary_node.is_none() && stats.inputs > 0 {
                entry.primary_node = Some(node_id.to_string());
            }
        }

        let mut streams = self.streams.write();
        let instance = streams
            .entry(internal_name.to_string())
            .or_default()
            .entry(node_id.to_string())
            .or_insert_with(|| StreamInstance::new(internal_name, node_id));
        instance.apply_stats(stats);
        instance.status = status;

        // Union viewer count across all instances, taken under the streams
        // lock, then written back without holding both locks.
        let viewers: u64 = streams
            .get(internal_name)
            .map(|m| m.values().map(|i| i.viewers).sum())
            .unwrap_or(0);
        drop(streams);
        if let Some(entry) = self.unified.write().get_mut(internal_name) {
            entry.viewers = viewers;
        }
    }

    /// Merges free-form instance tags (`dvr_status`, `dvr_source_uri`, ...).
    pub fn update_stream_instance_info(
        &self,
        node_id: &str,
        internal_name: &str,
        info: &HashMap<String, String>,
    ) {
        if info.is_empty() {
            return;
        }
        let mut streams = self.streams.write();
        let instance = streams
            .entry(internal_name.to_string())
            .or_default()
            .entry(node_id.to_string())
            .or_insert_with(|| StreamInstance::new(internal_name, node_id));
        for (k, v) in info {
            instance.info.insert(k.clone(), v.clone());
        }
    }

    /// Binds a stream to the tenant that owns it.
    pub fn set_stream_tenant(&self, internal_name: &str, tenant_id: &str) {
        let mut unified = self.unified.write();
        let entry = unified
            .entry(internal_name.to_string())
            .or_insert_with(|| UnifiedStream::new(internal_name));
        entry.tenant_id = Some(tenant_id.to_string());
    }

    /// Returns a consistent `(streams, nodes)` pair observing all mutations
    /// ordered before this call.
    pub fn cluster_snapshot(&self) -> ClusterSnapshot {
        let nodes = self.nodes.read().values().cloned().collect();
        let streams = self.streams.read().clone();
        ClusterSnapshot { nodes, streams }
    }

    pub fn get_node(&self, id: &str) -> Option<MediaNode> {
        self.nodes.read().get(id).cloned()
    }

    pub fn get_unified_stream(&self, internal_name: &str) -> Option<UnifiedStream> {
        self.unified.read().get(internal_name).cloned()
    }

    pub fn get_stream_instances(&self, internal_name: &str) -> Vec<StreamInstance> {
        self.streams
            .read()
            .get(internal_name)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The node currently able to source a stream, preferring the unified
    /// view's primary node when it still qualifies.
    pub fn find_source_node(&self, internal_name: &str) -> Option<String> {
        let primary = self
            .unified
            .read()
            .get(internal_name)
            .and_then(|u| u.primary_node.clone());
        let streams = self.streams.read();
        let instances = streams.get(internal_name)?;
        if let Some(primary) = primary
            && instances.get(&primary).is_some_and(StreamInstance::is_source)
        {
            return Some(primary);
        }
        instances
            .values()
            .filter(|i| i.is_source())
            .map(|i| i.node_id.clone())
            .min()
    }

    /// Grows the winner's admission penalty after a selection so rapid
    /// concurrent arrivals spread across the fleet. The increment is the
    /// stream's per-viewer bandwidth when known, otherwise an estimate from
    /// the node's own throughput, otherwise the default, clamped either way.
    pub fn add_viewer(&self, node_id: &str, internal_name: &str) {
        let per_viewer = {
            let streams = self.streams.read();
            streams
                .get(internal_name)
                .and_then(|m| m.get(node_id))
                .map(|instance| {
                    if instance.bandwidth > 0 {
                        instance.bandwidth
                    } else if instance.viewers > 0 {
                        (instance.bytes_up + instance.bytes_down) / instance.viewers
                    } else {
                        DEFAULT_VIEWER_BANDWIDTH
                    }
                })
                .unwrap_or(DEFAULT_VIEWER_BANDWIDTH)
        };
        let per_viewer = per_viewer.clamp(MIN_VIEWER_BANDWIDTH, MAX_VIEWER_BANDWIDTH);

        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(node_id) {
            node.add_bandwidth = node.add_bandwidth.saturating_add(per_viewer);
            debug!(
                "Node {}: admission penalty now {} B/s after selection for '{}'",
                node_id, node.add_bandwidth, internal_name
            );
        }
    }

    /// One staleness pass: nodes idle past `inactive_after` are marked
    /// inactive, nodes idle past `remove_after` are evicted. Nodes that never
    /// produced an update have no baseline and are exempt.
    pub fn sweep_stale_nodes(
        &self,
        inactive_after: Duration,
        remove_after: Duration,
    ) -> SweepOutcome {
        let now = Instant::now();
        let mut outcome = SweepOutcome::default();
        {
            let mut nodes = self.nodes.write();
            nodes.retain(|id, node| {
                let Some(last) = node.last_update else {
                    return true;
                };
                let idle = now.duration_since(last);
                if idle >= remove_after {
                    outcome.removed.push(id.clone());
                    return false;
                }
                if idle >= inactive_after {
                    if node.is_active {
                        warn!(
                            "Node {} has been silent for {}s; marking inactive",
                            id,
                            idle.as_secs()
                        );
                        outcome.marked_inactive.push(id.clone());
                    }
                    node.is_active = false;
                }
                if !node.is_active {
                    outcome.stale_total += 1;
                }
                true
            });
        }
        if !outcome.removed.is_empty() {
            let mut streams = self.streams.write();
            for instances in streams.values_mut() {
                instances.retain(|node_id, _| !outcome.removed.contains(node_id));
            }
            streams.retain(|_, instances| !instances.is_empty());
        }
        outcome
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}
