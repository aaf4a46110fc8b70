// src/core/balancer/score.rs

//! The weighted multi-factor node score.

use super::geo;
use super::tags::{TagAdjustment, total_adjustment};
use crate::config::BalancerWeights;
use crate::core::state::{BinaryHost, MediaNode, StreamInstance};
use std::collections::HashMap;

/// Inputs that vary per request rather than per node.
#[derive(Debug, Clone, Default)]
pub struct ScoreRequest<'a> {
    /// Internal stream name; empty for stream-agnostic selection.
    pub stream: &'a str,
    /// Viewer coordinates; zeros skip the geo component.
    pub lat: f64,
    pub lon: f64,
    pub tag_adjust: &'a [TagAdjustment],
    /// Viewer host for the same-host filter; `None` disables it.
    pub client_host: Option<BinaryHost>,
    /// Require the node to hold the stream as an ingest source.
    pub require_source: bool,
}

/// Why a node scored zero. Selection errors are derived from the dominant
/// rejection across all candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rejection {
    NoCapacity,
    NotASource,
    NotAllowed,
    SameHost,
}

/// Computes the score for one candidate node given the stream's instances on
/// it. Returns `Err` with the rejection reason instead of a zero score so the
/// caller can report the right failure mode.
pub fn score_node(
    weights: &BalancerWeights,
    node: &MediaNode,
    instances: &HashMap<String, StreamInstance>,
    req: &ScoreRequest<'_>,
) -> Result<u64, Rejection> {
    // Hard eligibility: a node that never reported RAM or bandwidth limits is
    // not selectable, and the admission penalty counts against the limit.
    if node.metrics.ram_max_mib == 0 || !node.has_bandwidth_headroom() {
        return Err(Rejection::NoCapacity);
    }

    let instance = instances.get(&node.id);

    if !req.stream.is_empty() {
        if req.require_source {
            let viable = instance.is_some_and(|i| i.inputs > 0 && !i.replicated);
            if !viable {
                return Err(Rejection::NotASource);
            }
        }
        if !node.allows_stream(req.stream) {
            return Err(Rejection::NotAllowed);
        }
        // Never route a viewer to a source on their own machine.
        if let Some(client) = req.client_host
            && !node.host.is_unspecified()
            && node.host == client
        {
            return Err(Rejection::SameHost);
        }
    }

    let m = &node.metrics;
    let cpu_score = weights
        .cpu
        .saturating_sub(m.cpu_tenths.saturating_mul(weights.cpu) / 1000);
    let ram_score = weights
        .ram
        .saturating_sub(m.ram_used_mib.saturating_mul(weights.ram) / m.ram_max_mib);
    let bw_score = weights.bw.saturating_sub(
        (m.up_speed + node.add_bandwidth).saturating_mul(weights.bw) / m.bw_limit,
    );

    let geo_score = match &node.location {
        Some(loc)
            if geo::has_coordinates(req.lat, req.lon) && geo::has_coordinates(loc.lat, loc.lon) =>
        {
            let d = geo::normalized_distance(req.lat, req.lon, loc.lat, loc.lon);
            weights.geo.saturating_sub((weights.geo as f64 * d) as u64)
        }
        _ => 0,
    };

    let stream_bonus = if !req.stream.is_empty() && instance.is_some() {
        weights.stream_bonus
    } else {
        0
    };

    let base = cpu_score + ram_score + bw_score + geo_score + stream_bonus;
    let adjusted = base as i64 + total_adjustment(&node.tags, req.tag_adjust);
    Ok(adjusted.max(0) as u64)
}

/// Reference capacity assumed for cross-cluster candidates that advertise
/// availability but report no live metrics: 1 Gbps in bytes/s.
pub const REMOTE_REFERENCE_BANDWIDTH: u64 = 125_000_000;

/// A cross-cluster edge candidate as advertised by a peer cluster.
#[derive(Debug, Clone)]
pub struct RemoteEdge {
    pub node_id: String,
    pub base_url: String,
    pub lat: f64,
    pub lon: f64,
    /// Advertised spare bandwidth in bytes/s.
    pub available_bandwidth: u64,
    pub ram_max_mib: u64,
    pub ram_used_mib: u64,
    pub cpu_tenths: u64,
}

/// Scores remote edges with the same component formula, substituting the
/// reference capacity for the live bandwidth limit. Candidates with no spare
/// bandwidth or no reported RAM are dropped.
pub fn score_remote_edges(
    weights: &BalancerWeights,
    lat: f64,
    lon: f64,
    candidates: &[RemoteEdge],
) -> Vec<(RemoteEdge, u64)> {
    let mut scored: Vec<(RemoteEdge, u64)> = candidates
        .iter()
        .filter(|c| c.available_bandwidth > 0 && c.ram_max_mib > 0)
        .map(|c| {
            let used = REMOTE_REFERENCE_BANDWIDTH.saturating_sub(c.available_bandwidth);
            let cpu_score = weights
                .cpu
                .saturating_sub(c.cpu_tenths.saturating_mul(weights.cpu) / 1000);
            let ram_score = weights
                .ram
                .saturating_sub(c.ram_used_mib.saturating_mul(weights.ram) / c.ram_max_mib);
            let bw_score = weights
                .bw
                .saturating_sub(used.saturating_mul(weights.bw) / REMOTE_REFERENCE_BANDWIDTH);
            let geo_score =
                if geo::has_coordinates(lat, lon) && geo::has_coordinates(c.lat, c.lon) {
                    let d = geo::normalized_distance(lat, lon, c.lat, c.lon);
                    weights.geo.saturating_sub((weights.geo as f64 * d) as u64)
                } else {
                    0
                };
            (c.clone(), cpu_score + ram_score + bw_score + geo_score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.node_id.cmp(&b.0.node_id)));
    scored
}
