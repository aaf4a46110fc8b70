// src/core/balancer/select.rs

//! Node selection: request-scoped filters, ranking, and tie-breaks over the
//! state store.

use super::score::{Rejection, ScoreRequest, score_node};
use super::tags::TagAdjustment;
use crate::config::BalancerWeights;
use crate::core::FoghornError;
use crate::core::metrics::{SELECTIONS_TOTAL, SELECTION_SECONDS};
use crate::core::protocol::OperationalMode;
use crate::core::state::{BinaryHost, StateStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// The capability a request demands from candidate nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Ingest,
    Edge,
    Storage,
    Processing,
}

/// Request-scoped filters derived from the caller's context.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub capability: Option<Capability>,
    /// Tenant scope: keep that tenant's nodes plus untenanted shared infra.
    pub cluster_scope: Option<String>,
}

/// One ranked candidate.
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node_id: String,
    pub host: String,
    pub score: u64,
    pub lat: f64,
    pub lon: f64,
    pub location: String,
}

/// The weighted multi-factor load balancer.
#[derive(Debug)]
pub struct Balancer {
    store: Arc<StateStore>,
    weights: BalancerWeights,
    /// Nodes whose last update is older than this are not candidates.
    staleness: Duration,
}

impl Balancer {
    pub fn new(store: Arc<StateStore>, weights: BalancerWeights, staleness: Duration) -> Self {
        Self {
            store,
            weights,
            staleness,
        }
    }

    /// Returns the best node's public host for a stream request, biasing
    /// subsequent selections away from the winner.
    pub fn get_best_node(
        &self,
        ctx: &SelectionContext,
        stream: &str,
        lat: f64,
        lon: f64,
        tag_adjust: &[TagAdjustment],
        client_ip: &str,
    ) -> Result<String, FoghornError> {
        self.get_best_node_with_score(ctx, stream, lat, lon, tag_adjust, client_ip)
            .map(|best| best.host)
    }

    /// Like [`Self::get_best_node`], but exposes the winning score and
    /// location for callers that blend local and remote candidates.
    pub fn get_best_node_with_score(
        &self,
        ctx: &SelectionContext,
        stream: &str,
        lat: f64,
        lon: f64,
        tag_adjust: &[TagAdjustment],
        client_ip: &str,
    ) -> Result<NodeScore, FoghornError> {
        let require_source = !stream.is_empty();
        let ranked =
            self.get_top_nodes_with_scores(ctx, stream, lat, lon, tag_adjust, client_ip, 1, require_source)?;
        let best = ranked
            .into_iter()
            .next()
            .ok_or(FoghornError::OutOfCapacity)?;
        if !stream.is_empty() {
            self.store.add_viewer(&best.node_id, stream);
        }
        SELECTIONS_TOTAL.with_label_values(&["ok"]).inc();
        Ok(best)
    }

    /// The full selection pass: context filters in order (capability, cluster
    /// scope, staleness), then rank by score with a deterministic tie-break
    /// (binary host ascending, then node id).
    #[allow(clippy::too_many_arguments)]
    pub fn get_top_nodes_with_scores(
        &self,
        ctx: &SelectionContext,
        stream: &str,
        lat: f64,
        lon: f64,
        tag_adjust: &[TagAdjustment],
        client_ip: &str,
        k: usize,
        require_source: bool,
    ) -> Result<Vec<NodeScore>, FoghornError> {
        let started = Instant::now();
        let snapshot = self.store.cluster_snapshot();
        let instances = snapshot.streams.get(stream).cloned().unwrap_or_default();

        // 1. Capability filter.
        let mut candidates = snapshot.nodes;
        if let Some(capability) = ctx.capability {
            candidates.retain(|n| match capability {
                Capability::Ingest => n.capabilities.ingest,
                Capability::Edge => n.capabilities.edge,
                Capability::Storage => n.capabilities.storage,
                Capability::Processing => n.capabilities.processing,
            });
            if candidates.is_empty() {
                SELECTIONS_TOTAL.with_label_values(&["no_capability"]).inc();
                return Err(FoghornError::NoCapableNodes);
            }
        }

        // 2. Cluster scope: the tenant's own nodes plus shared infrastructure.
        if let Some(scope) = &ctx.cluster_scope {
            candidates.retain(|n| match &n.tenant_id {
                Some(tenant) => tenant == scope,
                None => true,
            });
        }

        // 3. Staleness: no baseline update, a stale baseline, or a node
        // administratively out of rotation all disqualify.
        let now = Instant::now();
        candidates.retain(|n| {
            n.is_active
                && n.mode == OperationalMode::Normal
                && n.last_update
                    .is_some_and(|last| now.duration_since(last) < self.staleness)
        });

        let client_host = if client_ip.is_empty() {
            None
        } else {
            BinaryHost::parse(client_ip)
        };
        let req = ScoreRequest {
            stream,
            lat,
            lon,
            tag_adjust,
            client_host,
            require_source,
        };

        // 4. Score and rank.
        let mut rejections: HashMap<Rejection, usize> = HashMap::new();
        let mut ranked: Vec<NodeScore> = Vec::new();
        for node in &candidates {
            match score_node(&self.weights, node, &instances, &req) {
                Ok(score) if score > 0 => {
                    let (node_lat, node_lon, location) = node
                        .location
                        .as_ref()
                        .map(|l| (l.lat, l.lon, l.name().to_string()))
                        .unwrap_or((0.0, 0.0, String::new()));
                    ranked.push(NodeScore {
                        node_id: node.id.clone(),
                        host: node.advertise_host(),
                        score,
                        lat: node_lat,
                        lon: node_lon,
                        location,
                    });
                }
                Ok(_) => {
                    *rejections.entry(Rejection::NoCapacity).or_default() += 1;
                }
                Err(why) => {
                    *rejections.entry(why).or_default() += 1;
                }
            }
        }

        SELECTION_SECONDS.observe(started.elapsed().as_secs_f64());

        if ranked.is_empty() {
            debug!(
                "Selection for '{}' found no usable node among {} candidates ({:?})",
                stream,
                candidates.len(),
                rejections
            );
            if require_source
                && rejections.get(&Rejection::NotASource).copied().unwrap_or(0) > 0
            {
                SELECTIONS_TOTAL.with_label_values(&["no_source"]).inc();
                return Err(FoghornError::NoStreamSource);
            }
            SELECTIONS_TOTAL.with_label_values(&["out_of_capacity"]).inc();
            return Err(FoghornError::OutOfCapacity);
        }

        let hosts: HashMap<&str, BinaryHost> = candidates
            .iter()
            .map(|n| (n.id.as_str(), n.host))
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| {
                    let ha = hosts.get(a.node_id.as_str()).copied().unwrap_or(BinaryHost::UNSPECIFIED);
                    let hb = hosts.get(b.node_id.as_str()).copied().unwrap_or(BinaryHost::UNSPECIFIED);
                    ha.cmp(&hb)
                })
                .then_with(|| a.node_id.cmp(&b.node_id))
        });
        ranked.truncate(k.max(1));
        Ok(ranked)
    }
}
