// src/core/workflows/dvr.rs

//! DVR recording: the three-party handshake between the ingest node, the
//! controller, and the storage node that writes the recording.

use crate::config::DvrConfig;
use crate::core::FoghornError;
use crate::core::artifacts::{Artifact, ArtifactKind, ArtifactStatus, ArtifactStore};
use crate::core::clients::BusinessRegistry;
use crate::core::events::{AnalyticsEvent, EventBus};
use crate::core::metrics::DVR_STARTS_TOTAL;
use crate::core::protocol::{
    AssetType, ControllerMessage, DvrNotReadyReason, DvrSettings, OperationalMode,
};
use crate::core::relay::CommandRelay;
use crate::core::state::{MediaNode, StateStore};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A terminal report that arrived before its artifact row existed, kept until
/// the row appears (the stream may end before DVR registration lands).
#[derive(Debug, Clone)]
struct PendingStop {
    status: String,
    manifest_path: String,
    duration_seconds: u64,
    size_bytes: u64,
    error: String,
}

#[derive(Debug)]
pub struct DvrEngine {
    artifacts: Arc<ArtifactStore>,
    store: Arc<StateStore>,
    relay: Arc<CommandRelay>,
    registry: Arc<dyn BusinessRegistry>,
    events: EventBus,
    config: DvrConfig,
    retention_days: u32,
    pending_stops: Mutex<HashMap<String, PendingStop>>,
}

impl DvrEngine {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        store: Arc<StateStore>,
        relay: Arc<CommandRelay>,
        registry: Arc<dyn BusinessRegistry>,
        events: EventBus,
        config: DvrConfig,
        retention_days: u32,
    ) -> Self {
        Self {
            artifacts,
            store,
            relay,
            registry,
            events,
            config,
            retention_days,
            pending_stops: Mutex::new(HashMap::new()),
        }
    }

    fn settings(&self) -> DvrSettings {
        DvrSettings {
            enabled: self.config.enabled,
            retention_days: self.config.retention_days,
            format: self.config.format.clone(),
            segment_duration: self.config.segment_duration,
        }
    }

    /// Handles an ingest node's request to start recording a stream: register
    /// a hash, pick a storage node, create the artifact row, and hand the
    /// storage node its start command.
    pub async fn start_dvr(
        &self,
        ingest_node_id: &str,
        internal_name: &str,
        tenant_id: &str,
        user_id: &str,
        provided_hash: Option<String>,
    ) -> Result<String, FoghornError> {
        let dvr_hash = match provided_hash.filter(|h| !h.is_empty()) {
            Some(hash) => hash,
            None => {
                self.registry
                    .register_dvr(internal_name, tenant_id, user_id)
                    .await?
            }
        };

        let storage_node = self
            .find_storage_node_for_dvr()
            .ok_or(FoghornError::NoCapableNodes)?;

        let mut artifact = Artifact::new(&dvr_hash, ArtifactKind::Dvr, internal_name, tenant_id);
        artifact.user_id = user_id.to_string();
        artifact.format = self.config.format.clone();
        artifact.retention_until =
            Some(Utc::now() + ChronoDuration::days(i64::from(self.retention_days)));
        self.artifacts.insert(artifact);

        // The row now exists; a stop that raced registration can land.
        self.apply_pending_stop(&dvr_hash);

        let source_url = self
            .source_uri_for(internal_name)
            .ok_or(FoghornError::NoStreamSource)
            .inspect(|uri| debug!("DVR {} source resolved to {}", dvr_hash, uri));
        let source_url = match source_url {
            Ok(uri) => uri,
            Err(e) => {
                // No usable source means nothing to record; revert the row.
                self.artifacts.update_status(&dvr_hash, ArtifactStatus::Failed);
                return Err(e);
            }
        };

        let command = ControllerMessage::DvrStartRequest {
            dvr_hash: dvr_hash.clone(),
            source_url,
            config: self.settings(),
        };
        if let Err(e) = self.relay.send_to_node(&storage_node.id, command).await {
            self.artifacts.update_status(&dvr_hash, ArtifactStatus::Failed);
            warn!(
                "DVR {} start dispatch to {} failed: {}",
                dvr_hash, storage_node.id, e
            );
            return Err(e);
        }

        DVR_STARTS_TOTAL.inc();
        info!(
            "DVR {} for '{}' recording on {} (requested by {})",
            dvr_hash, internal_name, storage_node.id, ingest_node_id
        );
        Ok(dvr_hash)
    }

    /// Picks the storage node with the most headroom: free disk, free RAM,
    /// and a bonus for CPU under 80%.
    pub fn find_storage_node_for_dvr(&self) -> Option<MediaNode> {
        let snapshot = self.store.cluster_snapshot();
        snapshot
            .nodes
            .into_iter()
            .filter(|n| {
                n.capabilities.storage
                    && n.is_healthy
                    && n.is_active
                    && n.mode == OperationalMode::Normal
            })
            .map(|n| {
                let free_gb = n
                    .storage
                    .as_ref()
                    .map(|s| s.capacity_bytes.saturating_sub(s.used_bytes) / 1_000_000_000)
                    .unwrap_or(0);
                let free_ram_gb =
                    n.metrics.ram_max_mib.saturating_sub(n.metrics.ram_used_mib) / 1024;
                let cpu_bonus = if n.metrics.cpu_tenths <= 800 {
                    // 0 at 80% busy, 20 when idle.
                    (800 - n.metrics.cpu_tenths) / 40
                } else {
                    0
                };
                (free_gb + free_ram_gb + cpu_bonus, n)
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.id.cmp(&a.1.id)))
            .map(|(_, n)| n)
    }

    /// Answers a storage node's readiness probe. Synchronous on the stream:
    /// the caller sends the reply frame back on the same connection.
    pub fn on_ready_request(&self, dvr_hash: &str) -> ControllerMessage {
        let decline = |reason| ControllerMessage::DvrReadyResponse {
            dvr_hash: dvr_hash.to_string(),
            ready: false,
            reason: Some(reason),
            source_uri: String::new(),
            config: None,
        };

        let Some(artifact) = self.artifacts.get(dvr_hash) else {
            return decline(DvrNotReadyReason::DvrRequestNotFound);
        };
        let Some(unified) = self.store.get_unified_stream(&artifact.internal_name) else {
            return decline(DvrNotReadyReason::StreamNotTracked);
        };

        use crate::core::protocol::StreamStatus;
        if unified.has_issues {
            return decline(DvrNotReadyReason::StreamUnhealthy);
        }
        match unified.status {
            StreamStatus::Offline | StreamStatus::Stopping => {
                return decline(DvrNotReadyReason::StreamOffline);
            }
            StreamStatus::Starting => return decline(DvrNotReadyReason::StreamBooting),
            StreamStatus::Live => {}
        }
        if !unified.is_dvr_ready() {
            // Live but the buffer has not filled yet.
            return decline(DvrNotReadyReason::StreamBooting);
        }

        let Some(source_uri) = self.source_uri_for(&artifact.internal_name) else {
            return decline(DvrNotReadyReason::StreamSourceMissing);
        };

        ControllerMessage::DvrReadyResponse {
            dvr_hash: dvr_hash.to_string(),
            ready: true,
            reason: None,
            source_uri,
            config: Some(self.settings()),
        }
    }

    pub fn on_progress(&self, dvr_hash: &str, status: &str, segment_count: u64, size_bytes: u64) {
        if !self.artifacts.record_progress(dvr_hash, segment_count, size_bytes) {
            debug!("DVR progress for unknown hash {}", dvr_hash);
            return;
        }
        debug!(
            "DVR {} progress: {} ({} segments, {} bytes)",
            dvr_hash, status, segment_count, size_bytes
        );
    }

    /// Applies a terminal report, deferring it when the row does not exist yet.
    pub fn on_stopped(
        &self,
        dvr_hash: &str,
        status: &str,
        manifest_path: &str,
        duration_seconds: u64,
        size_bytes: u64,
        error: &str,
    ) {
        if !self.artifacts.contains(dvr_hash) {
            debug!(
                "DVR stop for {} arrived before its row; deferring",
                dvr_hash
            );
            self.pending_stops.lock().insert(
                dvr_hash.to_string(),
                PendingStop {
                    status: status.to_string(),
                    manifest_path: manifest_path.to_string(),
                    duration_seconds,
                    size_bytes,
                    error: error.to_string(),
                },
            );
            return;
        }
        self.apply_stop(dvr_hash, status, manifest_path, duration_seconds, size_bytes, error);
    }

    fn apply_pending_stop(&self, dvr_hash: &str) {
        let pending = self.pending_stops.lock().remove(dvr_hash);
        if let Some(stop) = pending {
            debug!("Replaying deferred DVR stop for {}", dvr_hash);
            self.apply_stop(
                dvr_hash,
                &stop.status,
                &stop.manifest_path,
                stop.duration_seconds,
                stop.size_bytes,
                &stop.error,
            );
        }
    }

    fn apply_stop(
        &self,
        dvr_hash: &str,
        status: &str,
        manifest_path: &str,
        duration_seconds: u64,
        size_bytes: u64,
        error: &str,
    ) {
        let mapped = match status {
            "success" => ArtifactStatus::Completed,
            "stopped" => ArtifactStatus::Stopped,
            "deleted" => ArtifactStatus::Deleted,
            _ => ArtifactStatus::Failed,
        };
        self.artifacts
            .finish(dvr_hash, mapped, manifest_path, duration_seconds, size_bytes);
        if mapped == ArtifactStatus::Failed && !error.is_empty() {
            warn!("DVR {} failed: {}", dvr_hash, error);
        } else {
            info!("DVR {} finished as {:?}", dvr_hash, mapped);
        }

        let artifact = self.artifacts.get(dvr_hash);
        let (internal_name, tenant_id) = artifact
            .map(|a| (a.internal_name, a.tenant_id))
            .unwrap_or_default();
        if mapped == ArtifactStatus::Deleted {
            self.events.publish(AnalyticsEvent::ArtifactDeleted {
                hash: dvr_hash.to_string(),
                asset_type: AssetType::Dvr,
                internal_name,
                tenant_id,
                cause: "node_reported".to_string(),
            });
        } else {
            self.events.publish(AnalyticsEvent::ArtifactStopped {
                hash: dvr_hash.to_string(),
                asset_type: AssetType::Dvr,
                internal_name,
                tenant_id,
                status: status.to_string(),
                duration_seconds,
                size_bytes,
            });
        }
    }

    /// The DTSC source URI for a stream, from the current source node's
    /// advertised output template (`dtsc://HOST/$`).
    fn source_uri_for(&self, internal_name: &str) -> Option<String> {
        let source_id = self.store.find_source_node(internal_name)?;
        let node = self.store.get_node(&source_id)?;
        let wire_name = format!("live+{internal_name}");
        node.output_url("DTSC", &wire_name).or_else(|| {
            let host = node.advertise_host();
            (!host.is_empty()).then(|| format!("dtsc://{host}/{wire_name}"))
        })
    }
}
