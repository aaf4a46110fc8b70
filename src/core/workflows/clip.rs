// src/core/workflows/clip.rs

//! Clip extraction: request-id-threaded progress into the clip's durable row.

use crate::core::artifacts::{ArtifactStatus, ArtifactStore};
use crate::core::events::{AnalyticsEvent, EventBus};
use crate::core::protocol::AssetType;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct ClipEngine {
    artifacts: Arc<ArtifactStore>,
    events: EventBus,
    /// request_id -> clip hash; populated when a pull is dispatched.
    requests: DashMap<String, String>,
}

impl ClipEngine {
    pub fn new(artifacts: Arc<ArtifactStore>, events: EventBus) -> Self {
        Self {
            artifacts,
            events,
            requests: DashMap::new(),
        }
    }

    /// Ties a dispatched `ClipPullRequest` to its artifact row so progress
    /// reports can find it.
    pub fn track_request(&self, request_id: &str, hash: &str) {
        self.requests
            .insert(request_id.to_string(), hash.to_string());
    }

    pub fn on_progress(&self, request_id: &str, percent: u32, message: &str) {
        let Some(hash) = self.requests.get(request_id).map(|h| h.clone()) else {
            debug!("Clip progress for unknown request {}", request_id);
            return;
        };
        debug!("Clip {} ({}%): {}", hash, percent, message);
        if percent > 0 {
            self.artifacts.update_status(&hash, ArtifactStatus::Recording);
        }
    }

    pub fn on_done(
        &self,
        node_id: &str,
        request_id: &str,
        file_path: &str,
        size_bytes: u64,
        status: &str,
        error: &str,
    ) {
        let Some((_, hash)) = self.requests.remove(request_id) else {
            debug!("Clip completion for unknown request {}", request_id);
            return;
        };
        let mapped = if status == "success" {
            ArtifactStatus::Completed
        } else {
            ArtifactStatus::Failed
        };
        self.artifacts.finish(&hash, mapped, "", 0, size_bytes);
        if mapped == ArtifactStatus::Completed {
            if !file_path.is_empty() {
                self.artifacts.add_node_artifact(&hash, node_id, "");
            }
            info!("Clip {} ready at {} ({} bytes)", hash, file_path, size_bytes);
        } else {
            warn!("Clip {} failed on {}: {}", hash, node_id, error);
        }

        let (internal_name, tenant_id) = self
            .artifacts
            .get(&hash)
            .map(|a| (a.internal_name, a.tenant_id))
            .unwrap_or_default();
        self.events.publish(AnalyticsEvent::ArtifactStopped {
            hash,
            asset_type: AssetType::Clip,
            internal_name,
            tenant_id,
            status: status.to_string(),
            duration_seconds: 0,
            size_bytes,
        });
    }
}
