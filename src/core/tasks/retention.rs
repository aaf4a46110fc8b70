// src/core/tasks/retention.rs

//! Retention expiry: hourly, first run delayed after boot, expiring artifacts
//! past their retention timestamp (or the default window when they have none)
//! and emitting a typed deletion event per row.

use crate::core::artifacts::{ArtifactKind, ArtifactStatus};
use crate::core::events::AnalyticsEvent;
use crate::core::metrics::RETENTION_EXPIRED_TOTAL;
use crate::core::protocol::AssetType;
use crate::core::state::FoghornState;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const BOOT_DELAY: Duration = Duration::from_secs(300);
const CADENCE: Duration = Duration::from_secs(3600);

pub struct RetentionJob {
    state: Arc<FoghornState>,
}

impl RetentionJob {
    pub fn new(state: Arc<FoghornState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        // Let the fleet reconnect before the first pass.
        tokio::select! {
            _ = tokio::time::sleep(BOOT_DELAY) => {}
            _ = shutdown_rx.recv() => return,
        }
        info!("Retention job started (hourly).");
        let mut interval = tokio::time::interval(CADENCE);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.expire_pass().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Retention job shutting down.");
                    return;
                }
            }
        }
    }

    async fn expire_pass(&self) {
        let default_retention = {
            let config = self.state.config.lock().await;
            ChronoDuration::days(i64::from(config.storage.default_retention_days))
        };
        let expired = self.state.artifacts.expired(Utc::now(), default_retention);
        if expired.is_empty() {
            debug!("Retention pass found nothing to expire.");
            return;
        }
        info!("Retention pass expiring {} artifact(s).", expired.len());

        for artifact in expired {
            self.state
                .artifacts
                .update_status(&artifact.hash, ArtifactStatus::Deleted);
            RETENTION_EXPIRED_TOTAL.inc();

            // Enrich from the business registry where the row is sparse.
            let tenant_id = if artifact.tenant_id.is_empty() {
                let resolved = match artifact.kind {
                    ArtifactKind::Clip => self.state.registry.resolve_clip_hash(&artifact.hash).await,
                    ArtifactKind::Dvr => self.state.registry.resolve_dvr_hash(&artifact.hash).await,
                    ArtifactKind::Vod => self.state.registry.resolve_vod_hash(&artifact.hash).await,
                };
                resolved.map(|r| r.tenant_id).unwrap_or_default()
            } else {
                artifact.tenant_id.clone()
            };

            let asset_type = match artifact.kind {
                ArtifactKind::Clip => AssetType::Clip,
                ArtifactKind::Dvr => AssetType::Dvr,
                ArtifactKind::Vod => AssetType::Vod,
            };
            self.state.events.publish(AnalyticsEvent::ArtifactDeleted {
                hash: artifact.hash,
                asset_type,
                internal_name: artifact.internal_name,
                tenant_id,
                cause: "expired".to_string(),
            });
        }
    }
}
