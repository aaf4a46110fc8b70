// src/core/tasks/orphan.rs

//! Orphan cleanup: artifacts marked deleted that still have warm copies on
//! nodes get chased with delete commands through the relay.

use crate::core::artifacts::ArtifactKind;
use crate::core::protocol::ControllerMessage;
use crate::core::state::FoghornState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CADENCE: Duration = Duration::from_secs(600);

pub struct OrphanCleanup {
    state: Arc<FoghornState>,
}

impl OrphanCleanup {
    pub fn new(state: Arc<FoghornState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Orphan cleanup started (every {}s).", CADENCE.as_secs());
        let mut interval = tokio::time::interval(CADENCE);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.cleanup_pass().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Orphan cleanup shutting down.");
                    return;
                }
            }
        }
    }

    async fn cleanup_pass(&self) {
        let orphans = self.state.artifacts.deleted_with_placements();
        if orphans.is_empty() {
            return;
        }
        info!(
            "Orphan cleanup chasing {} deleted artifact(s) with live placements.",
            orphans.len()
        );

        for (artifact, placements) in orphans {
            for placement in placements {
                let command = match artifact.kind {
                    ArtifactKind::Clip => ControllerMessage::ClipDeleteRequest {
                        hash: artifact.hash.clone(),
                    },
                    ArtifactKind::Dvr => ControllerMessage::DvrDeleteRequest {
                        hash: artifact.hash.clone(),
                    },
                    ArtifactKind::Vod => ControllerMessage::VodDeleteRequest {
                        hash: artifact.hash.clone(),
                    },
                };
                match self
                    .state
                    .relay
                    .send_to_node(&placement.node_id, command)
                    .await
                {
                    Ok(()) => debug!(
                        "Requested deletion of {} from {}",
                        artifact.hash, placement.node_id
                    ),
                    Err(e) => warn!(
                        "Could not reach {} to delete {}: {}",
                        placement.node_id, artifact.hash, e
                    ),
                }
            }
        }
    }
}
