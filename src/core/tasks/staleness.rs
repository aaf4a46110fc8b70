// src/core/tasks/staleness.rs

//! The node staleness sweep: marks silent nodes inactive and eventually
//! evicts them, releasing any owner record this instance still holds.

use crate::core::events::AnalyticsEvent;
use crate::core::metrics::STALE_NODES;
use crate::core::state::FoghornState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

pub struct StalenessSweeper {
    state: Arc<FoghornState>,
}

impl StalenessSweeper {
    pub fn new(state: Arc<FoghornState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let (poll, inactive_after, remove_after) = {
            let config = self.state.config.lock().await;
            (
                Duration::from_secs(config.health.poll_interval_secs),
                Duration::from_secs(config.health.inactive_after_secs),
                Duration::from_secs(config.health.remove_after_secs),
            )
        };
        info!(
            "Staleness sweeper started (every {}s; inactive after {}s, removed after {}s).",
            poll.as_secs(),
            inactive_after.as_secs(),
            remove_after.as_secs()
        );
        let mut interval = tokio::time::interval(poll);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep(inactive_after, remove_after).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Staleness sweeper shutting down.");
                    return;
                }
            }
        }
    }

    async fn sweep(&self, inactive_after: Duration, remove_after: Duration) {
        let outcome = self
            .state
            .store
            .sweep_stale_nodes(inactive_after, remove_after);
        STALE_NODES.set(outcome.stale_total as f64);

        for node_id in &outcome.removed {
            info!("Evicting node {} after prolonged silence", node_id);
            self.state.events.publish(AnalyticsEvent::NodeLifecycle {
                node_id: node_id.clone(),
                online: false,
            });
            match self
                .state
                .directory
                .release_if_owner(&self.state.cluster_id, node_id, &self.state.instance_id)
                .await
            {
                Ok(true) => debug!("Released owner record for evicted node {}", node_id),
                Ok(false) => {}
                Err(e) => debug!("Owner release for evicted {} failed: {}", node_id, e),
            }
        }
    }
}
