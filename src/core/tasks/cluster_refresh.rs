// src/core/tasks/cluster_refresh.rs

//! Served-cluster refresh: periodically re-reads which clusters this instance
//! is assigned to serve and swaps the stable snapshot.

use crate::core::state::FoghornState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

const CADENCE: Duration = Duration::from_secs(60);

pub struct ServedClusterRefresh {
    state: Arc<FoghornState>,
}

impl ServedClusterRefresh {
    pub fn new(state: Arc<FoghornState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Served-cluster refresh started (every {}s).", CADENCE.as_secs());
        let mut interval = tokio::time::interval(CADENCE);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.refresh().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Served-cluster refresh shutting down.");
                    return;
                }
            }
        }
    }

    async fn refresh(&self) {
        match self
            .state
            .directory
            .assigned_clusters(&self.state.instance_id)
            .await
        {
            Ok(mut clusters) => {
                // The home cluster is always served.
                if !clusters.contains(&self.state.cluster_id) {
                    clusters.insert(0, self.state.cluster_id.clone());
                }
                let current = self.state.served_clusters();
                if *current != clusters {
                    info!("Served clusters now {:?}", clusters);
                    self.state.set_served_clusters(clusters);
                }
            }
            Err(e) => {
                debug!("Served-cluster read failed, keeping last snapshot: {}", e);
            }
        }
    }
}
