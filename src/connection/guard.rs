// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for control-stream cleanup.

use crate::core::events::AnalyticsEvent;
use crate::core::metrics;
use crate::core::state::FoghornState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

/// Ensures a node's resources are released however its handler exits: the
/// connection map entry, the state-store liveness, and the shared-directory
/// owner record.
pub struct ConnectionGuard {
    state: Arc<FoghornState>,
    session_id: u64,
    addr: SocketAddr,
    /// Set once registration succeeds; cleanup is a no-op before that.
    node_id: Option<String>,
}

impl ConnectionGuard {
    pub(crate) fn new(state: Arc<FoghornState>, session_id: u64, addr: SocketAddr) -> Self {
        Self {
            state,
            session_id,
            addr,
            node_id: None,
        }
    }

    /// Arms the guard after a successful Register.
    pub(crate) fn set_registered(&mut self, node_id: &str) {
        self.node_id = Some(node_id.to_string());
        metrics::CONNECTED_NODES.inc();
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let Some(node_id) = self.node_id.take() else {
            debug!(
                "Connection from {} closed before completing registration",
                self.addr
            );
            return;
        };

        metrics::CONNECTED_NODES.dec();

        // Only tear down if this session still owns the registry entry; a
        // reconnect may have displaced it already.
        let still_owner = self.state.connections.remove(&node_id, self.session_id);
        if !still_owner {
            debug!(
                "Session {} for node {} was already displaced; skipping state cleanup",
                self.session_id, node_id
            );
            return;
        }

        info!("Node {} disconnected ({})", node_id, self.addr);
        self.state.store.mark_node_disconnected(&node_id);
        self.state.events.publish(AnalyticsEvent::NodeLifecycle {
            node_id: node_id.clone(),
            online: false,
        });

        // The owner record release talks to the shared directory; Drop cannot
        // await, so hand it to the runtime.
        let state = self.state.clone();
        tokio::spawn(async move {
            match state
                .directory
                .release_if_owner(&state.cluster_id, &node_id, &state.instance_id)
                .await
            {
                Ok(true) => debug!("Released owner record for {}", node_id),
                Ok(false) => debug!("Owner record for {} was already claimed elsewhere", node_id),
                Err(e) => debug!("Owner record release for {} failed: {}", node_id, e),
            }
        });
    }
}
