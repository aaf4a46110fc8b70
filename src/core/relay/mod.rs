// src/core/relay/mod.rs

//! The cross-instance command relay: every outbound node command resolves its
//! owner and is either dispatched on the local stream or forwarded to the
//! peer controller that holds it.

pub mod client;
pub mod server;

pub use client::PeerPool;

use crate::connection::ConnectionRegistry;
use crate::core::FoghornError;
use crate::core::directory::OwnerDirectory;
use crate::core::metrics::RELAY_FORWARDS_TOTAL;
use crate::core::protocol::ControllerMessage;
use std::sync::Arc;
use tracing::{debug, warn};

/// The two-step resolver in front of every `send_*` to a node.
#[derive(Debug)]
pub struct CommandRelay {
    instance_id: String,
    cluster_id: String,
    connections: Arc<ConnectionRegistry>,
    directory: Arc<dyn OwnerDirectory>,
    peers: PeerPool,
}

impl CommandRelay {
    pub fn new(
        instance_id: String,
        cluster_id: String,
        connections: Arc<ConnectionRegistry>,
        directory: Arc<dyn OwnerDirectory>,
    ) -> Self {
        Self {
            instance_id,
            cluster_id,
            connections,
            directory,
            peers: PeerPool::new(),
        }
    }

    pub fn peer_pool(&self) -> &PeerPool {
        &self.peers
    }

    /// Sends a command to a node wherever its stream terminates. Appears local
    /// to the caller regardless of which controller owns the stream.
    pub async fn send_to_node(
        &self,
        node_id: &str,
        command: ControllerMessage,
    ) -> Result<(), FoghornError> {
        if node_id.is_empty() {
            return Err(FoghornError::InvalidArgument(
                "missing target node id".to_string(),
            ));
        }
        if !command.is_forwardable() {
            return Err(FoghornError::InvalidArgument(format!(
                "{} is not a node command",
                command.kind()
            )));
        }
        let kind = command.kind();

        // Local fast path. A failing local send is terminal; the node was
        // here a moment ago and a peer will not have it either.
        if self.connections.contains(node_id) {
            let result = self.connections.send(node_id, command).await;
            let status = if result.is_ok() { "local" } else { "local_error" };
            RELAY_FORWARDS_TOTAL.with_label_values(&[kind, status]).inc();
            return result;
        }

        // Remote path through the owner directory.
        let record = self
            .directory
            .lookup(&self.cluster_id, node_id)
            .await?
            .ok_or_else(|| FoghornError::NotConnected(node_id.to_string()))?;

        if record.instance_id == self.instance_id {
            // A stale mapping pointing back at us; the stream is gone.
            debug!(
                "Owner record for {} names this instance but no stream is present",
                node_id
            );
            RELAY_FORWARDS_TOTAL.with_label_values(&[kind, "stale_self"]).inc();
            return Err(FoghornError::NotConnected(node_id.to_string()));
        }

        let Some(addr) = record.addr.as_deref().filter(|a| !a.is_empty()) else {
            RELAY_FORWARDS_TOTAL.with_label_values(&[kind, "no_address"]).inc();
            return Err(FoghornError::NoPeerAddress(node_id.to_string()));
        };

        match self
            .peers
            .forward(addr, &self.instance_id, node_id, command)
            .await
        {
            Ok(()) => {
                RELAY_FORWARDS_TOTAL.with_label_values(&[kind, "forwarded"]).inc();
                Ok(())
            }
            Err(e) => {
                warn!("Relay of {} to {} via {} failed: {}", kind, node_id, addr, e);
                RELAY_FORWARDS_TOTAL.with_label_values(&[kind, "error"]).inc();
                Err(e)
            }
        }
    }
}
