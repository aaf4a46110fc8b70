// src/connection/registry.rs

//! The in-process map of live node control streams.
//!
//! Writes happen only on Register and Disconnect; every `send_*` path reads.
//! Outbound messages go through a per-connection channel drained by the
//! stream's writer task, which preserves FIFO order per node.

use crate::core::FoghornError;
use crate::core::protocol::ControllerMessage;
use dashmap::DashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Bounded per-node outbound queue. A node that stops draining its stream
/// pushes back here rather than growing memory.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Handle to one live control stream.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    pub node_id: String,
    /// Distinguishes reconnects; cleanup only removes its own session.
    pub session_id: u64,
    pub peer_addr: String,
    pub connected_at: Instant,
    tx: mpsc::Sender<ControllerMessage>,
}

impl NodeHandle {
    pub fn new(
        node_id: String,
        session_id: u64,
        peer_addr: String,
        tx: mpsc::Sender<ControllerMessage>,
    ) -> Self {
        Self {
            node_id,
            session_id,
            peer_addr,
            connected_at: Instant::now(),
            tx,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: DashMap<String, NodeHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the handle for a node, replacing any earlier session. The
    /// most recent successful Register wins; the displaced stream notices on
    /// its next send.
    pub fn register(&self, handle: NodeHandle) {
        if let Some(old) = self.conns.insert(handle.node_id.clone(), handle) {
            debug!(
                "Node {} re-registered; displacing session {}",
                old.node_id, old.session_id
            );
        }
    }

    /// Removes a node's handle, but only if it still belongs to `session_id`.
    /// A reconnect that already replaced the handle must not be torn down by
    /// the old session's cleanup.
    pub fn remove(&self, node_id: &str, session_id: u64) -> bool {
        self.conns
            .remove_if(node_id, |_, handle| handle.session_id == session_id)
            .is_some()
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.conns.contains_key(node_id)
    }

    pub fn count(&self) -> usize {
        self.conns.len()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.conns.iter().map(|e| e.key().clone()).collect()
    }

    /// Queues a message onto a node's stream in FIFO order. Fails when the
    /// node is unknown here or its stream has gone away.
    pub async fn send(
        &self,
        node_id: &str,
        message: ControllerMessage,
    ) -> Result<(), FoghornError> {
        let tx = self
            .conns
            .get(node_id)
            .map(|handle| handle.tx.clone())
            .ok_or_else(|| FoghornError::NotConnected(node_id.to_string()))?;
        tx.send(message)
            .await
            .map_err(|_| FoghornError::NotConnected(node_id.to_string()))
    }
}
