// src/core/events.rs

//! Typed analytics events emitted by the workflow engines and background jobs.
//!
//! Downstream analytics ingestion is an external collaborator; the bus only
//! guarantees that emission never blocks a control-stream handler.

use crate::core::protocol::AssetType;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, warn};

/// A deep queue so a slow drain never backpressures message handlers; the bus
/// drops with a warning instead of blocking when it fills.
const EVENT_CHANNEL_CAPACITY: usize = 16384;

/// Lifecycle events surfaced to the analytics pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsEvent {
    /// A recording/clip/vod reached a terminal state on a node.
    ArtifactStopped {
        hash: String,
        asset_type: AssetType,
        internal_name: String,
        tenant_id: String,
        status: String,
        duration_seconds: u64,
        size_bytes: u64,
    },
    /// An artifact was removed, by request or by retention expiry.
    ArtifactDeleted {
        hash: String,
        asset_type: AssetType,
        internal_name: String,
        tenant_id: String,
        /// "expired", "node_reported", or "requested".
        cause: String,
    },
    /// A node joined or left the fleet.
    NodeLifecycle {
        node_id: String,
        online: bool,
    },
}

/// The sending half handed to every subsystem that emits analytics.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<AnalyticsEvent>,
}

impl EventBus {
    /// Creates the bus and the receiver for the drain task.
    pub fn new() -> (Self, Receiver<AnalyticsEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx }, rx)
    }

    /// Creates a bus whose events go nowhere. For tests.
    pub fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }

    /// Publishes an event without blocking. A full or closed channel drops the
    /// event; analytics are best-effort by contract.
    pub fn publish(&self, event: AnalyticsEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                warn!("Analytics bus is full; dropping event {:?}", ev);
            }
            Err(TrySendError::Closed(ev)) => {
                debug!("Analytics bus is closed; dropping event {:?}", ev);
            }
        }
    }
}
