// src/server/context.rs

use crate::core::state::{FoghornInit, FoghornState};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Holds all the initialized state required to run the controller's loops.
pub struct ServerContext {
    pub state: Arc<FoghornState>,
    pub init_channels: Option<FoghornInit>,
    /// The node control-stream listener.
    pub control_listener: TcpListener,
    /// The controller-to-controller relay listener; taken by the spawner.
    pub relay_listener: Option<TcpListener>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
    pub acceptor: Option<TlsAcceptor>,
    /// Caps concurrently connected nodes.
    pub connection_permits: Arc<tokio::sync::Semaphore>,
}
