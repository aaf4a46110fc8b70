// src/core/relay/server.rs

//! The peer-facing relay listener: accepts `ForwardCommand` frames from other
//! controller instances and dispatches them on locally held streams.

use super::client::INVALID_ARGUMENT_PREFIX;
use crate::connection::ConnectionRegistry;
use crate::core::protocol::{RelayCodec, RelayMessage};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Runs the relay listener until shutdown.
pub async fn run(
    listener: TcpListener,
    connections: Arc<ConnectionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!(
        "Peer relay listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    );
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!("Relay connection from peer {}", peer);
                        let connections = connections.clone();
                        let peer_shutdown = shutdown_rx.resubscribe();
                        tokio::spawn(async move {
                            serve_peer(stream, connections, peer_shutdown).await;
                        });
                    }
                    Err(e) => {
                        warn!("Relay accept failed: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Relay listener shutting down.");
                return;
            }
        }
    }
}

/// One peer connection: a FIFO of request/response frame pairs.
async fn serve_peer(
    stream: TcpStream,
    connections: Arc<ConnectionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut framed = Framed::new(stream, RelayCodec::new());
    loop {
        tokio::select! {
            frame = framed.next() => {
                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        warn!("Relay peer protocol error: {}", e);
                        return;
                    }
                    None => return,
                };
                let reply = handle_frame(message, &connections).await;
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            _ = shutdown_rx.recv() => {
                return;
            }
        }
    }
}

async fn handle_frame(
    message: RelayMessage,
    connections: &Arc<ConnectionRegistry>,
) -> RelayMessage {
    let RelayMessage::ForwardCommand {
        source_instance,
        target_node_id,
        command,
    } = message
    else {
        return RelayMessage::ForwardResult {
            delivered: false,
            error: format!("{INVALID_ARGUMENT_PREFIX} expected forward_command"),
        };
    };

    if target_node_id.is_empty() {
        return RelayMessage::ForwardResult {
            delivered: false,
            error: format!("{INVALID_ARGUMENT_PREFIX} missing target node id"),
        };
    }
    if !command.is_forwardable() {
        return RelayMessage::ForwardResult {
            delivered: false,
            error: format!(
                "{INVALID_ARGUMENT_PREFIX} {} is not a node command",
                command.kind()
            ),
        };
    }

    debug!(
        "Peer {} forwards {} to node {}",
        source_instance,
        command.kind(),
        target_node_id
    );

    // Not holding the stream is a negative verdict, not a transport error;
    // the forwarding instance decides what to do with it.
    match connections.send(&target_node_id, command).await {
        Ok(()) => RelayMessage::ForwardResult {
            delivered: true,
            error: String::new(),
        },
        Err(e) => RelayMessage::ForwardResult {
            delivered: false,
            error: e.to_string(),
        },
    }
}
