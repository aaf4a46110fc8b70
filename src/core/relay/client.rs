// src/core/relay/client.rs

//! Pooled connections to peer controller instances.
//!
//! One multiplexed connection per peer address, dialed on demand and reused;
//! a request is one `ForwardCommand` frame answered by one `ForwardResult`.
//! Errors drop the connection so the next forward re-dials.

use crate::core::FoghornError;
use crate::core::protocol::{ControllerMessage, RelayCodec, RelayMessage};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix a relay server puts on errors the caller must not retry.
pub const INVALID_ARGUMENT_PREFIX: &str = "invalid_argument:";

#[derive(Debug)]
struct PeerConnection {
    framed: Framed<TcpStream, RelayCodec>,
    last_used: Instant,
}

/// The bounded pool: one connection per peer address, guarded by a mutex so
/// requests on the same peer serialize (one in-flight exchange per frame
/// pair).
#[derive(Debug, Default)]
pub struct PeerPool {
    peers: DashMap<String, Arc<Mutex<Option<PeerConnection>>>>,
}

impl PeerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards a command through the peer at `addr` and reports the peer's
    /// delivery verdict.
    pub async fn forward(
        &self,
        addr: &str,
        source_instance: &str,
        target_node_id: &str,
        command: ControllerMessage,
    ) -> Result<(), FoghornError> {
        let slot = self
            .peers
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let mut guard = slot.lock().await;

        if guard.is_none() {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    FoghornError::Unavailable(format!("peer {addr} connect timeout"))
                })?
                .map_err(|e| FoghornError::Unavailable(format!("peer {addr} unreachable: {e}")))?;
            debug!("Dialed peer controller at {}", addr);
            *guard = Some(PeerConnection {
                framed: Framed::new(stream, RelayCodec::new()),
                last_used: Instant::now(),
            });
        }

        let conn = guard.as_mut().expect("connection just established");
        conn.last_used = Instant::now();
        let request = RelayMessage::ForwardCommand {
            source_instance: source_instance.to_string(),
            target_node_id: target_node_id.to_string(),
            command,
        };

        let exchange = async {
            conn.framed.send(request).await?;
            match conn.framed.next().await {
                Some(Ok(RelayMessage::ForwardResult { delivered, error })) => {
                    if delivered {
                        Ok(())
                    } else if let Some(detail) = error.strip_prefix(INVALID_ARGUMENT_PREFIX) {
                        Err(FoghornError::InvalidArgument(detail.trim().to_string()))
                    } else {
                        Err(FoghornError::PeerRejected(error))
                    }
                }
                Some(Ok(other)) => Err(FoghornError::Protocol(format!(
                    "unexpected relay reply: {other:?}"
                ))),
                Some(Err(e)) => Err(e),
                None => Err(FoghornError::Unavailable(format!(
                    "peer {addr} closed the relay connection"
                ))),
            }
        };

        let result = tokio::time::timeout(FORWARD_TIMEOUT, exchange)
            .await
            .map_err(|_| FoghornError::Timeout(format!("relay to {addr}")))?;

        // A transport failure invalidates the pooled connection; the peer's
        // own rejection does not.
        if matches!(
            result,
            Err(FoghornError::Io(_))
                | Err(FoghornError::Protocol(_))
                | Err(FoghornError::Unavailable(_))
        ) {
            *guard = None;
            warn!("Dropping pooled connection to {} after relay failure", addr);
        }
        result
    }

    /// Closes connections idle past the grace period.
    pub fn prune_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        self.peers.retain(|addr, slot| {
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            match guard.as_ref() {
                Some(conn) if now.duration_since(conn.last_used) > max_idle => {
                    debug!("Closing idle peer connection to {}", addr);
                    false
                }
                None => false,
                Some(_) => true,
            }
        });
    }

    pub fn connected_peers(&self) -> usize {
        self.peers.len()
    }
}
