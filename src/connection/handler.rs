// src/connection/handler.rs

//! Defines `ControlConnection`, which manages the full lifecycle of one
//! node's persistent control stream.
//!
//! The stream's life: the first frame must be a `Register`; enrollment
//! resolves the node's canonical identity or the stream closes with an
//! `ENROLLMENT_*` code. After that the loop dispatches inbound messages and
//! drains the outbound queue. Handlers that do RPC spawn workers so the
//! receive loop never blocks; only the designated synchronous messages
//! (`DvrReadyRequest`, `FreezePermissionRequest`, `CanDeleteRequest`,
//! blocking `MistTrigger`) produce a reply frame on this stream.

use super::enrollment::{self, EnrollmentOutcome};
use super::guard::ConnectionGuard;
use super::registry::{NodeHandle, OUTBOUND_QUEUE_DEPTH};
use crate::core::FoghornError;
use crate::core::events::AnalyticsEvent;
use crate::core::metrics::{CONTROL_MESSAGES_TOTAL, ENROLLMENT_REJECTED_TOTAL};
use crate::core::protocol::{ControlCodec, ControllerMessage, NodeMessage, OperationalMode};
use crate::core::state::FoghornState;
use crate::server::AnyStream;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// A node that connects but never registers is cut loose after this.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Manages the full lifecycle of one node control stream.
pub struct ControlConnection {
    framed: Framed<AnyStream, ControlCodec>,
    addr: SocketAddr,
    state: Arc<FoghornState>,
    session_id: u64,
    shutdown_rx: broadcast::Receiver<()>,
    outbound_tx: mpsc::Sender<ControllerMessage>,
    outbound_rx: mpsc::Receiver<ControllerMessage>,
    node_id: Option<String>,
}

impl ControlConnection {
    pub fn new(
        socket: AnyStream,
        addr: SocketAddr,
        state: Arc<FoghornState>,
        session_id: u64,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        Self {
            framed: Framed::new(socket, ControlCodec::new()),
            addr,
            state,
            session_id,
            shutdown_rx,
            outbound_tx,
            outbound_rx,
            node_id: None,
        }
    }

    /// The main event loop for the stream.
    pub async fn run(&mut self) -> Result<(), FoghornError> {
        let mut guard = ConnectionGuard::new(self.state.clone(), self.session_id, self.addr);

        if let Err(e) = self.register_phase(&mut guard).await {
            let code = enrollment::error_code(&e);
            ENROLLMENT_REJECTED_TOTAL.with_label_values(&[code]).inc();
            let _ = self
                .framed
                .send(ControllerMessage::ControlError {
                    code: code.to_string(),
                    message: e.to_string(),
                })
                .await;
            return Err(e);
        }

        'main_loop: loop {
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Control stream for {} closing on shutdown.", self.addr);
                    let _ = self.framed.send(ControllerMessage::ControlError {
                        code: "SHUTTING_DOWN".to_string(),
                        message: "controller is shutting down".to_string(),
                    }).await;
                    break 'main_loop;
                }
                outbound = self.outbound_rx.recv() => {
                    // The queue end only closes when this handler is dropped,
                    // so a None here means teardown is already underway.
                    let Some(message) = outbound else { break 'main_loop };
                    if let Err(e) = self.framed.send(message).await {
                        warn!("Send to node at {} failed: {}", self.addr, e);
                        break 'main_loop;
                    }
                }
                inbound = self.framed.next() => {
                    match inbound {
                        Some(Ok(message)) => self.dispatch(message),
                        Some(Err(e)) => {
                            warn!("Control stream error from {}: {}", self.addr, e);
                            break 'main_loop;
                        }
                        None => {
                            debug!("Control stream from {} closed by peer.", self.addr);
                            break 'main_loop;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// INIT -> REGISTERED: consume the first frame, which must be a Register.
    async fn register_phase(&mut self, guard: &mut ConnectionGuard) -> Result<(), FoghornError> {
        let first = tokio::time::timeout(REGISTER_TIMEOUT, self.framed.next())
            .await
            .map_err(|_| {
                FoghornError::InvalidArgument("no register within the handshake window".to_string())
            })?;

        let message = match first {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e),
            None => return Err(FoghornError::Protocol("stream closed before register".into())),
        };

        let NodeMessage::Register {
            node_id,
            fingerprint,
            enrollment_token,
            cpu_cores,
            memory_gb,
            disk_gb,
            requested_mode,
            roles,
        } = message
        else {
            return Err(FoghornError::InvalidArgument(format!(
                "first frame must be register, got {}",
                message.kind()
            )));
        };

        let peer_ip = self.addr.ip().to_string();
        let outcome = enrollment::resolve_registration(
            &self.state,
            &peer_ip,
            &node_id,
            fingerprint.as_ref(),
            enrollment_token.as_deref(),
        )
        .await?;

        self.install_node(&outcome, &peer_ip, roles, guard);
        self.seed_node(&outcome, requested_mode).await;

        // Hardware capacity goes to the tenant service off the hot path.
        let state = self.state.clone();
        let canonical = outcome.node_id.clone();
        tokio::spawn(async move {
            if let Err(e) = state
                .tenants
                .update_node_hardware(&canonical, cpu_cores, memory_gb, disk_gb)
                .await
            {
                debug!("Hardware report for {} failed: {}", canonical, e);
            }
        });

        info!(
            "Node {} registered from {} (session {})",
            outcome.node_id, self.addr, self.session_id
        );
        Ok(())
    }

    /// Installs the registered node into the registry, state store, and owner
    /// directory.
    fn install_node(
        &mut self,
        outcome: &EnrollmentOutcome,
        peer_ip: &str,
        roles: Vec<String>,
        guard: &mut ConnectionGuard,
    ) {
        let node_id = outcome.node_id.clone();
        self.node_id = Some(node_id.clone());

        self.state.connections.register(NodeHandle::new(
            node_id.clone(),
            self.session_id,
            self.addr.to_string(),
            self.outbound_tx.clone(),
        ));
        guard.set_registered(&node_id);

        self.state.store.touch_node(&node_id, true);
        self.state.store.set_node_connection_info(
            &node_id,
            peer_ip,
            outcome.tenant_id.clone(),
            outcome.cluster_id.clone(),
            roles,
        );

        if !outcome.served_cluster_ids.is_empty() {
            let mut clusters = self.state.served_clusters().as_ref().clone();
            for cluster in &outcome.served_cluster_ids {
                if !clusters.contains(cluster) {
                    clusters.push(cluster.clone());
                }
            }
            self.state.set_served_clusters(clusters);
        }

        self.state.events.publish(AnalyticsEvent::NodeLifecycle {
            node_id,
            online: true,
        });
    }

    /// Claims the owner record and sends the `ConfigSeed`.
    async fn seed_node(&mut self, outcome: &EnrollmentOutcome, requested: Option<OperationalMode>) {
        let node_id = outcome.node_id.clone();

        let record = crate::core::directory::OwnerRecord::new(
            self.state.instance_id.clone(),
            self.state.advertise_addr.clone(),
        );
        if let Err(e) = self
            .state
            .directory
            .claim(&self.state.cluster_id, &node_id, &record)
            .await
        {
            warn!("Owner record claim for {} failed: {}", node_id, e);
        }

        // Mode resolution: a persisted mode wins over what the node asks for.
        let persisted = self
            .state
            .store
            .get_node(&node_id)
            .map(|n| n.mode)
            .filter(|m| *m != OperationalMode::Normal);
        let mode = persisted.or(requested).unwrap_or_default();
        self.state.store.set_node_mode(&node_id, mode);

        let seed = ControllerMessage::ConfigSeed {
            stream_templates: Vec::new(),
            processing_matrix: std::collections::HashMap::new(),
            mode,
        };
        if let Err(e) = self.framed.send(seed).await {
            warn!("ConfigSeed to {} failed: {}", node_id, e);
        }
    }

    /// Routes one inbound message. Everything here is non-blocking: in-memory
    /// mutations run inline, anything that performs RPC spawns a worker, and
    /// synchronous replies go out through the outbound queue.
    fn dispatch(&self, message: NodeMessage) {
        CONTROL_MESSAGES_TOTAL
            .with_label_values(&[message.kind()])
            .inc();
        let node_id = self
            .node_id
            .clone()
            .expect("dispatch only runs after registration");
        let state = &self.state;

        match message {
            NodeMessage::Register { .. } => {
                debug!("Node {} sent a duplicate register; ignoring", node_id);
            }
            NodeMessage::Heartbeat => {
                state.store.touch_node(&node_id, true);
            }
            NodeMessage::NodeUpdate {
                base_url,
                metrics,
                location,
                tags,
                capabilities,
                storage,
                streams,
                artifacts,
                outputs_json,
                configured_streams,
            } => {
                state
                    .store
                    .set_node_info(&node_id, &base_url, true, location, &outputs_json);
                state.store.update_node_metrics(&node_id, metrics);
                state.store.update_node_attributes(
                    &node_id,
                    capabilities,
                    tags,
                    configured_streams,
                    storage,
                );
                state.store.update_node_stats(&node_id, &streams);
                state
                    .artifacts
                    .touch_placements(&node_id, &base_url, &artifacts);
            }
            NodeMessage::StreamHealthUpdate {
                internal_name,
                status,
                buffer_state,
                has_issues,
                issues,
                stats,
                instance_info,
            } => {
                state.store.update_stream_from_buffer(
                    &node_id,
                    &internal_name,
                    status,
                    buffer_state,
                    has_issues,
                    &issues,
                    &stats,
                );
                state
                    .store
                    .update_stream_instance_info(&node_id, &internal_name, &instance_info);
            }
            NodeMessage::ClipProgress {
                request_id,
                percent,
                message,
            } => {
                state.clips.on_progress(&request_id, percent, &message);
            }
            NodeMessage::ClipDone {
                request_id,
                file_path,
                size_bytes,
                status,
                error,
            } => {
                state
                    .clips
                    .on_done(&node_id, &request_id, &file_path, size_bytes, &status, &error);
            }
            NodeMessage::ArtifactDeleted { hash } => {
                state.artifacts.apply_artifact_deleted(&hash, &node_id);
            }
            NodeMessage::DvrStartRequest {
                internal_name,
                tenant_id,
                user_id,
                dvr_hash,
            } => {
                // Registry RPC plus a relay hop; never on the receive loop.
                let state = state.clone();
                let node_id = node_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = state
                        .dvr
                        .start_dvr(&node_id, &internal_name, &tenant_id, &user_id, dvr_hash)
                        .await
                    {
                        warn!("DVR start for '{}' failed: {}", internal_name, e);
                    }
                });
            }
            NodeMessage::DvrReadyRequest { dvr_hash } => {
                let reply = state.dvr.on_ready_request(&dvr_hash);
                self.reply(reply);
            }
            NodeMessage::DvrProgress {
                dvr_hash,
                status,
                segment_count,
                size_bytes,
            } => {
                state
                    .dvr
                    .on_progress(&dvr_hash, &status, segment_count, size_bytes);
            }
            NodeMessage::DvrStopped {
                dvr_hash,
                status,
                manifest_path,
                duration_seconds,
                size_bytes,
                error,
            } => {
                state.dvr.on_stopped(
                    &dvr_hash,
                    &status,
                    &manifest_path,
                    duration_seconds,
                    size_bytes,
                    &error,
                );
            }
            NodeMessage::FreezePermissionRequest {
                request_id,
                asset_type,
                asset_hash,
                local_path,
                size_bytes: _,
                filenames,
            } => {
                // Presigning may consult the business registry; worker + reply
                // through the outbound queue keeps the loop free.
                let state = state.clone();
                let outbound = self.outbound_tx.clone();
                tokio::spawn(async move {
                    let reply = state
                        .freeze
                        .on_permission_request(
                            &request_id,
                            asset_type,
                            &asset_hash,
                            &local_path,
                            &filenames,
                        )
                        .await;
                    let _ = outbound.send(reply).await;
                });
            }
            NodeMessage::FreezeProgress { asset_hash, percent } => {
                state.freeze.on_progress(&asset_hash, percent);
            }
            NodeMessage::FreezeComplete {
                asset_hash,
                success,
                s3_url,
                error,
            } => {
                state.freeze.on_complete(&asset_hash, success, &s3_url, &error);
            }
            NodeMessage::DefrostProgress { hash, percent } => {
                debug!("Defrost of {} at {}% on {}", hash, percent, node_id);
            }
            NodeMessage::DefrostComplete {
                hash,
                success,
                local_path,
                error,
            } => {
                state
                    .defrost
                    .on_defrost_complete(&node_id, &hash, success, &local_path, &error);
            }
            NodeMessage::CanDeleteRequest { request_id, hash } => {
                let reply = state.freeze.on_can_delete(&request_id, &hash);
                self.reply(reply);
            }
            NodeMessage::SyncComplete {
                hash,
                s3_url,
                size_bytes,
                dtsh_included,
            } => {
                state
                    .freeze
                    .on_sync_complete(&hash, s3_url, size_bytes, dtsh_included);
            }
            NodeMessage::MistTrigger {
                trigger_type,
                request_id,
                blocking,
                payload,
                cluster_id,
            } => {
                let state = state.clone();
                let outbound = blocking.then(|| self.outbound_tx.clone());
                let node_id = node_id.clone();
                tokio::spawn(async move {
                    let verdict = state
                        .triggers
                        .process(&node_id, &trigger_type, &payload, cluster_id.as_deref())
                        .await;
                    if let Some(outbound) = outbound {
                        let _ = outbound
                            .send(ControllerMessage::MistTriggerResponse {
                                request_id,
                                response: verdict.response,
                                abort: verdict.abort,
                            })
                            .await;
                    }
                });
            }
        }
    }

    /// Queues a synchronous reply onto this stream, preserving FIFO with any
    /// commands already queued.
    fn reply(&self, message: ControllerMessage) {
        if self.outbound_tx.try_send(message).is_err() {
            warn!(
                "Outbound queue for {} is full; dropping synchronous reply",
                self.addr
            );
        }
    }
}
