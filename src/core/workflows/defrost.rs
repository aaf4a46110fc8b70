// src/core/workflows/defrost.rs

//! Cold-storage defrost: pulling an S3-resident artifact back to warm storage
//! on a chosen node, with a single in-flight transfer per artifact and a
//! rendezvous for every caller waiting on the result.

use crate::core::FoghornError;
use crate::core::artifacts::{ArtifactKind, ArtifactStore, DefrostAdmission};
use crate::core::metrics::DEFROSTS_TOTAL;
use crate::core::presign::{Presigner, SignedMethod};
use crate::core::protocol::{AssetType, ControllerMessage};
use crate::core::relay::CommandRelay;
use crate::core::state::StateStore;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Retry hint handed to callers that lose the admission race in non-wait mode.
const DEFROST_RETRY_SECONDS: u64 = 10;

/// What a parked caller learns when the in-flight defrost settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefrostOutcome {
    pub ok: bool,
    pub local_path: String,
}

/// Each waiter gets its own one-shot channel so a single wake delivers to
/// exactly that caller. The `Option` lets the notifier take the sender once;
/// a drained slot marks a stale waiter.
type Waiter = Arc<SyncMutex<Option<oneshot::Sender<DefrostOutcome>>>>;

/// The per-hash rendezvous. One mutex guards the whole map; the channels
/// themselves need no lock.
#[derive(Debug, Default)]
pub struct DefrostWaiters {
    waiters: SyncMutex<HashMap<String, Vec<Waiter>>>,
}

impl DefrostWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks the caller on `hash`. The returned receiver resolves when the
    /// defrost settles; the handle removes this waiter on timeout without
    /// waking anyone else.
    fn register(&self, hash: &str) -> (Waiter, oneshot::Receiver<DefrostOutcome>) {
        let (tx, rx) = oneshot::channel();
        let waiter: Waiter = Arc::new(SyncMutex::new(Some(tx)));
        self.waiters
            .lock()
            .entry(hash.to_string())
            .or_default()
            .push(waiter.clone());
        (waiter, rx)
    }

    fn remove(&self, hash: &str, waiter: &Waiter) {
        let mut map = self.waiters.lock();
        if let Some(list) = map.get_mut(hash) {
            list.retain(|w| !Arc::ptr_eq(w, waiter));
            if list.is_empty() {
                map.remove(hash);
            }
        }
    }

    /// Pops every waiter for `hash` and delivers the outcome.
    pub fn notify(&self, hash: &str, outcome: &DefrostOutcome) {
        let Some(list) = self.waiters.lock().remove(hash) else {
            return;
        };
        let woken = list.len();
        for waiter in list {
            if let Some(tx) = waiter.lock().take() {
                let _ = tx.send(outcome.clone());
            }
        }
        debug!("Woke {} defrost waiter(s) for {}", woken, hash);
    }

    /// Parks until the in-flight defrost for `hash` settles or the timeout
    /// elapses. A timeout only removes this caller.
    pub async fn wait(&self, hash: &str, timeout: Duration) -> Result<DefrostOutcome, FoghornError> {
        let (waiter, rx) = self.register(hash);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => {
                self.remove(hash, &waiter);
                Err(FoghornError::Internal(
                    "defrost notifier dropped without a result".to_string(),
                ))
            }
            Err(_) => {
                self.remove(hash, &waiter);
                Err(FoghornError::Timeout(format!("defrost of {hash}")))
            }
        }
    }

    #[cfg(test)]
    pub fn waiter_count(&self, hash: &str) -> usize {
        self.waiters.lock().get(hash).map(Vec::len).unwrap_or(0)
    }
}

/// The defrost state machine.
#[derive(Debug)]
pub struct DefrostEngine {
    artifacts: Arc<ArtifactStore>,
    store: Arc<StateStore>,
    relay: Arc<CommandRelay>,
    presigner: Presigner,
    waiters: Arc<DefrostWaiters>,
    storage_base: String,
}

impl DefrostEngine {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        store: Arc<StateStore>,
        relay: Arc<CommandRelay>,
        presigner: Presigner,
        waiters: Arc<DefrostWaiters>,
        storage_base: String,
    ) -> Self {
        Self {
            artifacts,
            store,
            relay,
            presigner,
            waiters,
            storage_base,
        }
    }

    pub fn waiters(&self) -> &Arc<DefrostWaiters> {
        &self.waiters
    }

    /// Starts (or joins) a defrost of `hash` onto `node_id`.
    ///
    /// With `wait`, the call parks until the transfer settles and returns the
    /// outcome. Without it, a lost admission race surfaces the typed
    /// `Defrosting` error carrying the retry hint.
    pub async fn start_defrost(
        &self,
        asset_type: AssetType,
        hash: &str,
        node_id: &str,
        wait: Option<Duration>,
    ) -> Result<Option<DefrostOutcome>, FoghornError> {
        match self.artifacts.begin_defrost(hash, node_id)? {
            DefrostAdmission::AlreadyLocal { local_path } => Ok(Some(DefrostOutcome {
                ok: true,
                local_path: local_path.unwrap_or_default(),
            })),
            DefrostAdmission::InFlight => match wait {
                Some(timeout) => {
                    debug!("Joining in-flight defrost of {}", hash);
                    self.waiters.wait(hash, timeout).await.map(Some)
                }
                None => Err(FoghornError::Defrosting {
                    retry_after_seconds: DEFROST_RETRY_SECONDS,
                }),
            },
            DefrostAdmission::Started => {
                // Park before dispatching so a completion racing the send
                // cannot slip past this caller.
                let request = self.build_request(asset_type, hash)?;
                info!("Defrosting {} to node {}", hash, node_id);
                DEFROSTS_TOTAL.with_label_values(&["started"]).inc();

                let parked = wait.map(|timeout| (timeout, self.waiters.register(hash)));

                if let Err(e) = self.relay.send_to_node(node_id, request).await {
                    // Dispatch failed: release the admission so a later caller
                    // can retry, and clear our own parking spot.
                    self.artifacts.revert_defrost(hash);
                    if let Some((_, (waiter, _rx))) = &parked {
                        self.waiters.remove(hash, waiter);
                    }
                    DEFROSTS_TOTAL.with_label_values(&["dispatch_failed"]).inc();
                    warn!("Defrost dispatch of {} to {} failed: {}", hash, node_id, e);
                    return Err(e);
                }

                match parked {
                    Some((timeout, (waiter, rx))) => {
                        match tokio::time::timeout(timeout, rx).await {
                            Ok(Ok(outcome)) => Ok(Some(outcome)),
                            Ok(Err(_)) => {
                                self.waiters.remove(hash, &waiter);
                                Err(FoghornError::Internal(
                                    "defrost notifier dropped without a result".to_string(),
                                ))
                            }
                            Err(_) => {
                                self.waiters.remove(hash, &waiter);
                                Err(FoghornError::Timeout(format!("defrost of {hash}")))
                            }
                        }
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Applies a node's completion report and wakes every parked caller.
    pub fn on_defrost_complete(
        &self,
        reporter_node: &str,
        hash: &str,
        success: bool,
        local_path: &str,
        error: &str,
    ) {
        let applied = self
            .artifacts
            .complete_defrost(hash, reporter_node, success, local_path);
        if !applied {
            debug!(
                "Defrost completion for {} from {} did not change the row",
                hash, reporter_node
            );
            return;
        }
        if success {
            let base_url = self
                .store
                .get_node(reporter_node)
                .map(|n| n.base_url)
                .unwrap_or_default();
            self.artifacts
                .add_node_artifact(hash, reporter_node, &base_url);
            DEFROSTS_TOTAL.with_label_values(&["completed"]).inc();
            info!("Defrost of {} completed on {}", hash, reporter_node);
        } else {
            DEFROSTS_TOTAL.with_label_values(&["failed"]).inc();
            warn!("Defrost of {} failed on {}: {}", hash, reporter_node, error);
        }
        self.waiters.notify(
            hash,
            &DefrostOutcome {
                ok: success,
                local_path: if success { local_path.to_string() } else { String::new() },
            },
        );
    }

    /// Builds the `DefrostRequest` with presigned GETs. Clips and VODs are one
    /// object; a DVR lists every segment under its prefix plus the manifest,
    /// with file names derived from the recorded segment count.
    fn build_request(
        &self,
        asset_type: AssetType,
        hash: &str,
    ) -> Result<ControllerMessage, FoghornError> {
        let artifact = self
            .artifacts
            .get(hash)
            .ok_or_else(|| FoghornError::ArtifactNotFound(hash.to_string()))?;

        match ArtifactKind::from(asset_type) {
            ArtifactKind::Clip | ArtifactKind::Vod => {
                let prefix = if artifact.kind == ArtifactKind::Vod { "vod" } else { "clips" };
                let key = format!("{}/{}/{}.mp4", prefix, artifact.tenant_id, hash);
                let url = self.presigner.sign(SignedMethod::Get, &key)?;
                Ok(ControllerMessage::DefrostRequest {
                    hash: hash.to_string(),
                    asset_type,
                    presigned_get_url: Some(url),
                    segment_urls: HashMap::new(),
                    local_path: format!("{}/{}/{}.mp4", self.storage_base, prefix, hash),
                })
            }
            ArtifactKind::Dvr => {
                let prefix = format!("dvr/{}/{}", artifact.stream_id, hash);
                let mut segment_urls = HashMap::new();
                for i in 0..artifact.segment_count {
                    let name = format!("segment_{i:05}.{}", segment_extension(&artifact.format));
                    let url = self
                        .presigner
                        .sign(SignedMethod::Get, &format!("{prefix}/{name}"))?;
                    segment_urls.insert(name, url);
                }
                let manifest = manifest_name(&artifact.manifest_path);
                let url = self
                    .presigner
                    .sign(SignedMethod::Get, &format!("{prefix}/{manifest}"))?;
                segment_urls.insert(manifest, url);
                Ok(ControllerMessage::DefrostRequest {
                    hash: hash.to_string(),
                    asset_type,
                    presigned_get_url: None,
                    segment_urls,
                    local_path: format!(
                        "{}/dvr/{}/{}",
                        self.storage_base, artifact.stream_id, hash
                    ),
                })
            }
        }
    }
}

fn segment_extension(format: &str) -> &str {
    if format.is_empty() { "ts" } else { format }
}

fn manifest_name(manifest_path: &str) -> String {
    manifest_path
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("index.m3u8")
        .to_string()
}
