// src/core/workflows/freeze.rs

//! Cold-storage freeze: brokering presigned PUT URLs for warm-to-S3 uploads
//! and tracking sync state as nodes report completions.

use crate::core::FoghornError;
use crate::core::artifacts::{ArtifactKind, ArtifactStore, StorageLocation, SyncStatus};
use crate::core::clients::BusinessRegistry;
use crate::core::metrics::FREEZE_PERMITS_TOTAL;
use crate::core::presign::{Presigner, SignedMethod};
use crate::core::protocol::{AssetType, ControllerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct FreezeEngine {
    artifacts: Arc<ArtifactStore>,
    registry: Arc<dyn BusinessRegistry>,
    presigner: Presigner,
    s3_endpoint: String,
    s3_bucket: String,
}

impl FreezeEngine {
    pub fn new(
        artifacts: Arc<ArtifactStore>,
        registry: Arc<dyn BusinessRegistry>,
        presigner: Presigner,
        s3_endpoint: String,
        s3_bucket: String,
    ) -> Self {
        Self {
            artifacts,
            registry,
            presigner,
            s3_endpoint,
            s3_bucket,
        }
    }

    /// Grants or denies a node's freeze request. Synchronous on the stream.
    ///
    /// Whole assets (clip, vod, dvr) are marked `freezing`; incremental
    /// segment and manifest uploads leave the storage location untouched.
    pub async fn on_permission_request(
        &self,
        request_id: &str,
        asset_type: AssetType,
        asset_hash: &str,
        local_path: &str,
        filenames: &[String],
    ) -> ControllerMessage {
        match self
            .grant(asset_type, asset_hash, local_path, filenames)
            .await
        {
            Ok((single, segments)) => {
                FREEZE_PERMITS_TOTAL
                    .with_label_values(&[asset_type_label(asset_type)])
                    .inc();
                ControllerMessage::FreezePermissionResponse {
                    request_id: request_id.to_string(),
                    approved: true,
                    url_expiry_seconds: self.presigner.ttl_seconds(),
                    presigned_put_url: single,
                    segment_urls: segments,
                    reason: String::new(),
                }
            }
            Err(e) => {
                warn!("Freeze permission for {} denied: {}", asset_hash, e);
                ControllerMessage::FreezePermissionResponse {
                    request_id: request_id.to_string(),
                    approved: false,
                    url_expiry_seconds: 0,
                    presigned_put_url: None,
                    segment_urls: HashMap::new(),
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn grant(
        &self,
        asset_type: AssetType,
        asset_hash: &str,
        local_path: &str,
        filenames: &[String],
    ) -> Result<(Option<String>, HashMap<String, String>), FoghornError> {
        let (tenant_id, stream_id) = self.resolve_owner(asset_type, asset_hash).await?;

        match asset_type {
            AssetType::Clip | AssetType::Vod => {
                let prefix = if asset_type == AssetType::Vod { "vod" } else { "clips" };
                let key = format!("{prefix}/{tenant_id}/{asset_hash}.mp4");
                let url = self.presigner.sign(SignedMethod::Put, &key)?;
                self.artifacts
                    .set_storage_location(asset_hash, StorageLocation::Freezing);
                self.artifacts
                    .set_sync_status(asset_hash, SyncStatus::InProgress, None);
                Ok((Some(url), HashMap::new()))
            }
            AssetType::DvrSegment | AssetType::DvrManifest => {
                // Incremental piece: one URL, no storage-location mutation.
                let name = basename(local_path).ok_or_else(|| {
                    FoghornError::InvalidArgument("segment path carries no file name".to_string())
                })?;
                let key = format!("dvr/{stream_id}/{asset_hash}/{name}");
                let url = self.presigner.sign(SignedMethod::Put, &key)?;
                Ok((Some(url), HashMap::new()))
            }
            AssetType::Dvr => {
                if filenames.is_empty() {
                    return Err(FoghornError::InvalidArgument(
                        "whole-DVR freeze carries no file list".to_string(),
                    ));
                }
                let mut segments = HashMap::with_capacity(filenames.len());
                for name in filenames {
                    let key = format!("dvr/{stream_id}/{asset_hash}/{name}");
                    segments.insert(name.clone(), self.presigner.sign(SignedMethod::Put, &key)?);
                }
                self.artifacts
                    .set_storage_location(asset_hash, StorageLocation::Freezing);
                self.artifacts
                    .set_sync_status(asset_hash, SyncStatus::InProgress, None);
                Ok((None, segments))
            }
        }
    }

    /// Tenant and stream identity for key construction, preferring the local
    /// row and falling back to the business registry.
    async fn resolve_owner(
        &self,
        asset_type: AssetType,
        asset_hash: &str,
    ) -> Result<(String, String), FoghornError> {
        if let Some(row) = self.artifacts.get(asset_hash) {
            return Ok((row.tenant_id, row.stream_id));
        }
        let resolved = match ArtifactKind::from(asset_type) {
            ArtifactKind::Clip => self.registry.resolve_clip_hash(asset_hash).await?,
            ArtifactKind::Dvr => self.registry.resolve_dvr_hash(asset_hash).await?,
            ArtifactKind::Vod => self.registry.resolve_vod_hash(asset_hash).await?,
        };
        Ok((resolved.tenant_id, resolved.internal_name))
    }

    pub fn on_progress(&self, asset_hash: &str, percent: u32) {
        debug!("Freeze of {} at {}%", asset_hash, percent);
    }

    /// A successful freeze leaves the warm copy in place: the artifact is
    /// synced and still local.
    pub fn on_complete(&self, asset_hash: &str, success: bool, s3_url: &str, error: &str) {
        if success {
            self.artifacts.set_sync_status(
                asset_hash,
                SyncStatus::Synced,
                (!s3_url.is_empty()).then(|| s3_url.to_string()),
            );
            self.artifacts
                .set_storage_location(asset_hash, StorageLocation::Local);
            info!("Freeze of {} completed", asset_hash);
        } else {
            self.artifacts
                .set_sync_status(asset_hash, SyncStatus::Failed, None);
            warn!("Freeze of {} failed: {}", asset_hash, error);
        }
    }

    /// A node finished a background sync on its own: mark synced, keep the
    /// warm copy, and fill in the S3 URL from metadata if the node had none.
    pub fn on_sync_complete(
        &self,
        asset_hash: &str,
        s3_url: Option<String>,
        size_bytes: u64,
        dtsh_included: bool,
    ) {
        let url = s3_url.or_else(|| {
            self.artifacts.get(asset_hash).map(|row| {
                let prefix = match row.kind {
                    ArtifactKind::Clip => format!("clips/{}", row.tenant_id),
                    ArtifactKind::Vod => format!("vod/{}", row.tenant_id),
                    ArtifactKind::Dvr => format!("dvr/{}", row.stream_id),
                };
                format!(
                    "{}/{}/{}/{}",
                    self.s3_endpoint.trim_end_matches('/'),
                    self.s3_bucket,
                    prefix,
                    asset_hash
                )
            })
        });
        self.artifacts
            .set_sync_status(asset_hash, SyncStatus::Synced, url);
        if size_bytes > 0 || dtsh_included {
            debug!(
                "Sync of {} complete ({} bytes, dtsh: {})",
                asset_hash, size_bytes, dtsh_included
            );
        }
    }

    /// Answers a node asking whether its warm copy may be deleted: safe only
    /// once the artifact is synced to cold storage.
    pub fn on_can_delete(&self, request_id: &str, hash: &str) -> ControllerMessage {
        let row = self.artifacts.get(hash);
        let safe = row
            .as_ref()
            .is_some_and(|r| r.sync_status == SyncStatus::Synced);
        let warm_duration_ms = row
            .filter(|r| r.duration_seconds > 0)
            .map(|r| r.duration_seconds * 1000);
        ControllerMessage::CanDeleteResponse {
            request_id: request_id.to_string(),
            safe_to_delete: safe,
            warm_duration_ms,
        }
    }
}

fn asset_type_label(asset_type: AssetType) -> &'static str {
    match asset_type {
        AssetType::Clip => "clip",
        AssetType::Dvr => "dvr",
        AssetType::DvrSegment => "dvr_segment",
        AssetType::DvrManifest => "dvr_manifest",
        AssetType::Vod => "vod",
    }
}

fn basename(path: &str) -> Option<String> {
    path.rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}
