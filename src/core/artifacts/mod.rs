// src/core/artifacts/mod.rs

//! Durable artifact rows and node placements.
//!
//! The store is the injected seam in front of the controller's persistence:
//! every state machine talks to it through compare-and-set operations so
//! racing controllers and reconnecting nodes serialize here. One lock guards
//! the rows, one the placements; no operation takes both.

use crate::core::FoghornError;
use crate::core::protocol::AssetType;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Artifact class. Incremental DVR pieces (`dvr_segment`, `dvr_manifest`)
/// belong to their parent `dvr` row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Clip,
    Dvr,
    Vod,
}

impl From<AssetType> for ArtifactKind {
    fn from(asset: AssetType) -> Self {
        match asset {
            AssetType::Clip => ArtifactKind::Clip,
            AssetType::Dvr | AssetType::DvrSegment | AssetType::DvrManifest => ArtifactKind::Dvr,
            AssetType::Vod => ArtifactKind::Vod,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Requested,
    Starting,
    Recording,
    Completed,
    Stopped,
    Failed,
    Deleted,
}

impl ArtifactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ArtifactStatus::Completed
                | ArtifactStatus::Stopped
                | ArtifactStatus::Failed
                | ArtifactStatus::Deleted
        )
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    Local,
    S3,
    Defrosting,
    Freezing,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Synced,
    Failed,
}

/// One artifact row.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub hash: String,
    pub kind: ArtifactKind,
    pub internal_name: String,
    pub stream_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub status: ArtifactStatus,
    pub storage_location: StorageLocation,
    pub sync_status: SyncStatus,
    pub s3_url: Option<String>,
    pub size_bytes: u64,
    pub duration_seconds: u64,
    pub segment_count: u64,
    pub manifest_path: String,
    pub format: String,
    pub dtsh_included: bool,
    pub retention_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Admission token for the single in-flight defrost.
    pub defrost_node_id: Option<String>,
    pub defrost_started_at: Option<DateTime<Utc>>,
    /// Warm path on the node currently holding it, when known.
    pub local_path: Option<String>,
}

impl Artifact {
    pub fn new(hash: &str, kind: ArtifactKind, internal_name: &str, tenant_id: &str) -> Self {
        Self {
            hash: hash.to_string(),
            kind,
            internal_name: internal_name.to_string(),
            stream_id: internal_name.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: String::new(),
            status: ArtifactStatus::Requested,
            storage_location: StorageLocation::Local,
            sync_status: SyncStatus::Pending,
            s3_url: None,
            size_bytes: 0,
            duration_seconds: 0,
            segment_count: 0,
            manifest_path: String::new(),
            format: String::new(),
            dtsh_included: false,
            retention_until: None,
            created_at: Utc::now(),
            defrost_node_id: None,
            defrost_started_at: None,
            local_path: None,
        }
    }
}

/// A node known to hold a warm copy of an artifact.
#[derive(Debug, Clone)]
pub struct NodePlacement {
    pub hash: String,
    pub node_id: String,
    pub base_url: String,
    pub cached_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Verdict of a defrost admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefrostAdmission {
    /// The caller won the CAS and must drive the transfer.
    Started,
    /// The artifact is already warm; nothing to do.
    AlreadyLocal { local_path: Option<String> },
    /// Another defrost is in flight; join its waiters or back off.
    InFlight,
}

#[derive(Debug, Default)]
pub struct ArtifactStore {
    rows: RwLock<HashMap<String, Artifact>>,
    /// hash -> placements
    placements: RwLock<HashMap<String, Vec<NodePlacement>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, artifact: Artifact) {
        self.rows.write().insert(artifact.hash.clone(), artifact);
    }

    pub fn get(&self, hash: &str) -> Option<Artifact> {
        self.rows.read().get(hash).cloned()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.rows.read().contains_key(hash)
    }

    pub fn update_status(&self, hash: &str, status: ArtifactStatus) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.status = status;
                true
            }
            None => false,
        }
    }

    /// Applies a progress sample from the recording node.
    pub fn record_progress(&self, hash: &str, segment_count: u64, size_bytes: u64) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.segment_count = segment_count;
                row.size_bytes = size_bytes;
                if row.status == ArtifactStatus::Requested
                    || row.status == ArtifactStatus::Starting
                {
                    row.status = ArtifactStatus::Recording;
                }
                true
            }
            None => false,
        }
    }

    /// Terminal update from the recording node.
    pub fn finish(
        &self,
        hash: &str,
        status: ArtifactStatus,
        manifest_path: &str,
        duration_seconds: u64,
        size_bytes: u64,
    ) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.status = status;
                if !manifest_path.is_empty() {
                    row.manifest_path = manifest_path.to_string();
                }
                if duration_seconds > 0 {
                    row.duration_seconds = duration_seconds;
                }
                if size_bytes > 0 {
                    row.size_bytes = size_bytes;
                }
                true
            }
            None => false,
        }
    }

    pub fn set_sync_status(&self, hash: &str, sync: SyncStatus, s3_url: Option<String>) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.sync_status = sync;
                if s3_url.is_some() {
                    row.s3_url = s3_url;
                }
                true
            }
            None => false,
        }
    }

    pub fn set_storage_location(&self, hash: &str, location: StorageLocation) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.storage_location = location;
                true
            }
            None => false,
        }
    }

    pub fn set_retention(&self, hash: &str, until: Option<DateTime<Utc>>) -> bool {
        let mut rows = self.rows.write();
        match rows.get_mut(hash) {
            Some(row) => {
                row.retention_until = until;
                true
            }
            None => false,
        }
    }

    /// The defrost admission CAS: `s3 -> defrosting` with the caller recorded
    /// as the admission token. Exactly one racing caller observes `Started`.
    pub fn begin_defrost(
        &self,
        hash: &str,
        node_id: &str,
    ) -> Result<DefrostAdmission, FoghornError> {
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(hash)
            .ok_or_else(|| FoghornError::ArtifactNotFound(hash.to_string()))?;
        match row.storage_location {
            StorageLocation::Local => Ok(DefrostAdmission::AlreadyLocal {
                local_path: row.local_path.clone(),
            }),
            StorageLocation::Defrosting => Ok(DefrostAdmission::InFlight),
            StorageLocation::S3 | StorageLocation::Freezing => {
                if row.storage_location == StorageLocation::Freezing {
                    // A freeze in flight still has the warm copy.
                    return Ok(DefrostAdmission::AlreadyLocal {
                        local_path: row.local_path.clone(),
                    });
                }
                row.storage_location = StorageLocation::Defrosting;
                row.defrost_node_id = Some(node_id.to_string());
                row.defrost_started_at = Some(Utc::now());
                debug!("Artifact {} defrost admitted to node {}", hash, node_id);
                Ok(DefrostAdmission::Started)
            }
        }
    }

    /// Rolls an admitted defrost back to `s3` after a dispatch failure.
    pub fn revert_defrost(&self, hash: &str) {
        let mut rows = self.rows.write();
        if let Some(row) = rows.get_mut(hash)
            && row.storage_location == StorageLocation::Defrosting
        {
            row.storage_location = StorageLocation::S3;
            row.defrost_node_id = None;
            row.defrost_started_at = None;
        }
    }

    /// Applies a defrost completion report. A success only lands when the
    /// reporter matches the admission token (or the token is gone); a failure
    /// rolls back to `s3`. Returns whether the row changed.
    pub fn complete_defrost(
        &self,
        hash: &str,
        reporter: &str,
        success: bool,
        local_path: &str,
    ) -> bool {
        let mut rows = self.rows.write();
        let Some(row) = rows.get_mut(hash) else {
            return false;
        };
        if row.storage_location != StorageLocation::Defrosting {
            return false;
        }
        if success {
            let token_matches = row
                .defrost_node_id
                .as_deref()
                .map(|owner| owner == reporter)
                .unwrap_or(true);
            if !token_matches {
                debug!(
                    "Ignoring defrost completion for {} from {}; admission is held by {:?}",
                    hash, reporter, row.defrost_node_id
                );
                return false;
            }
            row.storage_location = StorageLocation::Local;
            row.local_path = (!local_path.is_empty()).then(|| local_path.to_string());
        } else {
            row.storage_location = StorageLocation::S3;
        }
        row.defrost_node_id = None;
        row.defrost_started_at = None;
        true
    }

    /// Rows due for retention expiry: not already deleted or failed, and past
    /// either their explicit retention or the default window.
    pub fn expired(&self, now: DateTime<Utc>, default_retention: ChronoDuration) -> Vec<Artifact> {
        self.rows
            .read()
            .values()
            .filter(|row| {
                !matches!(row.status, ArtifactStatus::Deleted | ArtifactStatus::Failed)
                    && match row.retention_until {
                        Some(until) => until < now,
                        None => row.created_at < now - default_retention,
                    }
            })
            .cloned()
            .collect()
    }

    /// Rows marked deleted that still have live placements; the orphan job
    /// chases these with delete commands.
    pub fn deleted_with_placements(&self) -> Vec<(Artifact, Vec<NodePlacement>)> {
        let placements = self.placements.read();
        self.rows
            .read()
            .values()
            .filter(|row| row.status == ArtifactStatus::Deleted)
            .filter_map(|row| {
                placements
                    .get(&row.hash)
                    .filter(|p| !p.is_empty())
                    .map(|p| (row.clone(), p.clone()))
            })
            .collect()
    }

    // --- Placements (the artifact_nodes join table) ---

    pub fn find_nodes_by_artifact_hash(&self, hash: &str) -> Vec<NodePlacement> {
        self.placements
            .read()
            .get(hash)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_node_artifact(&self, hash: &str, node_id: &str, base_url: &str) {
        let mut placements = self.placements.write();
        let entries = placements.entry(hash.to_string()).or_default();
        let now = Utc::now();
        match entries.iter_mut().find(|p| p.node_id == node_id) {
            Some(existing) => {
                existing.last_seen_at = now;
                if !base_url.is_empty() {
                    existing.base_url = base_url.to_string();
                }
            }
            None => entries.push(NodePlacement {
                hash: hash.to_string(),
                node_id: node_id.to_string(),
                base_url: base_url.to_string(),
                cached_at: now,
                last_seen_at: now,
            }),
        }
    }

    /// Removes one node's placement after it reports the artifact gone.
    pub fn apply_artifact_deleted(&self, hash: &str, node_id: &str) {
        let mut placements = self.placements.write();
        if let Some(entries) = placements.get_mut(hash) {
            entries.retain(|p| p.node_id != node_id);
            if entries.is_empty() {
                placements.remove(hash);
            }
        }
    }

    /// Refreshes `last_seen_at` for every artifact a node reports holding.
    pub fn touch_placements(&self, node_id: &str, base_url: &str, hashes: &[String]) {
        for hash in hashes {
            self.add_node_artifact(hash, node_id, base_url);
        }
    }
}
