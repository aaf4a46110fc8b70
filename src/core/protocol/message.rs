// src/core/protocol/message.rs

//! Wire messages exchanged on the persistent node control stream and the
//! controller-to-controller relay. Every message is one JSON frame.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Operational mode of a media node. Persisted mode wins over the mode the
/// node requests at registration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationalMode {
    #[default]
    Normal,
    Draining,
    Maintenance,
}

/// Aggregate status of a stream (unified across nodes) or of one instance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    #[default]
    Offline,
    Live,
    Starting,
    Stopping,
}

/// Ingest buffer fill state reported by the source node.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum BufferState {
    #[default]
    Empty,
    Dry,
    Recover,
    Full,
}

/// What a node can do; drives the capability selection filter.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    #[serde(default)]
    pub ingest: bool,
    #[serde(default)]
    pub edge: bool,
    #[serde(default)]
    pub storage: bool,
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GeoLocation {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl GeoLocation {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

// GeoLocation carries an Option<String>; manual impl so name() stays cheap.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StorageInfo {
    #[serde(default)]
    pub capacity_bytes: u64,
    #[serde(default)]
    pub used_bytes: u64,
    #[serde(default)]
    pub local_path: String,
    #[serde(default)]
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_prefix: String,
}

/// Per-stream counters in a `NodeUpdate`, keyed by internal name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// Current viewer count on this node.
    #[serde(default)]
    pub total: u64,
    /// Active ingest inputs; a node with inputs is a source candidate.
    #[serde(default)]
    pub inputs: u64,
    #[serde(default)]
    pub bytes_up: u64,
    #[serde(default)]
    pub bytes_down: u64,
    /// Measured per-viewer bandwidth in bytes/s, 0 when unknown.
    #[serde(default)]
    pub bandwidth: u64,
    #[serde(default)]
    pub replicated: bool,
}

/// Raw load sample carried by `NodeUpdate`.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LoadMetrics {
    /// CPU utilization in tenths of a percent, 0..=1000.
    #[serde(default)]
    pub cpu_tenths: u64,
    #[serde(default)]
    pub ram_max_mib: u64,
    #[serde(default)]
    pub ram_used_mib: u64,
    /// Outbound bytes/s currently served.
    #[serde(default)]
    pub up_speed: u64,
    #[serde(default)]
    pub down_speed: u64,
    /// Advertised bandwidth ceiling in bytes/s.
    #[serde(default)]
    pub bw_limit: u64,
    #[serde(default)]
    pub disk_used_bytes: u64,
    #[serde(default)]
    pub disk_total_bytes: u64,
}

/// Hardware fingerprint presented at registration. Resolution precedence is
/// machine-id hash, then MAC-set hash, then the peer IP.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Fingerprint {
    #[serde(default)]
    pub local_ipv4: Vec<String>,
    #[serde(default)]
    pub local_ipv6: Vec<String>,
    #[serde(default)]
    pub macs_sha256: String,
    #[serde(default)]
    pub machine_id_sha256: String,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.machine_id_sha256.is_empty() && self.macs_sha256.is_empty()
    }
}

/// DVR recording parameters seeded to storage nodes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DvrSettings {
    pub enabled: bool,
    pub retention_days: u32,
    pub format: String,
    pub segment_duration: u32,
}

/// The artifact classes that move between warm and cold storage.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Clip,
    Dvr,
    DvrSegment,
    DvrManifest,
    Vod,
}

/// Reasons a DVR readiness probe can be declined. Stable wire strings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DvrNotReadyReason {
    StreamUnhealthy,
    StreamOffline,
    StreamBooting,
    DvrRequestNotFound,
    StreamSourceMissing,
    StreamNotTracked,
}

/// Everything a media node can send up its control stream.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeMessage {
    Register {
        node_id: String,
        #[serde(default)]
        fingerprint: Option<Fingerprint>,
        #[serde(default)]
        enrollment_token: Option<String>,
        #[serde(default)]
        cpu_cores: u32,
        #[serde(default)]
        memory_gb: u32,
        #[serde(default)]
        disk_gb: u32,
        #[serde(default)]
        requested_mode: Option<OperationalMode>,
        #[serde(default)]
        roles: Vec<String>,
    },
    NodeUpdate {
        #[serde(default)]
        base_url: String,
        #[serde(flatten)]
        metrics: LoadMetrics,
        #[serde(default)]
        location: Option<GeoLocation>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        capabilities: Capabilities,
        #[serde(default)]
        storage: Option<StorageInfo>,
        #[serde(default)]
        streams: HashMap<String, StreamStats>,
        /// Hashes of artifacts this node holds a warm copy of.
        #[serde(default)]
        artifacts: Vec<String>,
        /// Protocol output map, raw. Values are a string, a list of strings,
        /// or anything else an output plugin emits.
        #[serde(default)]
        outputs_json: String,
        #[serde(default)]
        configured_streams: Vec<String>,
    },
    Heartbeat,
    StreamHealthUpdate {
        internal_name: String,
        #[serde(default)]
        status: StreamStatus,
        #[serde(default)]
        buffer_state: BufferState,
        #[serde(default)]
        has_issues: bool,
        #[serde(default)]
        issues: String,
        #[serde(default)]
        stats: StreamStats,
        /// Free-form per-instance tags merged into the instance record
        /// (e.g. `dvr_status`, `dvr_source_uri`).
        #[serde(default)]
        instance_info: HashMap<String, String>,
    },
    ClipProgress {
        request_id: String,
        percent: u32,
        #[serde(default)]
        message: String,
    },
    ClipDone {
        request_id: String,
        #[serde(default)]
        file_path: String,
        #[serde(default)]
        size_bytes: u64,
        status: String,
        #[serde(default)]
        error: String,
    },
    ArtifactDeleted {
        hash: String,
    },
    DvrStartRequest {
        internal_name: String,
        #[serde(default)]
        tenant_id: String,
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        dvr_hash: Option<String>,
    },
    DvrReadyRequest {
        dvr_hash: String,
    },
    DvrProgress {
        dvr_hash: String,
        #[serde(default)]
        status: String,
        #[serde(default)]
        segment_count: u64,
        #[serde(default)]
        size_bytes: u64,
    },
    DvrStopped {
        dvr_hash: String,
        status: String,
        #[serde(default)]
        manifest_path: String,
        #[serde(default)]
        duration_seconds: u64,
        #[serde(default)]
        size_bytes: u64,
        #[serde(default)]
        error: String,
    },
    FreezePermissionRequest {
        request_id: String,
        asset_type: AssetType,
        asset_hash: String,
        #[serde(default)]
        local_path: String,
        #[serde(default)]
        size_bytes: u64,
        #[serde(default)]
        filenames: Vec<String>,
    },
    FreezeProgress {
        asset_hash: String,
        percent: u32,
    },
    FreezeComplete {
        asset_hash: String,
        success: bool,
        #[serde(default)]
        s3_url: String,
        #[serde(default)]
        error: String,
    },
    DefrostProgress {
        hash: String,
        percent: u32,
    },
    DefrostComplete {
        hash: String,
        success: bool,
        #[serde(default)]
        local_path: String,
        #[serde(default)]
        error: String,
    },
    CanDeleteRequest {
        request_id: String,
        hash: String,
    },
    SyncComplete {
        hash: String,
        #[serde(default)]
        s3_url: Option<String>,
        #[serde(default)]
        size_bytes: u64,
        #[serde(default)]
        dtsh_included: bool,
    },
    MistTrigger {
        trigger_type: String,
        request_id: String,
        #[serde(default)]
        blocking: bool,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default)]
        cluster_id: Option<String>,
    },
}

impl NodeMessage {
    /// Short human name used in logs and dispatch metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMessage::Register { .. } => "register",
            NodeMessage::NodeUpdate { .. } => "node_update",
            NodeMessage::Heartbeat => "heartbeat",
            NodeMessage::StreamHealthUpdate { .. } => "stream_health_update",
            NodeMessage::ClipProgress { .. } => "clip_progress",
            NodeMessage::ClipDone { .. } => "clip_done",
            NodeMessage::ArtifactDeleted { .. } => "artifact_deleted",
            NodeMessage::DvrStartRequest { .. } => "dvr_start_request",
            NodeMessage::DvrReadyRequest { .. } => "dvr_ready_request",
            NodeMessage::DvrProgress { .. } => "dvr_progress",
            NodeMessage::DvrStopped { .. } => "dvr_stopped",
            NodeMessage::FreezePermissionRequest { .. } => "freeze_permission_request",
            NodeMessage::FreezeProgress { .. } => "freeze_progress",
            NodeMessage::FreezeComplete { .. } => "freeze_complete",
            NodeMessage::DefrostProgress { .. } => "defrost_progress",
            NodeMessage::DefrostComplete { .. } => "defrost_complete",
            NodeMessage::CanDeleteRequest { .. } => "can_delete_request",
            NodeMessage::SyncComplete { .. } => "sync_complete",
            NodeMessage::MistTrigger { .. } => "mist_trigger",
        }
    }
}

/// Everything the controller can push down a node's control stream. The same
/// enum is the relay command payload: a command forwarded through a peer
/// controller arrives here unchanged.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerMessage {
    ConfigSeed {
        #[serde(default)]
        stream_templates: Vec<String>,
        #[serde(default)]
        processing_matrix: HashMap<String, bool>,
        mode: OperationalMode,
    },
    ClipPullRequest {
        request_id: String,
        internal_name: String,
        source_uri: String,
        start_unix_ms: u64,
        end_unix_ms: u64,
        #[serde(default)]
        destination_path: String,
    },
    DvrStartRequest {
        dvr_hash: String,
        source_url: String,
        config: DvrSettings,
    },
    DvrStopRequest {
        dvr_hash: String,
    },
    ClipDeleteRequest {
        hash: String,
    },
    DvrDeleteRequest {
        hash: String,
    },
    VodDeleteRequest {
        hash: String,
    },
    DefrostRequest {
        hash: String,
        asset_type: AssetType,
        #[serde(default)]
        presigned_get_url: Option<String>,
        /// Segment file name -> presigned GET, for whole-DVR pulls.
        #[serde(default)]
        segment_urls: HashMap<String, String>,
        local_path: String,
    },
    DtshSyncRequest {
        hash: String,
        presigned_get_url: String,
    },
    StopSessionsRequest {
        internal_name: String,
    },
    PushTargetActivateRequest {
        target_id: String,
        internal_name: String,
        uri: String,
    },
    PushTargetDeactivateRequest {
        target_id: String,
        internal_name: String,
    },
    MistTriggerResponse {
        request_id: String,
        #[serde(default)]
        response: String,
        #[serde(default)]
        abort: bool,
    },
    DvrReadyResponse {
        dvr_hash: String,
        ready: bool,
        #[serde(default)]
        reason: Option<DvrNotReadyReason>,
        #[serde(default)]
        source_uri: String,
        #[serde(default)]
        config: Option<DvrSettings>,
    },
    FreezePermissionResponse {
        request_id: String,
        approved: bool,
        #[serde(default)]
        url_expiry_seconds: u64,
        #[serde(default)]
        presigned_put_url: Option<String>,
        #[serde(default)]
        segment_urls: HashMap<String, String>,
        #[serde(default)]
        reason: String,
    },
    CanDeleteResponse {
        request_id: String,
        safe_to_delete: bool,
        #[serde(default)]
        warm_duration_ms: Option<u64>,
    },
    ControlError {
        code: String,
        message: String,
    },
}

impl ControllerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerMessage::ConfigSeed { .. } => "config_seed",
            ControllerMessage::ClipPullRequest { .. } => "clip_pull",
            ControllerMessage::DvrStartRequest { .. } => "dvr_start",
            ControllerMessage::DvrStopRequest { .. } => "dvr_stop",
            ControllerMessage::ClipDeleteRequest { .. } => "clip_delete",
            ControllerMessage::DvrDeleteRequest { .. } => "dvr_delete",
            ControllerMessage::VodDeleteRequest { .. } => "vod_delete",
            ControllerMessage::DefrostRequest { .. } => "defrost",
            ControllerMessage::DtshSyncRequest { .. } => "dtsh_sync",
            ControllerMessage::StopSessionsRequest { .. } => "stop_sessions",
            ControllerMessage::PushTargetActivateRequest { .. } => "push_target_activate",
            ControllerMessage::PushTargetDeactivateRequest { .. } => "push_target_deactivate",
            ControllerMessage::MistTriggerResponse { .. } => "mist_trigger_response",
            ControllerMessage::DvrReadyResponse { .. } => "dvr_ready_response",
            ControllerMessage::FreezePermissionResponse { .. } => "freeze_permission_response",
            ControllerMessage::CanDeleteResponse { .. } => "can_delete_response",
            ControllerMessage::ControlError { .. } => "control_error",
        }
    }

    /// Whether this message is a node command a peer controller may forward.
    /// Responses and the config seed's enrollment errors are stream-local.
    pub fn is_forwardable(&self) -> bool {
        !matches!(
            self,
            ControllerMessage::MistTriggerResponse { .. }
                | ControllerMessage::DvrReadyResponse { .. }
                | ControllerMessage::FreezePermissionResponse { .. }
                | ControllerMessage::CanDeleteResponse { .. }
                | ControllerMessage::ControlError { .. }
        )
    }
}

/// Controller-to-controller relay frames. One request, one response, per the
/// peer connection's FIFO.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    ForwardCommand {
        /// Identity of the forwarding instance (`x-foghorn-instance-id`).
        source_instance: String,
        target_node_id: String,
        command: ControllerMessage,
    },
    ForwardResult {
        delivered: bool,
        #[serde(default)]
        error: String,
    },
}
