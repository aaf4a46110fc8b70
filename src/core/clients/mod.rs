// src/core/clients/mod.rs

//! RPC contracts consumed from the business registry and the tenant service.
//!
//! Both collaborators sit behind `async_trait` seams so every caller takes an
//! injected handle and tests swap in the static implementations.

mod http;
mod statics;

pub use http::{HttpBusinessRegistry, HttpTenantService};
pub use statics::{StaticBusinessRegistry, StaticTenantService};

use crate::core::FoghornError;
use crate::core::protocol::Fingerprint;
use async_trait::async_trait;
use std::fmt;

/// A playback key resolved to its canonical stream identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub internal_name: String,
    pub tenant_id: String,
}

/// An artifact hash resolved to its owning stream and tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub hash: String,
    pub internal_name: String,
    pub tenant_id: String,
    pub user_id: String,
}

/// Stream, tenant, and artifact metadata lookups.
#[async_trait]
pub trait BusinessRegistry: Send + Sync + fmt::Debug {
    async fn resolve_playback_id(&self, key: &str) -> Result<ResolvedStream, FoghornError>;
    async fn resolve_internal_name(&self, internal_name: &str)
    -> Result<ResolvedStream, FoghornError>;
    async fn resolve_clip_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError>;
    async fn resolve_dvr_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError>;
    async fn resolve_vod_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError>;
    /// Registers a new DVR recording and returns its hash.
    async fn register_dvr(
        &self,
        internal_name: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<String, FoghornError>;
}

/// A fingerprint match returned by the tenant service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintMatch {
    pub tenant_id: String,
    pub canonical_node_id: String,
}

/// The result of token-based node bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEnrollment {
    pub node_id: String,
    pub tenant_id: String,
    pub cluster_id: String,
    pub served_cluster_ids: Vec<String>,
}

/// Node identity and tenancy resolution.
#[async_trait]
pub trait TenantService: Send + Sync + fmt::Debug {
    /// Attempts to recognize a node by hardware fingerprint or known source
    /// address. `Ok(None)` means no match (distinct from the service being
    /// unreachable, which is an error).
    async fn resolve_node_fingerprint(
        &self,
        peer_ip: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<FingerprintMatch>, FoghornError>;

    /// Enrolls a new node with a one-time token.
    async fn bootstrap_edge_node(
        &self,
        token: &str,
        peer_ip: &str,
        fingerprint: &Fingerprint,
    ) -> Result<NodeEnrollment, FoghornError>;

    /// Reports hardware capacity observed at registration.
    async fn update_node_hardware(
        &self,
        node_id: &str,
        cpu_cores: u32,
        memory_gb: u32,
        disk_gb: u32,
    ) -> Result<(), FoghornError>;

    /// The tenant a node belongs to, if any.
    async fn get_node_owner(&self, node_id: &str) -> Result<Option<String>, FoghornError>;
}
