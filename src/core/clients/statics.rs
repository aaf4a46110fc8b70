// src/core/clients/statics.rs

//! Static collaborator implementations.
//!
//! Used by tests and by standalone deployments that run without a business
//! registry or tenant service: streams resolve to themselves, DVR hashes are
//! generated locally, and any fingerprint or token that was seeded resolves.

use super::{
    BusinessRegistry, FingerprintMatch, NodeEnrollment, ResolvedArtifact, ResolvedStream,
    TenantService,
};
use crate::core::FoghornError;
use crate::core::protocol::Fingerprint;
use async_trait::async_trait;
use dashmap::DashMap;

/// A registry answering from seeded maps, falling back to echoing the key.
#[derive(Debug, Default)]
pub struct StaticBusinessRegistry {
    streams: DashMap<String, ResolvedStream>,
    artifacts: DashMap<String, ResolvedArtifact>,
}

impl StaticBusinessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_stream(&self, key: &str, internal_name: &str, tenant_id: &str) {
        self.streams.insert(
            key.to_string(),
            ResolvedStream {
                internal_name: internal_name.to_string(),
                tenant_id: tenant_id.to_string(),
            },
        );
    }

    pub fn seed_artifact(&self, artifact: ResolvedArtifact) {
        self.artifacts.insert(artifact.hash.clone(), artifact);
    }

    fn stream_or_echo(&self, key: &str) -> ResolvedStream {
        self.streams
            .get(key)
            .map(|s| s.clone())
            .unwrap_or_else(|| ResolvedStream {
                internal_name: key.to_string(),
                tenant_id: String::new(),
            })
    }

    fn artifact(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.artifacts
            .get(hash)
            .map(|a| a.clone())
            .ok_or_else(|| FoghornError::ArtifactNotFound(hash.to_string()))
    }
}

#[async_trait]
impl BusinessRegistry for StaticBusinessRegistry {
    async fn resolve_playback_id(&self, key: &str) -> Result<ResolvedStream, FoghornError> {
        Ok(self.stream_or_echo(key))
    }

    async fn resolve_internal_name(
        &self,
        internal_name: &str,
    ) -> Result<ResolvedStream, FoghornError> {
        Ok(self.stream_or_echo(internal_name))
    }

    async fn resolve_clip_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.artifact(hash)
    }

    async fn resolve_dvr_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.artifact(hash)
    }

    async fn resolve_vod_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.artifact(hash)
    }

    async fn register_dvr(
        &self,
        internal_name: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<String, FoghornError> {
        let hash = uuid::Uuid::new_v4().simple().to_string();
        self.artifacts.insert(
            hash.clone(),
            ResolvedArtifact {
                hash: hash.clone(),
                internal_name: internal_name.to_string(),
                tenant_id: tenant_id.to_string(),
                user_id: user_id.to_string(),
            },
        );
        Ok(hash)
    }
}

/// A tenant service resolving from seeded fingerprint, IP, and token tables.
#[derive(Debug, Default)]
pub struct StaticTenantService {
    by_machine_id: DashMap<String, FingerprintMatch>,
    by_macs: DashMap<String, FingerprintMatch>,
    by_ip: DashMap<String, FingerprintMatch>,
    tokens: DashMap<String, NodeEnrollment>,
    /// When set, every call fails as if the service were down.
    pub unreachable: std::sync::atomic::AtomicBool,
}

impl StaticTenantService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_machine_id(&self, machine_id_sha256: &str, tenant_id: &str, node_id: &str) {
        self.by_machine_id.insert(
            machine_id_sha256.to_string(),
            FingerprintMatch {
                tenant_id: tenant_id.to_string(),
                canonical_node_id: node_id.to_string(),
            },
        );
    }

    pub fn seed_macs(&self, macs_sha256: &str, tenant_id: &str, node_id: &str) {
        self.by_macs.insert(
            macs_sha256.to_string(),
            FingerprintMatch {
                tenant_id: tenant_id.to_string(),
                canonical_node_id: node_id.to_string(),
            },
        );
    }

    pub fn seed_ip(&self, ip: &str, tenant_id: &str, node_id: &str) {
        self.by_ip.insert(
            ip.to_string(),
            FingerprintMatch {
                tenant_id: tenant_id.to_string(),
                canonical_node_id: node_id.to_string(),
            },
        );
    }

    pub fn seed_token(&self, token: &str, enrollment: NodeEnrollment) {
        self.tokens.insert(token.to_string(), enrollment);
    }

    fn check_reachable(&self) -> Result<(), FoghornError> {
        if self.unreachable.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(FoghornError::Unavailable("tenant service down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantService for StaticTenantService {
    async fn resolve_node_fingerprint(
        &self,
        peer_ip: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<FingerprintMatch>, FoghornError> {
        self.check_reachable()?;
        // Resolution precedence: machine id, MAC-set hash, then source IP.
        if !fingerprint.machine_id_sha256.is_empty()
            && let Some(found) = self.by_machine_id.get(&fingerprint.machine_id_sha256)
        {
            return Ok(Some(found.clone()));
        }
        if !fingerprint.macs_sha256.is_empty()
            && let Some(found) = self.by_macs.get(&fingerprint.macs_sha256)
        {
            return Ok(Some(found.clone()));
        }
        if !peer_ip.is_empty()
            && let Some(found) = self.by_ip.get(peer_ip)
        {
            return Ok(Some(found.clone()));
        }
        Ok(None)
    }

    async fn bootstrap_edge_node(
        &self,
        token: &str,
        _peer_ip: &str,
        _fingerprint: &Fingerprint,
    ) -> Result<NodeEnrollment, FoghornError> {
        self.check_reachable()?;
        self.tokens
            .get(token)
            .map(|e| e.clone())
            .ok_or_else(|| FoghornError::EnrollmentFailed("invalid or expired token".to_string()))
    }

    async fn update_node_hardware(
        &self,
        _node_id: &str,
        _cpu_cores: u32,
        _memory_gb: u32,
        _disk_gb: u32,
    ) -> Result<(), FoghornError> {
        self.check_reachable()
    }

    async fn get_node_owner(&self, node_id: &str) -> Result<Option<String>, FoghornError> {
        self.check_reachable()?;
        Ok(self
            .by_machine_id
            .iter()
            .chain(self.by_macs.iter())
            .find(|entry| entry.value().canonical_node_id == node_id)
            .map(|entry| entry.value().tenant_id.clone()))
    }
}
