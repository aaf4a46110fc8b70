// src/core/clients/http.rs

//! HTTP implementations of the collaborator RPC contracts.

use super::{
    BusinessRegistry, FingerprintMatch, NodeEnrollment, ResolvedArtifact, ResolvedStream,
    TenantService,
};
use crate::core::FoghornError;
use crate::core::protocol::Fingerprint;
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("static client configuration is valid")
}

async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
    client: &reqwest::Client,
    base: &str,
    token: &str,
    path: &str,
    body: &Req,
) -> Result<Resp, FoghornError> {
    let url = format!("{}/{}", base.trim_end_matches('/'), path);
    let response = client
        .post(&url)
        .bearer_auth(token)
        .json(body)
        .send()
        .await?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(FoghornError::ArtifactNotFound(path.to_string()));
    }
    if status.is_server_error() {
        return Err(FoghornError::Unavailable(format!("{url} returned {status}")));
    }
    if !status.is_success() {
        let detail = response.text().await.unwrap_or_default();
        return Err(FoghornError::InvalidArgument(format!(
            "{url} returned {status}: {detail}"
        )));
    }
    Ok(response.json().await?)
}

/// The business registry over its JSON-RPC-ish HTTP surface.
#[derive(Debug)]
pub struct HttpBusinessRegistry {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBusinessRegistry {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    key: &'a str,
}

#[derive(Deserialize)]
struct StreamResponse {
    internal_name: String,
    tenant_id: String,
}

#[derive(Deserialize)]
struct ArtifactResponse {
    hash: String,
    internal_name: String,
    tenant_id: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Serialize)]
struct RegisterDvrRequest<'a> {
    internal_name: &'a str,
    tenant_id: &'a str,
    user_id: &'a str,
}

#[derive(Deserialize)]
struct RegisterDvrResponse {
    dvr_hash: String,
}

#[async_trait]
impl BusinessRegistry for HttpBusinessRegistry {
    async fn resolve_playback_id(&self, key: &str) -> Result<ResolvedStream, FoghornError> {
        let resp: StreamResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/resolve/playback-id",
            &KeyRequest { key },
        )
        .await?;
        Ok(ResolvedStream {
            internal_name: resp.internal_name,
            tenant_id: resp.tenant_id,
        })
    }

    async fn resolve_internal_name(
        &self,
        internal_name: &str,
    ) -> Result<ResolvedStream, FoghornError> {
        let resp: StreamResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/resolve/internal-name",
            &KeyRequest { key: internal_name },
        )
        .await?;
        Ok(ResolvedStream {
            internal_name: resp.internal_name,
            tenant_id: resp.tenant_id,
        })
    }

    async fn resolve_clip_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.resolve_artifact("v1/resolve/clip-hash", hash).await
    }

    async fn resolve_dvr_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.resolve_artifact("v1/resolve/dvr-hash", hash).await
    }

    async fn resolve_vod_hash(&self, hash: &str) -> Result<ResolvedArtifact, FoghornError> {
        self.resolve_artifact("v1/resolve/vod-hash", hash).await
    }

    async fn register_dvr(
        &self,
        internal_name: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<String, FoghornError> {
        let resp: RegisterDvrResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/dvr/register",
            &RegisterDvrRequest {
                internal_name,
                tenant_id,
                user_id,
            },
        )
        .await?;
        Ok(resp.dvr_hash)
    }
}

impl HttpBusinessRegistry {
    async fn resolve_artifact(
        &self,
        path: &str,
        hash: &str,
    ) -> Result<ResolvedArtifact, FoghornError> {
        let resp: ArtifactResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            path,
            &KeyRequest { key: hash },
        )
        .await?;
        Ok(ResolvedArtifact {
            hash: resp.hash,
            internal_name: resp.internal_name,
            tenant_id: resp.tenant_id,
            user_id: resp.user_id,
        })
    }
}

/// The tenant service over HTTP.
#[derive(Debug)]
pub struct HttpTenantService {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTenantService {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[derive(Serialize)]
struct FingerprintRequest<'a> {
    peer_ip: &'a str,
    local_ipv4: &'a [String],
    local_ipv6: &'a [String],
    macs_sha256: &'a str,
    machine_id_sha256: &'a str,
}

#[derive(Deserialize)]
struct FingerprintResponse {
    #[serde(default)]
    matched: bool,
    #[serde(default)]
    tenant_id: String,
    #[serde(default)]
    canonical_node_id: String,
}

#[derive(Serialize)]
struct BootstrapRequest<'a> {
    token: &'a str,
    peer_ip: &'a str,
    local_ipv4: &'a [String],
    local_ipv6: &'a [String],
    macs_sha256: &'a str,
    machine_id_sha256: &'a str,
}

#[derive(Deserialize)]
struct BootstrapResponse {
    node_id: String,
    tenant_id: String,
    cluster_id: String,
    #[serde(default)]
    served_cluster_ids: Vec<String>,
}

#[derive(Serialize)]
struct HardwareRequest<'a> {
    node_id: &'a str,
    cpu_cores: u32,
    memory_gb: u32,
    disk_gb: u32,
}

#[derive(Serialize)]
struct NodeOwnerRequest<'a> {
    node_id: &'a str,
}

#[derive(Deserialize)]
struct NodeOwnerResponse {
    #[serde(default)]
    tenant_id: Option<String>,
}

#[async_trait]
impl TenantService for HttpTenantService {
    async fn resolve_node_fingerprint(
        &self,
        peer_ip: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<FingerprintMatch>, FoghornError> {
        let resp: FingerprintResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/nodes/resolve-fingerprint",
            &FingerprintRequest {
                peer_ip,
                local_ipv4: &fingerprint.local_ipv4,
                local_ipv6: &fingerprint.local_ipv6,
                macs_sha256: &fingerprint.macs_sha256,
                machine_id_sha256: &fingerprint.machine_id_sha256,
            },
        )
        .await?;
        if !resp.matched || resp.canonical_node_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(FingerprintMatch {
            tenant_id: resp.tenant_id,
            canonical_node_id: resp.canonical_node_id,
        }))
    }

    async fn bootstrap_edge_node(
        &self,
        token: &str,
        peer_ip: &str,
        fingerprint: &Fingerprint,
    ) -> Result<NodeEnrollment, FoghornError> {
        let resp: BootstrapResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/nodes/bootstrap",
            &BootstrapRequest {
                token,
                peer_ip,
                local_ipv4: &fingerprint.local_ipv4,
                local_ipv6: &fingerprint.local_ipv6,
                macs_sha256: &fingerprint.macs_sha256,
                machine_id_sha256: &fingerprint.machine_id_sha256,
            },
        )
        .await
        .map_err(|e| match e {
            FoghornError::InvalidArgument(detail) => FoghornError::EnrollmentFailed(detail),
            other => other,
        })?;
        Ok(NodeEnrollment {
            node_id: resp.node_id,
            tenant_id: resp.tenant_id,
            cluster_id: resp.cluster_id,
            served_cluster_ids: resp.served_cluster_ids,
        })
    }

    async fn update_node_hardware(
        &self,
        node_id: &str,
        cpu_cores: u32,
        memory_gb: u32,
        disk_gb: u32,
    ) -> Result<(), FoghornError> {
        let _: serde_json::Value = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/nodes/hardware",
            &HardwareRequest {
                node_id,
                cpu_cores,
                memory_gb,
                disk_gb,
            },
        )
        .await?;
        Ok(())
    }

    async fn get_node_owner(&self, node_id: &str) -> Result<Option<String>, FoghornError> {
        let resp: NodeOwnerResponse = post_json(
            &self.client,
            &self.base_url,
            &self.token,
            "v1/nodes/owner",
            &NodeOwnerRequest { node_id },
        )
        .await?;
        Ok(resp.tenant_id.filter(|t| !t.is_empty()))
    }
}
