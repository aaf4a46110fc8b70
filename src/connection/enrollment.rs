// src/connection/enrollment.rs

//! Registration-time node identity resolution.
//!
//! A node proves who it is by hardware fingerprint (machine-id hash, then
//! MAC-set hash, then a source IP the tenant service recognizes) or, failing
//! that, by a one-time enrollment token. The canonical node id returned by
//! the tenant service always replaces the client-supplied one.

use crate::core::FoghornError;
use crate::core::protocol::Fingerprint;
use crate::core::state::FoghornState;
use std::sync::Arc;
use tracing::{debug, info};

/// The resolved identity of a registering node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentOutcome {
    pub node_id: String,
    pub tenant_id: Option<String>,
    pub cluster_id: Option<String>,
    /// Present only on token bootstrap; feeds the served-cluster snapshot.
    pub served_cluster_ids: Vec<String>,
}

/// Stable error codes surfaced on the control stream before closing it.
pub fn error_code(e: &FoghornError) -> &'static str {
    match e {
        FoghornError::EnrollmentRequired => "ENROLLMENT_REQUIRED",
        FoghornError::EnrollmentFailed(_) => "ENROLLMENT_FAILED",
        FoghornError::EnrollmentUnavailable(_) | FoghornError::Unavailable(_) => {
            "ENROLLMENT_UNAVAILABLE"
        }
        FoghornError::InvalidArgument(_) => "INVALID_ARGUMENT",
        _ => "INTERNAL",
    }
}

/// Resolves a `Register` message into a canonical identity.
pub async fn resolve_registration(
    state: &Arc<FoghornState>,
    peer_ip: &str,
    client_node_id: &str,
    fingerprint: Option<&Fingerprint>,
    enrollment_token: Option<&str>,
) -> Result<EnrollmentOutcome, FoghornError> {
    if client_node_id.is_empty() {
        return Err(FoghornError::InvalidArgument(
            "register carries no node id".to_string(),
        ));
    }

    let empty = Fingerprint::default();
    let fingerprint = fingerprint.unwrap_or(&empty);

    // Fingerprint resolution first; the tenant service applies the
    // machine-id > MACs > source-IP precedence.
    let lookup = state
        .tenants
        .resolve_node_fingerprint(peer_ip, fingerprint)
        .await
        .map_err(|e| match e {
            FoghornError::Unavailable(detail)
            | FoghornError::HttpClientError(detail)
            | FoghornError::Timeout(detail) => FoghornError::EnrollmentUnavailable(detail),
            other => other,
        })?;

    if let Some(found) = lookup {
        debug!(
            "Node {} recognized by fingerprint as {} (tenant {})",
            client_node_id, found.canonical_node_id, found.tenant_id
        );
        return Ok(EnrollmentOutcome {
            node_id: found.canonical_node_id,
            tenant_id: (!found.tenant_id.is_empty()).then_some(found.tenant_id),
            cluster_id: None,
            served_cluster_ids: Vec::new(),
        });
    }

    // No recognized fingerprint: a token is the only way in.
    let Some(token) = enrollment_token.filter(|t| !t.is_empty()) else {
        return Err(FoghornError::EnrollmentRequired);
    };

    let enrollment = state
        .tenants
        .bootstrap_edge_node(token, peer_ip, fingerprint)
        .await
        .map_err(|e| match e {
            FoghornError::Unavailable(detail)
            | FoghornError::HttpClientError(detail)
            | FoghornError::Timeout(detail) => FoghornError::EnrollmentUnavailable(detail),
            FoghornError::EnrollmentFailed(detail) => FoghornError::EnrollmentFailed(detail),
            other => FoghornError::EnrollmentFailed(other.to_string()),
        })?;

    info!(
        "Node {} enrolled via token as {} (tenant {}, cluster {})",
        client_node_id, enrollment.node_id, enrollment.tenant_id, enrollment.cluster_id
    );
    Ok(EnrollmentOutcome {
        node_id: enrollment.node_id,
        tenant_id: (!enrollment.tenant_id.is_empty()).then_some(enrollment.tenant_id),
        cluster_id: (!enrollment.cluster_id.is_empty()).then_some(enrollment.cluster_id),
        served_cluster_ids: enrollment.served_cluster_ids,
    })
}
