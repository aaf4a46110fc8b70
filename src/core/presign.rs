// src/core/presign.rs

//! Short-lived signed URLs for freeze uploads and defrost downloads.
//!
//! The S3-compatible object store accepts HMAC-SHA256 query signatures over
//! `(method, key, expiry)`. URLs expire after the configured TTL; nodes must
//! start transfers before then, not finish them.

use crate::core::FoghornError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignedMethod {
    Get,
    Put,
}

impl SignedMethod {
    fn as_str(&self) -> &'static str {
        match self {
            SignedMethod::Get => "GET",
            SignedMethod::Put => "PUT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Presigner {
    endpoint: String,
    bucket: String,
    secret: Vec<u8>,
    ttl: Duration,
}

impl Presigner {
    pub fn new(
        endpoint: impl Into<String>,
        bucket: impl Into<String>,
        secret: impl AsRef<[u8]>,
        ttl: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            secret: secret.as_ref().to_vec(),
            ttl,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.as_secs()
    }

    /// Produces a signed URL for one object key.
    pub fn sign(&self, method: SignedMethod, key: &str) -> Result<String, FoghornError> {
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| FoghornError::Internal(e.to_string()))?
            .as_secs()
            + self.ttl.as_secs();
        self.sign_at(method, key, expires)
    }

    /// Signature over `(method, key, expiry)`; split out so verification and
    /// tests can pin the expiry.
    pub fn sign_at(
        &self,
        method: SignedMethod,
        key: &str,
        expires: u64,
    ) -> Result<String, FoghornError> {
        let key = key.trim_start_matches('/');
        let signature = self.signature(method, key, expires)?;

        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| FoghornError::Internal(format!("bad S3 endpoint: {e}")))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| FoghornError::Internal("S3 endpoint cannot be a base".to_string()))?;
            segments.push(&self.bucket);
            for segment in key.split('/') {
                segments.push(segment);
            }
        }
        url.query_pairs_mut()
            .append_pair("X-Expires", &expires.to_string())
            .append_pair("X-Signature", &signature);
        Ok(url.to_string())
    }

    /// Checks a signature produced by [`Self::sign_at`]. Used by tests and by
    /// the admin surface to validate node-reported URLs. The comparison goes
    /// through the Mac verify API, which is constant-time.
    pub fn verify(&self, method: SignedMethod, key: &str, expires: u64, signature: &str) -> bool {
        let key = key.trim_start_matches('/');
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return false;
        };
        mac.update(Self::message(method, key, expires).as_bytes());
        hex::decode(signature)
            .map(|sig| mac.verify_slice(&sig).is_ok())
            .unwrap_or(false)
    }

    fn message(method: SignedMethod, key: &str, expires: u64) -> String {
        format!("{}\n{}\n{}", method.as_str(), key, expires)
    }

    fn signature(
        &self,
        method: SignedMethod,
        key: &str,
        expires: u64,
    ) -> Result<String, FoghornError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| FoghornError::Internal(e.to_string()))?;
        mac.update(Self::message(method, key, expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}
