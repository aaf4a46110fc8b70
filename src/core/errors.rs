// src/core/errors.rs

//! Defines the primary error type for the entire application.

use std::num::{ParseFloatError, ParseIntError};
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the controller.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FoghornError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete frame in stream")]
    IncompleteFrame,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("node {0} is not connected")]
    NotConnected(String),

    #[error("enrollment required")]
    EnrollmentRequired,

    #[error("enrollment failed: {0}")]
    EnrollmentFailed(String),

    #[error("enrollment unavailable: {0}")]
    EnrollmentUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dependency unavailable: {0}")]
    Unavailable(String),

    #[error("all servers seem to be out of bandwidth")]
    OutOfCapacity,

    #[error("no nodes match required capabilities")]
    NoCapableNodes,

    #[error("missing or no inputs")]
    NoStreamSource,

    /// A typed control-flow error: the artifact is already being pulled back to
    /// warm storage by another caller. Carries the retry hint surfaced to HTTP
    /// callers as a 202.
    #[error("artifact is defrosting, retry in {retry_after_seconds}s")]
    Defrosting { retry_after_seconds: u64 },

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The peer controller accepted the forward but could not deliver it.
    #[error("peer relay rejected command: {0}")]
    PeerRejected(String),

    #[error("owner record for node {0} carries no peer address")]
    NoPeerAddress(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("request was canceled")]
    Canceled,

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for FoghornError {
    fn clone(&self) -> Self {
        match self {
            FoghornError::Io(e) => FoghornError::Io(Arc::clone(e)),
            FoghornError::IncompleteFrame => FoghornError::IncompleteFrame,
            FoghornError::Protocol(s) => FoghornError::Protocol(s.clone()),
            FoghornError::HttpClientError(s) => FoghornError::HttpClientError(s.clone()),
            FoghornError::NotConnected(s) => FoghornError::NotConnected(s.clone()),
            FoghornError::EnrollmentRequired => FoghornError::EnrollmentRequired,
            FoghornError::EnrollmentFailed(s) => FoghornError::EnrollmentFailed(s.clone()),
            FoghornError::EnrollmentUnavailable(s) => FoghornError::EnrollmentUnavailable(s.clone()),
            FoghornError::InvalidArgument(s) => FoghornError::InvalidArgument(s.clone()),
            FoghornError::Unavailable(s) => FoghornError::Unavailable(s.clone()),
            FoghornError::OutOfCapacity => FoghornError::OutOfCapacity,
            FoghornError::NoCapableNodes => FoghornError::NoCapableNodes,
            FoghornError::NoStreamSource => FoghornError::NoStreamSource,
            FoghornError::Defrosting {
                retry_after_seconds,
            } => FoghornError::Defrosting {
                retry_after_seconds: *retry_after_seconds,
            },
            FoghornError::ArtifactNotFound(s) => FoghornError::ArtifactNotFound(s.clone()),
            FoghornError::PeerRejected(s) => FoghornError::PeerRejected(s.clone()),
            FoghornError::NoPeerAddress(s) => FoghornError::NoPeerAddress(s.clone()),
            FoghornError::Timeout(s) => FoghornError::Timeout(s.clone()),
            FoghornError::Canceled => FoghornError::Canceled,
            FoghornError::Internal(s) => FoghornError::Internal(s.clone()),
        }
    }
}

impl PartialEq for FoghornError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FoghornError::Io(e1), FoghornError::Io(e2)) => e1.to_string() == e2.to_string(),
            (FoghornError::Protocol(s1), FoghornError::Protocol(s2)) => s1 == s2,
            (FoghornError::HttpClientError(s1), FoghornError::HttpClientError(s2)) => s1 == s2,
            (FoghornError::NotConnected(s1), FoghornError::NotConnected(s2)) => s1 == s2,
            (FoghornError::EnrollmentFailed(s1), FoghornError::EnrollmentFailed(s2)) => s1 == s2,
            (FoghornError::EnrollmentUnavailable(s1), FoghornError::EnrollmentUnavailable(s2)) => {
                s1 == s2
            }
            (FoghornError::InvalidArgument(s1), FoghornError::InvalidArgument(s2)) => s1 == s2,
            (FoghornError::Unavailable(s1), FoghornError::Unavailable(s2)) => s1 == s2,
            (
                FoghornError::Defrosting {
                    retry_after_seconds: r1,
                },
                FoghornError::Defrosting {
                    retry_after_seconds: r2,
                },
            ) => r1 == r2,
            (FoghornError::ArtifactNotFound(s1), FoghornError::ArtifactNotFound(s2)) => s1 == s2,
            (FoghornError::PeerRejected(s1), FoghornError::PeerRejected(s2)) => s1 == s2,
            (FoghornError::NoPeerAddress(s1), FoghornError::NoPeerAddress(s2)) => s1 == s2,
            (FoghornError::Timeout(s1), FoghornError::Timeout(s2)) => s1 == s2,
            (FoghornError::Internal(s1), FoghornError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for FoghornError {
    fn from(e: std::io::Error) -> Self {
        FoghornError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for FoghornError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FoghornError::Timeout(e.to_string())
        } else {
            FoghornError::HttpClientError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FoghornError {
    fn from(e: serde_json::Error) -> Self {
        FoghornError::Protocol(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<uuid::Error> for FoghornError {
    fn from(e: uuid::Error) -> Self {
        FoghornError::Internal(format!("Failed to generate UUID: {e}"))
    }
}

impl From<ParseIntError> for FoghornError {
    fn from(e: ParseIntError) -> Self {
        FoghornError::InvalidArgument(format!("not an integer: {e}"))
    }
}

impl From<ParseFloatError> for FoghornError {
    fn from(e: ParseFloatError) -> Self {
        FoghornError::InvalidArgument(format!("not a float: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for FoghornError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        FoghornError::Timeout(e.to_string())
    }
}
