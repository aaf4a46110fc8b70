// src/core/tasks/mod.rs

//! This module contains all long-running background jobs that support the
//! controller: staleness sweeping, retention expiry, orphan cleanup, and the
//! served-cluster refresh.

pub mod cluster_refresh;
pub mod orphan;
pub mod retention;
pub mod staleness;

pub use cluster_refresh::ServedClusterRefresh;
pub use orphan::OrphanCleanup;
pub use retention::RetentionJob;
pub use staleness::StalenessSweeper;
