// src/core/state/mod.rs

//! Defines the central `FoghornState` struct and the in-memory cluster registry.
//! This module is broken down into logical parts for better organization.

mod core;
mod node;
mod store;
mod stream;

pub use core::{Collaborators, FoghornInit, FoghornState};
pub use node::{BinaryHost, MediaNode, OutputTemplate, parse_outputs, resolve_template_url};
pub use store::{ClusterSnapshot, StateStore, SweepOutcome};
pub use stream::{StreamInstance, UnifiedStream};
