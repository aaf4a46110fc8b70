// tests/integration/fixtures.rs

//! Common fixtures for controller tests: stable node ids, stream names, and
//! coordinate sets used across cases.

/// Node ids used by multi-node scenarios.
pub const NODE_A: &str = "node-a";
pub const NODE_B: &str = "node-b";
pub const NODE_STORAGE: &str = "node-storage";

/// Stream names.
pub const STREAM_MAIN: &str = "tenant01+main";

/// Coordinates: a viewer sitting on SITE_NEAR, with SITE_FAR half a world
/// away in longitude.
pub const SITE_NEAR: (f64, f64) = (1.0, 1.0);
pub const SITE_FAR: (f64, f64) = (1.0, 180.0);
pub const VIEWER: (f64, f64) = (1.0, 1.0);

/// A fingerprint hash the tenant service is seeded with.
pub const KNOWN_MACHINE_ID: &str = "3c6e0b8a9c15224a8228b9a98ca1531d";

#[allow(dead_code)] // Available for tests that need a second tenant.
pub const TENANT_A: &str = "tenant-a";
#[allow(dead_code)]
pub const TENANT_B: &str = "tenant-b";
