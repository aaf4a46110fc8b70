// tests/integration/test_helpers.rs

//! Shared helpers for end-to-end controller tests.
//!
//! `TestContext` builds a full `FoghornState` against in-process
//! collaborators (memory directory, static registry and tenant service) and
//! offers fake node connections whose outbound command queues the test can
//! drain and assert on.

use foghorn::config::Config;
use foghorn::connection::NodeHandle;
use foghorn::core::clients::StaticTenantService;
use foghorn::core::directory::MemoryDirectory;
use foghorn::core::protocol::{
    Capabilities, ControllerMessage, GeoLocation, LoadMetrics, StreamStats,
};
use foghorn::core::state::{Collaborators, FoghornState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct TestContext {
    pub state: Arc<FoghornState>,
    pub directory: Arc<MemoryDirectory>,
    pub tenants: Arc<StaticTenantService>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let (collaborators, directory, tenants) = Collaborators::for_tests();
        let init = FoghornState::initialize(config, collaborators).expect("state initializes");
        Self {
            state: init.state,
            directory,
            tenants,
        }
    }

    /// Installs a fake connected node and returns the receiver end of its
    /// control stream: every command the controller sends to this node lands
    /// there.
    pub fn connect_node(&self, node_id: &str) -> mpsc::Receiver<ControllerMessage> {
        let (tx, rx) = mpsc::channel(64);
        let session_id = self.state.next_session_id();
        self.state.connections.register(NodeHandle::new(
            node_id.to_string(),
            session_id,
            format!("127.0.0.1:{}", 40000 + session_id),
            tx,
        ));
        rx
    }

    /// Seeds a healthy, selectable node with sane metrics.
    pub fn seed_node(&self, node_id: &str, lat: f64, lon: f64) {
        self.seed_node_with(node_id, lat, lon, healthy_metrics());
    }

    pub fn seed_node_with(&self, node_id: &str, lat: f64, lon: f64, metrics: LoadMetrics) {
        let store = &self.state.store;
        store.touch_node(node_id, true);
        store.update_node_metrics(node_id, metrics);
        store.set_node_info(
            node_id,
            &format!("http://{node_id}.example:8080"),
            true,
            (lat != 0.0 || lon != 0.0).then(|| GeoLocation {
                lat,
                lon,
                name: Some(format!("{node_id}-site")),
            }),
            "",
        );
        store.update_node_attributes(
            node_id,
            Capabilities {
                ingest: true,
                edge: true,
                storage: false,
                processing: false,
                roles: vec![],
            },
            vec![],
            vec![],
            None,
        );
    }

    /// Marks a node as holding the stream as a source (one active input).
    pub fn seed_source(&self, node_id: &str, stream: &str) {
        let mut streams = HashMap::new();
        streams.insert(
            stream.to_string(),
            StreamStats {
                total: 0,
                inputs: 1,
                bytes_up: 0,
                bytes_down: 0,
                bandwidth: 0,
                replicated: false,
            },
        );
        self.state.store.update_node_stats(node_id, &streams);
    }
}

/// A controller config suitable for tests: fixed instance identity and all
/// network surfaces disabled.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.instance_id = "test-instance".to_string();
    config.cluster_id = "test-cluster".to_string();
    config.metrics.enabled = false;
    config.api.enabled = false;
    config.storage.presign_secret = "test-secret".to_string();
    config.storage.s3_endpoint = "https://s3.test.example".to_string();
    config.storage.s3_bucket = "artifacts".to_string();
    config.tls.allow_insecure = true;
    config
}

/// Metrics for a node with plenty of headroom.
pub fn healthy_metrics() -> LoadMetrics {
    LoadMetrics {
        cpu_tenths: 100,
        ram_max_mib: 16384,
        ram_used_mib: 4096,
        up_speed: 10_000_000,
        down_speed: 5_000_000,
        bw_limit: 1_000_000_000,
        disk_used_bytes: 0,
        disk_total_bytes: 0,
    }
}
