// src/core/state/core.rs

//! Defines the central `FoghornState` struct, holding all shared controller state.

use super::StateStore;
use crate::config::Config;
use crate::connection::ConnectionRegistry;
use crate::core::FoghornError;
use crate::core::artifacts::ArtifactStore;
use crate::core::balancer::Balancer;
use crate::core::clients::{
    BusinessRegistry, HttpBusinessRegistry, HttpTenantService, StaticBusinessRegistry,
    StaticTenantService, TenantService,
};
use crate::core::directory::{MemoryDirectory, OwnerDirectory, RespDirectory};
use crate::core::events::{AnalyticsEvent, EventBus};
use crate::core::presign::Presigner;
use crate::core::relay::CommandRelay;
use crate::core::triggers::{AllowAllTriggers, TriggerProcessor};
use crate::core::workflows::{ClipEngine, DefrostEngine, DefrostWaiters, DvrEngine, FreezeEngine};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

/// The injected collaborator handles. Production wiring builds them from
/// config; tests hand in statics and fakes per case.
pub struct Collaborators {
    pub directory: Arc<dyn OwnerDirectory>,
    pub registry: Arc<dyn BusinessRegistry>,
    pub tenants: Arc<dyn TenantService>,
    pub triggers: Arc<dyn TriggerProcessor>,
}

impl Collaborators {
    /// Builds collaborators from configuration: HTTP clients where URLs are
    /// configured, self-contained statics otherwise.
    pub fn from_config(config: &Config) -> Self {
        let timeout = Duration::from_millis(config.services.rpc_timeout_ms);
        let directory: Arc<dyn OwnerDirectory> = if config.directory.addr.is_empty() {
            Arc::new(MemoryDirectory::new())
        } else {
            Arc::new(RespDirectory::new(
                config.directory.addr.clone(),
                Duration::from_millis(config.directory.timeout_ms),
            ))
        };
        let registry: Arc<dyn BusinessRegistry> = if config.services.registry_url.is_empty() {
            Arc::new(StaticBusinessRegistry::new())
        } else {
            Arc::new(HttpBusinessRegistry::new(
                config.services.registry_url.clone(),
                config.services.service_token.clone(),
                timeout,
            ))
        };
        let tenants: Arc<dyn TenantService> = if config.services.tenant_url.is_empty() {
            Arc::new(StaticTenantService::new())
        } else {
            Arc::new(HttpTenantService::new(
                config.services.tenant_url.clone(),
                config.services.service_token.clone(),
                timeout,
            ))
        };
        Self {
            directory,
            registry,
            tenants,
            triggers: Arc::new(AllowAllTriggers),
        }
    }

    /// All-static collaborators for tests, returning the concrete handles so
    /// cases can seed them.
    pub fn for_tests() -> (Self, Arc<MemoryDirectory>, Arc<StaticTenantService>) {
        let directory = Arc::new(MemoryDirectory::new());
        let tenants = Arc::new(StaticTenantService::new());
        let collaborators = Self {
            directory: directory.clone(),
            registry: Arc::new(StaticBusinessRegistry::new()),
            tenants: tenants.clone(),
            triggers: Arc::new(AllowAllTriggers),
        };
        (collaborators, directory, tenants)
    }
}

/// Contains the initialized state plus the channel ends consumed by the
/// background task spawner.
pub struct FoghornInit {
    pub state: Arc<FoghornState>,
    /// Drained by the analytics forwarding task.
    pub analytics_rx: mpsc::Receiver<AnalyticsEvent>,
}

/// The central struct holding all shared controller state. Wrapped in an
/// `Arc` and handed to every connection handler and background task.
#[derive(Debug)]
pub struct FoghornState {
    /// Runtime configuration; a Mutex so admin surfaces can adjust it.
    pub config: Arc<Mutex<Config>>,
    /// This instance's identity, immutable for the process lifetime.
    pub instance_id: String,
    /// The cluster whose owner keys this instance writes.
    pub cluster_id: String,
    /// The relay address peers dial to reach streams owned here.
    pub advertise_addr: String,

    pub store: Arc<StateStore>,
    pub artifacts: Arc<ArtifactStore>,
    pub connections: Arc<ConnectionRegistry>,
    pub directory: Arc<dyn OwnerDirectory>,
    pub registry: Arc<dyn BusinessRegistry>,
    pub tenants: Arc<dyn TenantService>,
    pub triggers: Arc<dyn TriggerProcessor>,
    pub relay: Arc<CommandRelay>,
    pub balancer: Arc<Balancer>,

    pub dvr: Arc<DvrEngine>,
    pub clips: Arc<ClipEngine>,
    pub freeze: Arc<FreezeEngine>,
    pub defrost: Arc<DefrostEngine>,

    pub events: EventBus,
    /// The clusters this instance serves, swapped atomically by the refresh
    /// job; readers clone the Arc.
    served_clusters: RwLock<Arc<Vec<String>>>,
    session_counter: AtomicU64,
}

impl FoghornState {
    /// Initializes the entire controller state from configuration and the
    /// injected collaborators. This is the single factory for the shared
    /// context; nothing here touches the network.
    pub fn initialize(
        config: Config,
        collaborators: Collaborators,
    ) -> Result<FoghornInit, FoghornError> {
        let instance_id = config.instance_id.clone();
        let cluster_id = config.cluster_id.clone();
        let advertise_addr = config.relay_advertise_addr();

        let store = Arc::new(StateStore::new());
        let artifacts = Arc::new(ArtifactStore::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let (events, analytics_rx) = EventBus::new();

        let relay = Arc::new(CommandRelay::new(
            instance_id.clone(),
            cluster_id.clone(),
            connections.clone(),
            collaborators.directory.clone(),
        ));

        let balancer = Arc::new(Balancer::new(
            store.clone(),
            config.balancer,
            Duration::from_secs(config.health.inactive_after_secs),
        ));

        let presigner = Presigner::new(
            if config.storage.s3_endpoint.is_empty() {
                "https://s3.invalid".to_string()
            } else {
                config.storage.s3_endpoint.clone()
            },
            config.storage.s3_bucket.clone(),
            config.storage.presign_secret.as_bytes(),
            Duration::from_secs(config.storage.presign_ttl_secs),
        );

        let dvr = Arc::new(DvrEngine::new(
            artifacts.clone(),
            store.clone(),
            relay.clone(),
            collaborators.registry.clone(),
            events.clone(),
            config.dvr.clone(),
            config.storage.default_retention_days,
        ));
        let clips = Arc::new(ClipEngine::new(artifacts.clone(), events.clone()));
        let freeze = Arc::new(FreezeEngine::new(
            artifacts.clone(),
            collaborators.registry.clone(),
            presigner.clone(),
            config.storage.s3_endpoint.clone(),
            config.storage.s3_bucket.clone(),
        ));
        let defrost = Arc::new(DefrostEngine::new(
            artifacts.clone(),
            store.clone(),
            relay.clone(),
            presigner,
            Arc::new(DefrostWaiters::new()),
            config.storage.base_path.clone(),
        ));

        let initial_clusters = Arc::new(vec![cluster_id.clone()]);

        let state = Arc::new(Self {
            config: Arc::new(Mutex::new(config)),
            instance_id,
            cluster_id,
            advertise_addr,
            store,
            artifacts,
            connections,
            directory: collaborators.directory,
            registry: collaborators.registry,
            tenants: collaborators.tenants,
            triggers: collaborators.triggers,
            relay,
            balancer,
            dvr,
            clips,
            freeze,
            defrost,
            events,
            served_clusters: RwLock::new(initial_clusters),
            session_counter: AtomicU64::new(1),
        });

        info!(
            "Controller instance {} initialized for cluster {}",
            state.instance_id, state.cluster_id
        );
        Ok(FoghornInit {
            state,
            analytics_rx,
        })
    }

    /// A fresh session id for an accepted control stream.
    pub fn next_session_id(&self) -> u64 {
        self.session_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// The clusters this instance currently serves.
    pub fn served_clusters(&self) -> Arc<Vec<String>> {
        self.served_clusters.read().clone()
    }

    /// Swaps the served-cluster snapshot. Called by the refresh job.
    pub fn set_served_clusters(&self, clusters: Vec<String>) {
        *self.served_clusters.write() = Arc::new(clusters);
    }
}
