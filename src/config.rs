// src/config.rs

//! Manages controller configuration: loading, environment overrides, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use tracing::{info, warn};

/// Configuration for the node control-stream listener.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// Maximum number of concurrently connected media nodes.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_control_port(),
            max_nodes: default_max_nodes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_control_port() -> u16 {
    9090
}
fn default_max_nodes() -> usize {
    4096
}

/// Configuration for TLS on the control and relay listeners.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
    /// Permits a plaintext control listener even when TLS is configured off.
    /// Deployments behind a mesh set this; public edges must not.
    #[serde(default)]
    pub allow_insecure: bool,
}

/// Configuration for the controller-to-controller relay listener and pool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_relay_port")]
    pub port: u16,
    /// The address other controller instances should dial to reach this one.
    /// Written into every owner record this instance claims.
    #[serde(default)]
    pub advertise_addr: String,
    /// Idle peer connections are closed after this many seconds.
    #[serde(default = "default_relay_idle_secs")]
    pub idle_close_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            advertise_addr: String::new(),
            idle_close_secs: default_relay_idle_secs(),
        }
    }
}

fn default_relay_port() -> u16 {
    9443
}
fn default_relay_idle_secs() -> u64 {
    300
}

/// Configuration for the shared owner directory (one KV per cluster).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DirectoryConfig {
    /// Address of the shared KV. Empty means the in-memory directory is used
    /// (single-instance deployments and tests).
    #[serde(default)]
    pub addr: String,
    #[serde(default = "default_directory_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            addr: String::new(),
            timeout_ms: default_directory_timeout_ms(),
        }
    }
}

fn default_directory_timeout_ms() -> u64 {
    2000
}

/// Weights for the multi-factor node score.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct BalancerWeights {
    #[serde(default = "default_w_cpu")]
    pub cpu: u64,
    #[serde(default = "default_w_ram")]
    pub ram: u64,
    #[serde(default = "default_w_bw")]
    pub bw: u64,
    #[serde(default = "default_w_geo")]
    pub geo: u64,
    #[serde(default = "default_w_bonus")]
    pub stream_bonus: u64,
}

impl Default for BalancerWeights {
    fn default() -> Self {
        Self {
            cpu: default_w_cpu(),
            ram: default_w_ram(),
            bw: default_w_bw(),
            geo: default_w_geo(),
            stream_bonus: default_w_bonus(),
        }
    }
}

fn default_w_cpu() -> u64 {
    500
}
fn default_w_ram() -> u64 {
    500
}
fn default_w_bw() -> u64 {
    1000
}
fn default_w_geo() -> u64 {
    1000
}
fn default_w_bonus() -> u64 {
    50
}

/// Node health and staleness thresholds.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthConfig {
    /// Cadence of the staleness sweep in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// A node is marked inactive after this many seconds without an update.
    #[serde(default = "default_inactive_secs")]
    pub inactive_after_secs: u64,
    /// A node is evicted entirely after this many seconds without an update.
    #[serde(default = "default_removal_secs")]
    pub remove_after_secs: u64,
    /// Nodes younger than this are exempt from the sweep.
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_health_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_health_batch")]
    pub batch_size: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            inactive_after_secs: default_inactive_secs(),
            remove_after_secs: default_removal_secs(),
            min_age_secs: default_min_age_secs(),
            timeout_ms: default_health_timeout_ms(),
            max_concurrency: default_health_concurrency(),
            batch_size: default_health_batch(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_inactive_secs() -> u64 {
    90
}
fn default_removal_secs() -> u64 {
    600
}
fn default_min_age_secs() -> u64 {
    15
}
fn default_health_timeout_ms() -> u64 {
    5000
}
fn default_health_concurrency() -> usize {
    32
}
fn default_health_batch() -> usize {
    256
}

/// DVR recording defaults seeded into readiness responses.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DvrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dvr_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_dvr_format")]
    pub format: String,
    #[serde(default = "default_dvr_segment_secs")]
    pub segment_duration: u32,
}

impl Default for DvrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: default_dvr_retention_days(),
            format: default_dvr_format(),
            segment_duration: default_dvr_segment_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_dvr_retention_days() -> u32 {
    30
}
fn default_dvr_format() -> String {
    "ts".to_string()
}
fn default_dvr_segment_secs() -> u32 {
    6
}

/// Cold-storage and presigning settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StorageConfig {
    /// Root of warm storage on media nodes; defrost local paths live under it.
    #[serde(default = "default_storage_base")]
    pub base_path: String,
    /// The S3-compatible endpoint artifacts freeze to.
    #[serde(default)]
    pub s3_endpoint: String,
    #[serde(default)]
    pub s3_bucket: String,
    /// Secret for presigned-URL signatures.
    #[serde(default)]
    pub presign_secret: String,
    /// Presigned URL lifetime in seconds.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
    /// Artifacts with no explicit retention expire after this many days.
    #[serde(default = "default_retention_days")]
    pub default_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_storage_base(),
            s3_endpoint: String::new(),
            s3_bucket: String::new(),
            presign_secret: String::new(),
            presign_ttl_secs: default_presign_ttl_secs(),
            default_retention_days: default_retention_days(),
        }
    }
}

fn default_storage_base() -> String {
    "/var/lib/frameworks".to_string()
}
fn default_presign_ttl_secs() -> u64 {
    1800 // 30 minutes
}
fn default_retention_days() -> u32 {
    30
}

/// Upstream collaborator services.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServicesConfig {
    /// Base URL of the business registry (stream/tenant/artifact metadata).
    #[serde(default)]
    pub registry_url: String,
    /// Base URL of the tenant service (fingerprints, enrollment, node ownership).
    #[serde(default)]
    pub tenant_url: String,
    /// Bearer token presented to both services.
    #[serde(default, skip_serializing)]
    pub service_token: String,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            registry_url: String::new(),
            tenant_url: String::new(),
            service_token: String::new(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    8878
}

/// Configuration for the viewer-facing balance API.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// A raw representation of the config file before validation and overrides.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    instance_id: String,
    #[serde(default = "default_cluster_id")]
    cluster_id: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    root_domain: String,
    #[serde(default)]
    control: ControlConfig,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    relay: RelayConfig,
    #[serde(default)]
    directory: DirectoryConfig,
    #[serde(default)]
    balancer: BalancerWeights,
    #[serde(default)]
    health: HealthConfig,
    #[serde(default)]
    dvr: DvrConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    services: ServicesConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    api: ApiConfig,
}

fn default_cluster_id() -> String {
    "default".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// serde field defaults only apply during deserialization; Default must match.
impl Default for RawConfig {
    fn default() -> Self {
        Self {
            instance_id: String::new(),
            cluster_id: default_cluster_id(),
            log_level: default_log_level(),
            root_domain: String::new(),
            control: ControlConfig::default(),
            tls: TlsConfig::default(),
            relay: RelayConfig::default(),
            directory: DirectoryConfig::default(),
            balancer: BalancerWeights::default(),
            health: HealthConfig::default(),
            dvr: DvrConfig::default(),
            storage: StorageConfig::default(),
            services: ServicesConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// Represents the final, validated controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this controller instance within the cluster.
    pub instance_id: String,
    /// The cluster this instance primarily serves; prefixes owner-directory keys.
    pub cluster_id: String,
    pub log_level: String,
    /// Root domain substituted into advertised playback URLs.
    pub root_domain: String,
    pub control: ControlConfig,
    pub tls: TlsConfig,
    pub relay: RelayConfig,
    pub directory: DirectoryConfig,
    pub balancer: BalancerWeights,
    pub health: HealthConfig,
    pub dvr: DvrConfig,
    pub storage: StorageConfig,
    pub services: ServicesConfig,
    pub metrics: MetricsConfig,
    pub api: ApiConfig,
}

impl Default for Config {
    fn default() -> Self {
        RawConfig::default().resolve()
    }
}

impl RawConfig {
    fn resolve(self) -> Config {
        let instance_id = if self.instance_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.instance_id
        };
        Config {
            instance_id,
            cluster_id: self.cluster_id,
            log_level: self.log_level,
            root_domain: self.root_domain,
            control: self.control,
            tls: self.tls,
            relay: self.relay,
            directory: self.directory,
            balancer: self.balancer,
            health: self.health,
            dvr: self.dvr,
            storage: self.storage,
            services: self.services,
            metrics: self.metrics,
            api: self.api,
        }
    }
}

impl Config {
    /// Creates a new `Config` by reading a TOML file and applying environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw_config: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let mut config = raw_config.resolve();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds a config entirely from defaults plus environment overrides.
    /// Used when no config file is present on disk.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment variables take precedence over file values. These are the
    /// deployment-level knobs; everything else stays in the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("INSTANCE_ID") {
            self.instance_id = v;
        }
        if let Ok(v) = env::var("CLUSTER_ID") {
            self.cluster_id = v;
        }
        if let Ok(v) = env::var("SERVICE_TOKEN") {
            self.services.service_token = v;
        }
        if let Ok(v) = env::var("NAVIGATOR_ROOT_DOMAIN") {
            self.root_domain = v;
        }
        if let Ok(v) = env::var("DEFAULT_STORAGE_BASE") {
            self.storage.base_path = v;
        }
        if let Ok(v) = env::var("GRPC_USE_TLS") {
            self.tls.enabled = parse_bool(&v);
        }
        if let Ok(v) = env::var("GRPC_TLS_CERT_PATH") {
            self.tls.cert_path = v;
        }
        if let Ok(v) = env::var("GRPC_TLS_KEY_PATH") {
            self.tls.key_path = v;
        }
        if let Ok(v) = env::var("ALLOW_INSECURE_CONTROL_GRPC") {
            self.tls.allow_insecure = parse_bool(&v);
        }
        if let Ok(v) = env::var("HEALTH_POLL_INTERVAL_SECONDS")
            && let Ok(n) = v.parse()
        {
            self.health.poll_interval_secs = n;
        }
        if let Ok(v) = env::var("HEALTH_TIMEOUT_MS")
            && let Ok(n) = v.parse()
        {
            self.health.timeout_ms = n;
        }
        if let Ok(v) = env::var("HEALTH_MAX_CONCURRENCY")
            && let Ok(n) = v.parse()
        {
            self.health.max_concurrency = n;
        }
        if let Ok(v) = env::var("HEALTH_BATCH_SIZE")
            && let Ok(n) = v.parse()
        {
            self.health.batch_size = n;
        }
        if let Ok(v) = env::var("HEALTH_MIN_AGE_SECONDS")
            && let Ok(n) = v.parse()
        {
            self.health.min_age_secs = n;
        }
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.control.port == 0 {
            return Err(anyhow!("control.port cannot be 0"));
        }
        if self.control.host.trim().is_empty() {
            return Err(anyhow!("control.host cannot be empty"));
        }
        if self.cluster_id.trim().is_empty() {
            return Err(anyhow!("cluster_id cannot be empty"));
        }
        if self.instance_id.trim().is_empty() {
            return Err(anyhow!("instance_id cannot be empty"));
        }
        if self.control.max_nodes == 0 {
            return Err(anyhow!("control.max_nodes cannot be 0"));
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        } else if !self.tls.allow_insecure {
            warn!(
                "Control listener is plaintext and allow_insecure is not set. \
                Set tls.enabled or ALLOW_INSECURE_CONTROL_GRPC=true behind a trusted mesh."
            );
        }

        if self.relay.port == self.control.port {
            return Err(anyhow!("relay.port cannot equal control.port"));
        }

        if self.health.inactive_after_secs >= self.health.remove_after_secs {
            return Err(anyhow!(
                "health.inactive_after_secs must be lower than health.remove_after_secs"
            ));
        }
        if self.health.poll_interval_secs == 0 {
            return Err(anyhow!("health.poll_interval_secs cannot be 0"));
        }

        if self.storage.presign_ttl_secs == 0 {
            return Err(anyhow!("storage.presign_ttl_secs cannot be 0"));
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.control.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the control port"
                ));
            }
        }

        if self.api.enabled && self.api.port == self.control.port {
            return Err(anyhow!("api.port cannot be the same as the control port"));
        }

        if self.directory.addr.is_empty() {
            info!("No shared directory configured; using the in-process owner directory.");
        }
        Ok(())
    }

    /// The advertised relay address written into owner records; falls back to
    /// the listener address when no explicit advertise address is configured.
    pub fn relay_advertise_addr(&self) -> String {
        if !self.relay.advertise_addr.is_empty() {
            return self.relay.advertise_addr.clone();
        }
        format!("{}:{}", self.control.host, self.relay.port)
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}
