// src/server/initialization.rs

//! Handles the complete controller initialization process: TLS, state setup,
//! and listener binding.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::{Collaborators, FoghornState};
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::info;

/// Initializes all controller components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let collaborators = Collaborators::from_config(&config);
    let init = FoghornState::initialize(config, collaborators)?;
    let state = init.state.clone();
    info!("Controller state initialized.");

    let (control_listener, relay_listener, max_nodes) = {
        let config = state.config.lock().await;
        let control =
            TcpListener::bind((config.control.host.as_str(), config.control.port)).await?;
        info!(
            "Control stream listener on {}:{}",
            config.control.host, config.control.port
        );
        let relay = TcpListener::bind((config.control.host.as_str(), config.relay.port)).await?;
        (control, relay, config.control.max_nodes)
    };
    let connection_permits = Arc::new(tokio::sync::Semaphore::new(max_nodes));

    Ok(ServerContext {
        state,
        init_channels: Some(init),
        control_listener,
        relay_listener: Some(relay_listener),
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    info!(
        "Instance {} serving cluster '{}' (relay advertised at {})",
        config.instance_id,
        config.cluster_id,
        config.relay_advertise_addr()
    );
    if config.directory.addr.is_empty() {
        info!("Shared directory: in-process (single-instance mode).");
    } else {
        info!("Shared directory: {}", config.directory.addr);
    }
}
