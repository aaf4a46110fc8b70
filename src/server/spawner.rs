// src/server/spawner.rs

//! Spawns all of the controller's long-running background tasks.

use super::context::ServerContext;
use super::{api_server, metrics_server};
use crate::core::relay;
use crate::core::tasks::{OrphanCleanup, RetentionJob, ServedClusterRefresh, StalenessSweeper};
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

/// Spawns all critical background tasks into the context's JoinSet.
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = &ctx.state;
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    let init = ctx
        .init_channels
        .take()
        .expect("spawn_all runs once, before the init channels are consumed");
    let config = state.config.lock().await.clone();

    // --- Metrics server ---
    if config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx_metrics).await;
            Ok(())
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Balance API ---
    if config.api.enabled {
        let api_state = state.clone();
        let shutdown_rx_api = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            api_server::run_api_server(api_state, shutdown_rx_api).await;
            Ok(())
        });
    }

    // --- Peer relay listener ---
    if let Some(relay_listener) = ctx.relay_listener.take() {
        let connections = state.connections.clone();
        let shutdown_rx_relay = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            relay::server::run(relay_listener, connections, shutdown_rx_relay).await;
            Ok(())
        });
    }

    // --- Relay pool idle pruning ---
    {
        let prune_state = state.clone();
        let idle = Duration::from_secs(config.relay.idle_close_secs);
        let mut shutdown_rx_prune = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            let mut interval = tokio::time::interval(idle.max(Duration::from_secs(30)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        prune_state.relay.peer_pool().prune_idle(idle);
                    }
                    _ = shutdown_rx_prune.recv() => break,
                }
            }
            Ok(())
        });
    }

    // --- Core maintenance jobs ---
    let sweeper = StalenessSweeper::new(state.clone());
    let shutdown_rx_sweep = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        sweeper.run(shutdown_rx_sweep).await;
        Ok(())
    });

    let retention = RetentionJob::new(state.clone());
    let shutdown_rx_retention = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        retention.run(shutdown_rx_retention).await;
        Ok(())
    });

    let orphans = OrphanCleanup::new(state.clone());
    let shutdown_rx_orphans = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        orphans.run(shutdown_rx_orphans).await;
        Ok(())
    });

    let refresh = ServedClusterRefresh::new(state.clone());
    let shutdown_rx_refresh = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        refresh.run(shutdown_rx_refresh).await;
        Ok(())
    });

    // --- Analytics drain ---
    // Downstream emission is a collaborator; here the bus drains to the log
    // at debug so events are observable in any deployment.
    {
        let mut analytics_rx = init.analytics_rx;
        let mut shutdown_rx_analytics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            loop {
                tokio::select! {
                    event = analytics_rx.recv() => {
                        match event {
                            Some(event) => debug!("analytics: {:?}", event),
                            None => break,
                        }
                    }
                    _ = shutdown_rx_analytics.recv() => break,
                }
            }
            Ok(())
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
