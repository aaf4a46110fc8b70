// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

mod api_server;
mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;
mod stream;

pub use stream::AnyStream;

/// The main controller startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize state, listeners, and TLS.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn all background tasks and the relay/metrics/API listeners.
    spawner::spawn_all(&mut server_context).await?;

    // 3. Start the control-stream accept loop. Runs until shutdown.
    connection_loop::run(server_context).await;

    Ok(())
}
