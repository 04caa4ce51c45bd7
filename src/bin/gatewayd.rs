//! Gateway daemon.
//!
//! Runs the assembled gateway until interrupted. An optional first argument
//! names a YAML config file; `GATEWAY_*` environment variables overlay
//! whatever was loaded.

use anyhow::Context;
use tracing::info;

use gateway_core::config::GatewayConfig;
use gateway_core::server::GatewayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gateway_core::logging::init_logging();

    let mut config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_yaml_file(&path)
            .with_context(|| format!("loading config file {path}"))?,
        None => GatewayConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;

    let server = GatewayServer::new(config);
    server.start().await.context("starting gateway server")?;

    info!("Gateway running; press ctrl-c to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    server.stop().await.context("stopping gateway server")?;
    Ok(())
}
