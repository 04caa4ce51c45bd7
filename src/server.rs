//! Gateway composition root.

use std::sync::Arc;

use tracing::info;

use crate::config::GatewayConfig;
use crate::dispatch::RequestDispatcher;
use crate::error::Result;
use crate::http::HttpFrontDoor;
use crate::multiplexer::ConnectionMultiplexer;
use crate::plugins::{DylibArtifactLoader, PluginService};
use crate::registry::CommandRegistry;

/// The assembled gateway: registry, plugin service, dispatcher, HTTP front
/// door, and connection multiplexer wired from one configuration value.
///
/// # Examples
///
/// ```rust,no_run
/// use gateway_core::config::GatewayConfig;
/// use gateway_core::server::GatewayServer;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = GatewayServer::new(GatewayConfig::default());
///     server.start().await?;
///     tokio::signal::ctrl_c().await?;
///     server.stop().await?;
///     Ok(())
/// }
/// ```
pub struct GatewayServer {
    config: GatewayConfig,
    dispatcher: Arc<RequestDispatcher>,
    multiplexer: ConnectionMultiplexer,
}

impl GatewayServer {
    /// Wire the gateway from configuration. Nothing binds until
    /// [`start`](Self::start).
    pub fn new(config: GatewayConfig) -> Self {
        let registry = Arc::new(CommandRegistry::new());
        let plugins = PluginService::new(
            config.plugins.clone(),
            Arc::clone(&registry),
            Arc::new(DylibArtifactLoader),
        );
        let dispatcher = Arc::new(RequestDispatcher::new(
            config.dispatcher.clone(),
            registry,
            plugins,
        ));
        let http = HttpFrontDoor::new(config.http.clone(), Arc::clone(&dispatcher));
        let multiplexer = ConnectionMultiplexer::new(
            config.multiplexer.clone(),
            Arc::clone(&dispatcher),
            http,
        );

        Self {
            config,
            dispatcher,
            multiplexer,
        }
    }

    /// Register the configured listeners, start the dispatcher (workers,
    /// built-in commands, plugins), then bring up the transports.
    pub async fn start(&self) -> Result<()> {
        info!("Starting gateway server");

        for listener in &self.config.multiplexer.tcp_listeners {
            self.multiplexer
                .add_tcp_listener(listener.host.clone(), listener.port)
                .await?;
        }
        for listener in &self.config.multiplexer.udp_listeners {
            self.multiplexer
                .add_udp_listener(listener.host.clone(), listener.port)
                .await?;
        }

        self.dispatcher.start().await?;
        if let Err(e) = self.multiplexer.start().await {
            // leave nothing half-running behind a failed start
            let _ = self.dispatcher.stop().await;
            return Err(e.into());
        }

        info!("Gateway server started");
        Ok(())
    }

    /// Stop the transports first so no new requests arrive, then drain the
    /// dispatcher.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping gateway server");
        self.multiplexer.stop().await?;
        self.dispatcher.stop().await?;
        info!("Gateway server stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Arc<RequestDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn multiplexer(&self) -> &ConnectionMultiplexer {
        &self.multiplexer
    }
}
