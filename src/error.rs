//! Crate-level error aggregation.
//!
//! Each module owns its error enum; this one exists so embedding
//! applications and the daemon binary can hold any gateway failure in a
//! single type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::http::HttpServerError;
use crate::multiplexer::MultiplexerError;
use crate::plugins::PluginError;
use crate::protocol::ProtocolError;
use crate::registry::RegistryError;

/// Any error the gateway core surfaces to an embedding application.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("multiplexer error: {0}")]
    Multiplexer(#[from] MultiplexerError),

    #[error("http front door error: {0}")]
    Http(#[from] HttpServerError),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
