#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Gateway Core
//!
//! An application gateway that accepts command envelopes over TCP, UDP, and
//! HTTP, resolves them against a runtime-mutable command registry, and runs
//! them on a bounded worker pool.
//!
//! ## Overview
//!
//! Requests are JSON envelopes with a `Key` naming a command and a `Data`
//! payload. A single-task event loop multiplexes every TCP and UDP channel;
//! whatever one read returns is handed to the dispatcher as one complete
//! envelope together with a write-back capability for that request. Commands
//! answer through the capability, so the same command code serves every
//! transport, including HTTP exchanges bridged through the front door.
//!
//! New commands arrive without a restart: a watcher polls the plugin
//! directory and loads dynamic-library artifacts into the live registry,
//! last write winning key by key.
//!
//! ## Module Organization
//!
//! - [`protocol`] - Envelope and response document codec
//! - [`command`] - Command and reply capabilities
//! - [`registry`] - Runtime-mutable command constructor registry
//! - [`commands`] - Built-in command variants
//! - [`dispatch`] - Worker pool and the dispatch error boundary
//! - [`plugins`] - Artifact discovery, loading, and hot-reload
//! - [`multiplexer`] - The TCP/UDP event loop
//! - [`http`] - HTTP front door and URI matcher chain
//! - [`server`] - Composition root wiring the pieces together
//! - [`config`] - Configuration loading and environment overlay
//! - [`error`] - Crate-level error aggregation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gateway_core::config::GatewayConfig;
//! use gateway_core::server::GatewayServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     gateway_core::logging::init_logging();
//!
//!     let server = GatewayServer::new(GatewayConfig::from_env()?);
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests, including transport round trips
//! ```

pub mod command;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod logging;
pub mod multiplexer;
pub mod plugins;
pub mod protocol;
pub mod registry;
pub mod server;

pub use command::{Command, CommandError, Respondable};
pub use config::GatewayConfig;
pub use dispatch::RequestDispatcher;
pub use error::{GatewayError, Result};
pub use multiplexer::ConnectionMultiplexer;
pub use protocol::Envelope;
pub use registry::{CommandConstructor, CommandRegistry};
pub use server::GatewayServer;
