//! Command and reply capabilities.
//!
//! A [`Command`] is one unit of business logic selected by an envelope `Key`;
//! a [`Respondable`] is the write-back capability the dispatcher hands it.
//! Commands never see sockets, only the capability, so the same variant
//! serves TCP, UDP, and HTTP requests unchanged.

use std::io;

use async_trait::async_trait;
use serde_json::Value;

/// Error type command executions surface to the dispatch boundary.
pub type CommandError = Box<dyn std::error::Error + Send + Sync>;

/// One-shot reply capability bound to the request that carried the envelope.
///
/// Implementations write to the originating TCP stream, send a datagram back
/// to the UDP sender, or complete a pending HTTP exchange. Exactly one
/// response is expected per request.
#[async_trait]
pub trait Respondable: Send + Sync {
    /// Deliver one encoded response document to the requester.
    async fn respond(&self, bytes: &[u8]) -> io::Result<()>;
}

/// A unit of business logic constructed fresh for every request.
///
/// A variant either answers through the given [`Respondable`] itself or
/// returns an error for the dispatch boundary to convert into a structured
/// failure response. Returning `Ok` after responding is the normal path.
#[async_trait]
pub trait Command: Send + Sync {
    /// The payload the command was constructed with.
    fn data(&self) -> &Value;

    /// Run the command, producing exactly one response through `channel`
    /// unless an error is returned.
    async fn execute(&self, channel: &dyn Respondable) -> Result<(), CommandError>;
}
