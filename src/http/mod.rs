//! HTTP front door.
//!
//! Translates RESTish HTTP requests into command envelopes through the
//! matcher chain, then completes each exchange from the response document
//! the command produces: the document's `Status` becomes the HTTP status
//! line and the encoded document the body. Unroutable paths answer 404 with
//! an empty body, recognized-but-stubbed resources 501. The front door runs
//! its own listener beside the multiplexer's event loop and shares its
//! lifecycle.

pub mod router;

pub use router::{MatcherChain, RouteAction, RouteOutcome, UriMatcher};

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::Respondable;
use crate::config::HttpConfig;
use crate::dispatch::RequestDispatcher;
use crate::protocol::{self, DATA_FIELD, KEY_FIELD};

/// Errors raised by the front door lifecycle.
#[derive(Debug, Error)]
pub enum HttpServerError {
    #[error("http front door is already running")]
    AlreadyRunning,

    #[error("failed to bind http listener on {address}: {error}")]
    BindFailed { address: String, error: String },
}

struct HttpState {
    dispatcher: Arc<RequestDispatcher>,
    chain: MatcherChain,
}

/// Build the axum application serving the front door.
fn create_app(state: Arc<HttpState>) -> Router {
    // the chain does its own path matching, so every request lands in one
    // fallback handler
    Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(
    State(state): State<Arc<HttpState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let Some(action) = state.chain.route(&method, uri.path()) else {
        debug!("No route for {} {}", method, uri.path());
        return StatusCode::NOT_FOUND.into_response();
    };

    match action {
        RouteAction::Unimplemented { resource } => {
            debug!(
                "Unimplemented resource `{}` for {} {}",
                resource,
                method,
                uri.path()
            );
            StatusCode::NOT_IMPLEMENTED.into_response()
        }
        RouteAction::DispatchEnvelope { key } => dispatch_envelope(&state, key, &body).await,
    }
}

/// Wrap `body` as an envelope under `key`, dispatch it, and wait for the
/// command's response document.
async fn dispatch_envelope(state: &HttpState, key: &str, body: &[u8]) -> Response {
    let payload = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) if value.is_object() => value,
        Ok(_) => {
            return failure_response(StatusCode::BAD_REQUEST, "request body must be a JSON object")
        }
        Err(e) => {
            return failure_response(StatusCode::BAD_REQUEST, &format!("invalid JSON body: {e}"))
        }
    };

    let mut envelope = serde_json::Map::new();
    envelope.insert(KEY_FIELD.to_string(), serde_json::Value::from(key));
    envelope.insert(DATA_FIELD.to_string(), payload);
    let bytes = match protocol::encode(&serde_json::Value::Object(envelope)) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Could not encode dispatch envelope: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (responder, reply_rx) = HttpResponder::new();
    if let Err(e) = state.dispatcher.handle_request(bytes, Box::new(responder)).await {
        warn!("Dispatcher unavailable for http request: {}", e);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let Ok(reply) = reply_rx.await else {
        error!("Request finished without ever responding");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    match protocol::extract_status(&reply) {
        Ok(status) => {
            let code = u16::try_from(status)
                .ok()
                .and_then(|candidate| StatusCode::from_u16(candidate).ok())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (code, reply).into_response()
        }
        Err(e) => {
            warn!("Response document without a usable status: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn failure_response(code: StatusCode, info: &str) -> Response {
    let document = protocol::response_document(i64::from(code.as_u16()), info);
    match protocol::encode(&document) {
        Ok(body) => (code, body).into_response(),
        Err(_) => code.into_response(),
    }
}

/// One-shot bridge from a dispatched command back to the waiting HTTP
/// exchange.
struct HttpResponder {
    reply_tx: Mutex<Option<oneshot::Sender<Vec<u8>>>>,
}

impl HttpResponder {
    fn new() -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (reply_tx, reply_rx) = oneshot::channel();
        (
            Self {
                reply_tx: Mutex::new(Some(reply_tx)),
            },
            reply_rx,
        )
    }
}

#[async_trait]
impl Respondable for HttpResponder {
    async fn respond(&self, bytes: &[u8]) -> io::Result<()> {
        let Some(tx) = self.reply_tx.lock().take() else {
            return Err(io::Error::other("response already sent"));
        };
        tx.send(bytes.to_vec()).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "http client no longer waiting")
        })
    }
}

#[derive(Default)]
struct ServeState {
    shutdown_tx: Option<broadcast::Sender<()>>,
    server: Option<JoinHandle<()>>,
    bound_address: Option<SocketAddr>,
}

/// The HTTP listener and its lifecycle. Started and stopped by the
/// connection multiplexer.
pub struct HttpFrontDoor {
    config: HttpConfig,
    state: Arc<HttpState>,
    serve: RwLock<ServeState>,
}

impl HttpFrontDoor {
    pub fn new(config: HttpConfig, dispatcher: Arc<RequestDispatcher>) -> Self {
        Self {
            config,
            state: Arc::new(HttpState {
                dispatcher,
                chain: MatcherChain::standard(),
            }),
            serve: RwLock::new(ServeState::default()),
        }
    }

    pub async fn start(&self) -> Result<(), HttpServerError> {
        let mut serve = self.serve.write().await;
        if serve.server.is_some() {
            return Err(HttpServerError::AlreadyRunning);
        }

        let requested = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| HttpServerError::BindFailed {
                address: requested.clone(),
                error: e.to_string(),
            })?;
        let bound_address = listener.local_addr().map_err(|e| HttpServerError::BindFailed {
            address: requested,
            error: e.to_string(),
        })?;

        let app = create_app(Arc::clone(&self.state));
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        });
        let handle = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("Http front door server error: {}", e);
            }
        });

        serve.shutdown_tx = Some(shutdown_tx);
        serve.server = Some(handle);
        serve.bound_address = Some(bound_address);
        info!("Http front door listening on {}", bound_address);
        Ok(())
    }

    /// Signal shutdown and wait for in-flight exchanges to finish. Harmless
    /// when the front door never started.
    pub async fn stop(&self) {
        let (shutdown_tx, server) = {
            let mut serve = self.serve.write().await;
            serve.bound_address = None;
            (serve.shutdown_tx.take(), serve.server.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = server {
            if let Err(e) = handle.await {
                error!("Http front door task failed: {}", e);
            }
            info!("Http front door stopped");
        }
    }

    /// The actual bound address while running; with port 0 this is where the
    /// kernel put us.
    pub async fn bound_address(&self) -> Option<SocketAddr> {
        self.serve.read().await.bound_address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_responder_accepts_exactly_one_response() {
        let (responder, reply_rx) = HttpResponder::new();

        responder.respond(b"first").await.unwrap();
        let error = responder.respond(b"second").await.unwrap_err();
        assert!(error.to_string().contains("already sent"));

        assert_eq!(reply_rx.await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn http_responder_reports_a_vanished_client() {
        let (responder, reply_rx) = HttpResponder::new();
        drop(reply_rx);

        let error = responder.respond(b"late").await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::BrokenPipe);
    }
}
