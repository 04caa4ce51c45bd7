//! Connection multiplexer: one event loop behind every TCP and UDP channel.
//!
//! All transport I/O happens on a single task. Each pass it waits for one
//! readiness event across the shutdown signal, every listener, every UDP
//! socket, and every accepted connection, then runs that event's handler
//! before waiting again. Readiness is level-triggered, so events that were
//! ready but not chosen on one pass are delivered on the next; nothing is
//! lost by handling one event at a time.
//!
//! Reads are non-blocking and bounded by the single reusable buffer: one
//! readiness event yields at most one read, and whatever one read returns is
//! forwarded to the dispatcher as one complete envelope. There is no
//! reassembly across reads. Writes go through per-connection writer handles
//! handed to the dispatcher, so responses never block the event loop.
//!
//! The lifecycle runs one way: listeners may be added only before `start`,
//! and a stopped multiplexer cannot be restarted.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::select_all;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::command::Respondable;
use crate::config::MultiplexerConfig;
use crate::dispatch::RequestDispatcher;
use crate::http::{HttpFrontDoor, HttpServerError};

/// Errors raised by multiplexer lifecycle operations.
#[derive(Debug, Error)]
pub enum MultiplexerError {
    #[error("multiplexer is already running")]
    AlreadyRunning,

    #[error("multiplexer is not running")]
    NotRunning,

    #[error("failed to bind {address}: {error}")]
    BindFailed { address: String, error: String },

    #[error(transparent)]
    HttpFrontDoor(#[from] HttpServerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Default)]
struct MuxCounters {
    accepted_connections: AtomicU64,
    open_connections: AtomicUsize,
    requests_forwarded: AtomicU64,
    channel_errors: AtomicU64,
}

/// Snapshot of multiplexer activity.
#[derive(Debug, Clone)]
pub struct MultiplexerStats {
    pub running: bool,
    pub accepted_connections: u64,
    pub open_connections: usize,
    pub requests_forwarded: u64,
    pub channel_errors: u64,
}

struct MuxState {
    lifecycle: Lifecycle,
    tcp_binds: Vec<(String, u16)>,
    udp_binds: Vec<(String, u16)>,
    bound_tcp: Vec<SocketAddr>,
    bound_udp: Vec<SocketAddr>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    event_loop: Option<JoinHandle<EventLoop>>,
}

/// The transport front end: owns the event loop, its channels, and the HTTP
/// front door's lifecycle.
pub struct ConnectionMultiplexer {
    config: MultiplexerConfig,
    dispatcher: Arc<RequestDispatcher>,
    http: HttpFrontDoor,
    state: RwLock<MuxState>,
    counters: Arc<MuxCounters>,
}

impl ConnectionMultiplexer {
    pub fn new(
        config: MultiplexerConfig,
        dispatcher: Arc<RequestDispatcher>,
        http: HttpFrontDoor,
    ) -> Self {
        Self {
            config,
            dispatcher,
            http,
            state: RwLock::new(MuxState {
                lifecycle: Lifecycle::Created,
                tcp_binds: Vec::new(),
                udp_binds: Vec::new(),
                bound_tcp: Vec::new(),
                bound_udp: Vec::new(),
                shutdown_tx: None,
                event_loop: None,
            }),
            counters: Arc::new(MuxCounters::default()),
        }
    }

    /// Register a TCP listening address. Only legal before `start`.
    pub async fn add_tcp_listener(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), MultiplexerError> {
        let mut state = self.state.write().await;
        if state.lifecycle != Lifecycle::Created {
            return Err(MultiplexerError::AlreadyRunning);
        }
        state.tcp_binds.push((host.into(), port));
        Ok(())
    }

    /// Register a UDP socket address. Only legal before `start`.
    pub async fn add_udp_listener(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), MultiplexerError> {
        let mut state = self.state.write().await;
        if state.lifecycle != Lifecycle::Created {
            return Err(MultiplexerError::AlreadyRunning);
        }
        state.udp_binds.push((host.into(), port));
        Ok(())
    }

    /// Bind every registered address, start the HTTP front door, and launch
    /// the event loop. A failed start leaves nothing bound and the
    /// multiplexer still startable.
    pub async fn start(&self) -> Result<(), MultiplexerError> {
        let mut state = self.state.write().await;
        if state.lifecycle != Lifecycle::Created {
            return Err(MultiplexerError::AlreadyRunning);
        }

        let mut listeners = Vec::with_capacity(state.tcp_binds.len());
        let mut bound_tcp = Vec::with_capacity(state.tcp_binds.len());
        for (host, port) in &state.tcp_binds {
            let listener = TcpListener::bind((host.as_str(), *port)).await.map_err(|e| {
                MultiplexerError::BindFailed {
                    address: format!("{host}:{port}"),
                    error: e.to_string(),
                }
            })?;
            if let Ok(address) = listener.local_addr() {
                info!("TCP listener bound on {}", address);
                bound_tcp.push(address);
            }
            listeners.push(listener);
        }

        let mut udp_sockets = Vec::with_capacity(state.udp_binds.len());
        let mut bound_udp = Vec::with_capacity(state.udp_binds.len());
        for (host, port) in &state.udp_binds {
            let socket = UdpSocket::bind((host.as_str(), *port)).await.map_err(|e| {
                MultiplexerError::BindFailed {
                    address: format!("{host}:{port}"),
                    error: e.to_string(),
                }
            })?;
            if let Ok(address) = socket.local_addr() {
                info!("UDP socket bound on {}", address);
                bound_udp.push(address);
            }
            udp_sockets.push(Arc::new(socket));
        }

        self.http.start().await?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let event_loop = EventLoop {
            dispatcher: Arc::clone(&self.dispatcher),
            listeners,
            udp_sockets,
            connections: HashMap::new(),
            buffer: vec![0u8; self.config.buffer_size.max(1)],
            counters: Arc::clone(&self.counters),
        };
        // state stays untouched until every channel is up
        state.bound_tcp = bound_tcp;
        state.bound_udp = bound_udp;
        state.event_loop = Some(tokio::spawn(event_loop.run(shutdown_rx)));
        state.shutdown_tx = Some(shutdown_tx);
        state.lifecycle = Lifecycle::Running;
        info!(
            "Connection multiplexer running with {} tcp and {} udp listener(s)",
            state.bound_tcp.len(),
            state.bound_udp.len()
        );
        Ok(())
    }

    /// Signal the event loop, wait for it to exit, close every channel it
    /// owned, then stop the HTTP front door.
    pub async fn stop(&self) -> Result<(), MultiplexerError> {
        let mut state = self.state.write().await;
        if state.lifecycle != Lifecycle::Running {
            return Err(MultiplexerError::NotRunning);
        }

        info!("Stopping connection multiplexer");
        if let Some(tx) = state.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = state.event_loop.take() {
            match handle.await {
                Ok(event_loop) => event_loop.close_channels(),
                Err(e) => error!("Event loop task failed: {}", e),
            }
        }

        self.http.stop().await;
        state.bound_tcp.clear();
        state.bound_udp.clear();
        state.lifecycle = Lifecycle::Stopped;
        info!("Connection multiplexer stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.lifecycle == Lifecycle::Running
    }

    /// Addresses the TCP listeners actually bound; with port 0 these carry
    /// the kernel-assigned ports.
    pub async fn tcp_addresses(&self) -> Vec<SocketAddr> {
        self.state.read().await.bound_tcp.clone()
    }

    /// Addresses the UDP sockets actually bound.
    pub async fn udp_addresses(&self) -> Vec<SocketAddr> {
        self.state.read().await.bound_udp.clone()
    }

    pub fn http_front_door(&self) -> &HttpFrontDoor {
        &self.http
    }

    pub async fn stats(&self) -> MultiplexerStats {
        MultiplexerStats {
            running: self.is_running().await,
            accepted_connections: self.counters.accepted_connections.load(Ordering::Relaxed),
            open_connections: self.counters.open_connections.load(Ordering::Relaxed),
            requests_forwarded: self.counters.requests_forwarded.load(Ordering::Relaxed),
            channel_errors: self.counters.channel_errors.load(Ordering::Relaxed),
        }
    }
}

struct TcpConnection {
    read_half: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    peer_address: SocketAddr,
    connected_at: DateTime<Utc>,
}

enum Readiness {
    Shutdown,
    Accepted(usize, io::Result<(TcpStream, SocketAddr)>),
    TcpReadable(Uuid, io::Result<()>),
    UdpReadable(usize, io::Result<()>),
}

struct EventLoop {
    dispatcher: Arc<RequestDispatcher>,
    listeners: Vec<TcpListener>,
    udp_sockets: Vec<Arc<UdpSocket>>,
    connections: HashMap<Uuid, TcpConnection>,
    buffer: Vec<u8>,
    counters: Arc<MuxCounters>,
}

impl EventLoop {
    async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Self {
        debug!("Event loop started");
        loop {
            let event = next_event(
                &mut shutdown_rx,
                &self.listeners,
                &self.udp_sockets,
                &self.connections,
            )
            .await;

            match event {
                Readiness::Shutdown => break,
                Readiness::Accepted(index, result) => self.handle_accept(index, result),
                Readiness::TcpReadable(id, readiness) => {
                    self.handle_tcp_readable(id, readiness).await;
                }
                Readiness::UdpReadable(index, readiness) => {
                    self.handle_udp_readable(index, readiness).await;
                }
            }
        }
        debug!("Event loop exited");
        self
    }

    fn handle_accept(&mut self, index: usize, result: io::Result<(TcpStream, SocketAddr)>) {
        match result {
            Ok((stream, peer_address)) => {
                let connection_id = Uuid::new_v4();
                let (read_half, write_half) = stream.into_split();
                self.connections.insert(
                    connection_id,
                    TcpConnection {
                        read_half,
                        writer: Arc::new(Mutex::new(write_half)),
                        peer_address,
                        connected_at: Utc::now(),
                    },
                );
                self.counters.accepted_connections.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .open_connections
                    .store(self.connections.len(), Ordering::Relaxed);
                info!("New connection {} from {}", connection_id, peer_address);
            }
            Err(e) => {
                // the listener stays registered; accept faults are transient
                self.counters.channel_errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to accept connection on listener {}: {}", index, e);
            }
        }
    }

    async fn handle_tcp_readable(&mut self, connection_id: Uuid, readiness: io::Result<()>) {
        if let Err(e) = readiness {
            self.counters.channel_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Readiness failure on connection {}: {}", connection_id, e);
            self.close_connection(connection_id, "readiness failure");
            return;
        }

        let (outcome, writer, peer_address) = {
            let Some(connection) = self.connections.get(&connection_id) else {
                return;
            };
            (
                connection.read_half.try_read(&mut self.buffer),
                Arc::clone(&connection.writer),
                connection.peer_address,
            )
        };

        match outcome {
            // a read of zero bytes is the end-of-stream sentinel
            Ok(0) => self.close_connection(connection_id, "closed by peer"),
            Ok(bytes_read) => {
                debug!(
                    "Read {} bytes from connection {} ({})",
                    bytes_read, connection_id, peer_address
                );
                let payload = self.buffer[..bytes_read].to_vec();
                self.forward(payload, Box::new(TcpResponder { writer, peer_address }))
                    .await;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // spurious readiness; wait for the next event
            }
            Err(e) => {
                self.counters.channel_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Read failure on connection {}: {}", connection_id, e);
                self.close_connection(connection_id, "read failure");
            }
        }
    }

    async fn handle_udp_readable(&mut self, index: usize, readiness: io::Result<()>) {
        if let Err(e) = readiness {
            self.counters.channel_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Readiness failure on UDP socket {}: {}", index, e);
            return;
        }

        let Some(socket) = self.udp_sockets.get(index).map(Arc::clone) else {
            return;
        };
        match socket.try_recv_from(&mut self.buffer) {
            Ok((bytes_read, peer_address)) => {
                debug!("UDP datagram of {} bytes from {}", bytes_read, peer_address);
                let payload = self.buffer[..bytes_read].to_vec();
                self.forward(payload, Box::new(UdpResponder { socket, peer_address }))
                    .await;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                // datagram faults are per-packet; the socket stays registered
                self.counters.channel_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Receive failure on UDP socket {}: {}", index, e);
            }
        }
    }

    /// Hand one payload to the dispatcher with its reply capability.
    async fn forward(&self, payload: Vec<u8>, channel: Box<dyn Respondable>) {
        self.counters.requests_forwarded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.dispatcher.handle_request(payload, channel).await {
            warn!("Dispatcher rejected request: {}", e);
        }
    }

    fn close_connection(&mut self, connection_id: Uuid, reason: &str) {
        if let Some(connection) = self.connections.remove(&connection_id) {
            info!(
                "Closing connection {} from {} after {}s: {}",
                connection_id,
                connection.peer_address,
                (Utc::now() - connection.connected_at).num_seconds(),
                reason
            );
        }
        self.counters
            .open_connections
            .store(self.connections.len(), Ordering::Relaxed);
    }

    /// Drop every listener, socket, and connection the loop owned.
    fn close_channels(mut self) {
        let closed = self.listeners.len() + self.udp_sockets.len() + self.connections.len();
        self.listeners.clear();
        self.udp_sockets.clear();
        self.connections.clear();
        self.counters.open_connections.store(0, Ordering::Relaxed);
        debug!("Closed {} channel(s)", closed);
    }
}

/// Wait for exactly one readiness event. The shutdown future is always
/// present, so the select set is never empty, and it sits first so shutdown
/// wins any tie.
async fn next_event(
    shutdown_rx: &mut broadcast::Receiver<()>,
    listeners: &[TcpListener],
    udp_sockets: &[Arc<UdpSocket>],
    connections: &HashMap<Uuid, TcpConnection>,
) -> Readiness {
    let mut events: Vec<Pin<Box<dyn Future<Output = Readiness> + Send + '_>>> =
        Vec::with_capacity(1 + listeners.len() + udp_sockets.len() + connections.len());

    events.push(Box::pin(async move {
        let _ = shutdown_rx.recv().await;
        Readiness::Shutdown
    }));
    for (index, listener) in listeners.iter().enumerate() {
        events.push(Box::pin(async move {
            Readiness::Accepted(index, listener.accept().await)
        }));
    }
    for (index, socket) in udp_sockets.iter().enumerate() {
        events.push(Box::pin(async move {
            Readiness::UdpReadable(index, socket.readable().await)
        }));
    }
    for (&connection_id, connection) in connections {
        events.push(Box::pin(async move {
            Readiness::TcpReadable(connection_id, connection.read_half.readable().await)
        }));
    }

    let (event, _, _) = select_all(events).await;
    event
}

/// Writes responses back to an accepted connection's stream, raw bytes with
/// no framing.
struct TcpResponder {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    peer_address: SocketAddr,
}

#[async_trait]
impl Respondable for TcpResponder {
    async fn respond(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        debug!("Responded with {} bytes to {}", bytes.len(), self.peer_address);
        Ok(())
    }
}

/// Sends one reply datagram to the request's sender.
struct UdpResponder {
    socket: Arc<UdpSocket>,
    peer_address: SocketAddr,
}

#[async_trait]
impl Respondable for UdpResponder {
    async fn respond(&self, bytes: &[u8]) -> io::Result<()> {
        self.socket.send_to(bytes, self.peer_address).await.map(|_| ())
    }
}
