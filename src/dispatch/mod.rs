//! Request dispatch: decode, resolve, execute, respond.
//!
//! Every raw request from every transport flows through
//! [`RequestDispatcher::handle_request`]. The queued job runs decode,
//! resolve, and execute sequentially on one pool worker. Failures at any
//! stage are converted into structured failure responses right here, so a
//! malformed envelope or an unknown key never takes a worker down and the
//! requester always hears back.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use gateway_core::config::{DispatcherConfig, PluginsConfig};
//! use gateway_core::dispatch::RequestDispatcher;
//! use gateway_core::plugins::{DylibArtifactLoader, PluginService};
//! use gateway_core::registry::CommandRegistry;
//!
//! # tokio_test::block_on(async {
//! let plugin_dir = tempfile::tempdir().unwrap();
//! let registry = Arc::new(CommandRegistry::new());
//! let plugins = PluginService::new(
//!     PluginsConfig {
//!         directory: plugin_dir.path().to_path_buf(),
//!         poll_interval_ms: 500,
//!     },
//!     Arc::clone(&registry),
//!     Arc::new(DylibArtifactLoader),
//! );
//!
//! let dispatcher = RequestDispatcher::new(
//!     DispatcherConfig { worker_count: 4, queue_capacity: 64 },
//!     registry,
//!     plugins,
//! );
//!
//! // starting seeds the built-in commands into the shared registry
//! dispatcher.start().await.unwrap();
//! assert!(dispatcher.registry().contains("registerCompany"));
//! dispatcher.stop().await.unwrap();
//! # });
//! ```

pub mod worker_pool;

pub use worker_pool::{Job, WorkerPool, WorkerPoolError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::command::Respondable;
use crate::config::DispatcherConfig;
use crate::plugins::{PluginError, PluginService};
use crate::protocol;
use crate::registry::{CommandRegistry, RegistryError};

/// Errors raised by dispatcher lifecycle and submission.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("dispatcher is not running")]
    NotRunning,

    #[error(transparent)]
    WorkerPool(#[from] WorkerPoolError),

    #[error(transparent)]
    Plugin(#[from] PluginError),
}

#[derive(Debug, Default)]
struct DispatchCounters {
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone)]
pub struct DispatcherStats {
    pub running: bool,
    pub workers: usize,
    pub dispatched_requests: u64,
    pub failed_requests: u64,
}

/// Owns the worker pool, the command registry, and the plugin service.
pub struct RequestDispatcher {
    config: DispatcherConfig,
    registry: Arc<CommandRegistry>,
    plugins: PluginService,
    pool: RwLock<Option<WorkerPool>>,
    counters: Arc<DispatchCounters>,
}

impl RequestDispatcher {
    pub fn new(
        config: DispatcherConfig,
        registry: Arc<CommandRegistry>,
        plugins: PluginService,
    ) -> Self {
        Self {
            config,
            registry,
            plugins,
            pool: RwLock::new(None),
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// The shared registry, for embedding applications seeding extra
    /// commands.
    pub fn registry(&self) -> Arc<CommandRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn plugins(&self) -> &PluginService {
        &self.plugins
    }

    /// Start the worker pool, seed the built-in commands, then bring up
    /// plugin loading. A plugin startup failure rolls the pool back.
    pub async fn start(&self) -> Result<(), DispatchError> {
        let mut pool = self.pool.write().await;
        if pool.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }

        info!(
            "Starting request dispatcher with {} worker(s)",
            self.config.worker_count
        );
        let started = WorkerPool::start(self.config.worker_count, self.config.queue_capacity);
        crate::commands::register_builtin_commands(&self.registry);

        if let Err(e) = self.plugins.start().await {
            error!("Plugin service failed to start: {}", e);
            started.shutdown().await;
            return Err(e.into());
        }

        *pool = Some(started);
        Ok(())
    }

    /// Stop the plugin watcher, then drain and join the worker pool.
    pub async fn stop(&self) -> Result<(), DispatchError> {
        let pool = { self.pool.write().await.take() };
        let pool = pool.ok_or(DispatchError::NotRunning)?;

        self.plugins.stop().await;
        pool.shutdown().await;
        info!("Request dispatcher stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.pool.read().await.is_some()
    }

    pub async fn stats(&self) -> DispatcherStats {
        let pool = self.pool.read().await;
        DispatcherStats {
            running: pool.is_some(),
            workers: pool.as_ref().map(WorkerPool::worker_count).unwrap_or(0),
            dispatched_requests: self.counters.dispatched.load(Ordering::Relaxed),
            failed_requests: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Queue one raw request for decoding and execution on a pool worker.
    ///
    /// Applies backpressure when the queue is full. The returned result only
    /// covers queueing; execution outcomes travel through `channel`.
    pub async fn handle_request(
        &self,
        bytes: Vec<u8>,
        channel: Box<dyn Respondable>,
    ) -> Result<(), DispatchError> {
        let pool = self.pool.read().await;
        let pool = pool.as_ref().ok_or(DispatchError::NotRunning)?;

        let registry = Arc::clone(&self.registry);
        let counters = Arc::clone(&self.counters);
        let job: Job = Box::pin(async move {
            process_request(registry, bytes, channel, counters).await;
        });
        pool.submit(job).await?;
        Ok(())
    }
}

struct RequestFailure {
    status: i64,
    info: String,
}

/// Run one request to completion, converting any failure into a structured
/// response on the request's own channel.
async fn process_request(
    registry: Arc<CommandRegistry>,
    bytes: Vec<u8>,
    channel: Box<dyn Respondable>,
    counters: Arc<DispatchCounters>,
) {
    counters.dispatched.fetch_add(1, Ordering::Relaxed);

    let failure = match run_request(&registry, &bytes, channel.as_ref()).await {
        Ok(()) => return,
        Err(failure) => failure,
    };

    counters.failed.fetch_add(1, Ordering::Relaxed);
    warn!(status = failure.status, "Request failed: {}", failure.info);

    let document = protocol::response_document(failure.status, failure.info);
    match protocol::encode(&document) {
        Ok(body) => {
            if let Err(e) = channel.respond(&body).await {
                warn!("Could not deliver failure response: {}", e);
            }
        }
        Err(e) => error!("Could not encode failure response: {}", e),
    }
}

/// Decode, resolve, execute; each stage's error carries the status the
/// requester sees.
async fn run_request(
    registry: &CommandRegistry,
    bytes: &[u8],
    channel: &dyn Respondable,
) -> Result<(), RequestFailure> {
    let envelope = protocol::decode(bytes).map_err(|e| RequestFailure {
        status: 400,
        info: e.to_string(),
    })?;
    debug!("Dispatching command: key={}", envelope.key);

    let command = registry.create(&envelope.key, envelope.data).map_err(|e| {
        let status = match &e {
            RegistryError::UnknownCommand { .. } => 404,
            RegistryError::ConstructionFailed { .. } => 500,
        };
        RequestFailure {
            status,
            info: e.to_string(),
        }
    })?;

    command.execute(channel).await.map_err(|e| RequestFailure {
        status: 500,
        info: format!("command execution failed: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::command::{Command, CommandError};
    use crate::plugins::DylibArtifactLoader;
    use crate::protocol::{extract_status, INFO_FIELD};
    use crate::registry::CommandConstructor;

    #[derive(Clone, Default)]
    struct RecordingChannel {
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecordingChannel {
        fn responses(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn only_status(&self) -> i64 {
            let sent = self.responses();
            assert_eq!(sent.len(), 1, "expected exactly one response");
            extract_status(&sent[0]).unwrap()
        }
    }

    #[async_trait]
    impl Respondable for RecordingChannel {
        async fn respond(&self, bytes: &[u8]) -> std::io::Result<()> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    struct EchoCommand {
        data: Value,
    }

    #[async_trait]
    impl Command for EchoCommand {
        fn data(&self) -> &Value {
            &self.data
        }

        async fn execute(&self, channel: &dyn Respondable) -> Result<(), CommandError> {
            let mut document = protocol::response_document(200, "echo");
            document["Echo"] = self.data.clone();
            channel.respond(&protocol::encode(&document)?).await?;
            Ok(())
        }
    }

    fn dispatcher_with_plugin_dir(directory: &std::path::Path) -> RequestDispatcher {
        let registry = Arc::new(CommandRegistry::new());
        let plugins = PluginService::new(
            crate::config::PluginsConfig {
                directory: directory.to_path_buf(),
                poll_interval_ms: 500,
            },
            Arc::clone(&registry),
            Arc::new(DylibArtifactLoader),
        );
        RequestDispatcher::new(
            DispatcherConfig {
                worker_count: 2,
                queue_capacity: 16,
            },
            registry,
            plugins,
        )
    }

    #[tokio::test]
    async fn malformed_bytes_get_a_400_response() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        let channel = RecordingChannel::default();
        dispatcher
            .handle_request(b"{{{ not json".to_vec(), Box::new(channel.clone()))
            .await
            .unwrap();
        dispatcher.stop().await.unwrap();

        assert_eq!(channel.only_status(), 400);
    }

    #[tokio::test]
    async fn unknown_key_gets_a_404_and_the_dispatcher_keeps_serving() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        let first = RecordingChannel::default();
        dispatcher
            .handle_request(
                br#"{"Key":"nope","Data":{}}"#.to_vec(),
                Box::new(first.clone()),
            )
            .await
            .unwrap();

        let second = RecordingChannel::default();
        dispatcher
            .handle_request(
                br#"{"Key":"registerCompany","Data":{"Name":"Acme"}}"#.to_vec(),
                Box::new(second.clone()),
            )
            .await
            .unwrap();

        dispatcher.stop().await.unwrap();

        assert_eq!(first.only_status(), 404);
        let body: Value = serde_json::from_slice(&first.responses()[0]).unwrap();
        assert!(body[INFO_FIELD].as_str().unwrap().contains("nope"));
        assert_eq!(second.only_status(), 200);
    }

    #[tokio::test]
    async fn construction_failures_report_500() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        let failing: CommandConstructor = Arc::new(|_| Err("bad payload shape".into()));
        dispatcher.registry().register("fragile", failing);

        let channel = RecordingChannel::default();
        dispatcher
            .handle_request(
                br#"{"Key":"fragile","Data":{}}"#.to_vec(),
                Box::new(channel.clone()),
            )
            .await
            .unwrap();
        dispatcher.stop().await.unwrap();

        assert_eq!(channel.only_status(), 500);
    }

    #[tokio::test]
    async fn execution_errors_become_structured_500s() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        // registerProduct does not catch its own faults
        let channel = RecordingChannel::default();
        dispatcher
            .handle_request(
                br#"{"Key":"registerProduct","Data":{}}"#.to_vec(),
                Box::new(channel.clone()),
            )
            .await
            .unwrap();
        dispatcher.stop().await.unwrap();

        assert_eq!(channel.only_status(), 500);
        let body: Value = serde_json::from_slice(&channel.responses()[0]).unwrap();
        assert!(body[INFO_FIELD]
            .as_str()
            .unwrap()
            .contains("command execution failed"));
    }

    #[tokio::test]
    async fn concurrent_requests_answer_their_own_channels() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        let echo: CommandConstructor =
            Arc::new(|data| Ok(Box::new(EchoCommand { data }) as Box<dyn Command>));
        dispatcher.registry().register("echo", echo);

        let mut channels = Vec::new();
        for index in 0..16 {
            let channel = RecordingChannel::default();
            let envelope = format!(r#"{{"Key":"echo","Data":{{"Seq":{index}}}}}"#);
            dispatcher
                .handle_request(envelope.into_bytes(), Box::new(channel.clone()))
                .await
                .unwrap();
            channels.push(channel);
        }
        dispatcher.stop().await.unwrap();

        for (index, channel) in channels.iter().enumerate() {
            let sent = channel.responses();
            assert_eq!(sent.len(), 1);
            let body: Value = serde_json::from_slice(&sent[0]).unwrap();
            assert_eq!(body["Echo"]["Seq"], json!(index));
        }
    }

    #[tokio::test]
    async fn lifecycle_guards_hold() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());

        let channel = RecordingChannel::default();
        let early = dispatcher
            .handle_request(b"{}".to_vec(), Box::new(channel.clone()))
            .await;
        assert!(matches!(early, Err(DispatchError::NotRunning)));

        dispatcher.start().await.unwrap();
        assert!(matches!(
            dispatcher.start().await,
            Err(DispatchError::AlreadyRunning)
        ));

        dispatcher.stop().await.unwrap();
        assert!(matches!(
            dispatcher.stop().await,
            Err(DispatchError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn missing_plugin_directory_fails_startup_and_rolls_back() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let gone = plugin_dir.path().join("missing");
        let dispatcher = dispatcher_with_plugin_dir(&gone);

        let error = dispatcher.start().await.unwrap_err();
        assert!(matches!(error, DispatchError::Plugin(_)));
        assert!(!dispatcher.is_running().await);
    }

    #[tokio::test]
    async fn stats_count_dispatched_and_failed_requests() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher_with_plugin_dir(plugin_dir.path());
        dispatcher.start().await.unwrap();

        let ok = RecordingChannel::default();
        dispatcher
            .handle_request(
                br#"{"Key":"registerCompany","Data":{"Name":"A"}}"#.to_vec(),
                Box::new(ok.clone()),
            )
            .await
            .unwrap();
        let bad = RecordingChannel::default();
        dispatcher
            .handle_request(b"junk".to_vec(), Box::new(bad.clone()))
            .await
            .unwrap();
        dispatcher.stop().await.unwrap();

        let stats = dispatcher.stats().await;
        assert!(!stats.running);
        assert_eq!(stats.dispatched_requests, 2);
        assert_eq!(stats.failed_requests, 1);
    }
}
