//! Plugin discovery and hot-loading.
//!
//! The service scans a configured directory once at startup, then polls it
//! on a bounded interval for created or modified artifacts. Each artifact is
//! a dynamic library exposing a [`PluginDeclaration`]; its constructors land
//! in the shared [`CommandRegistry`] under their declared keys, replacing
//! earlier entries key by key. A fault in one artifact or one unit never
//! stops the watch, and nothing is ever unloaded once registered. A missing
//! artifact directory is fatal at startup only; after that the watch rides
//! out transient directory errors.

mod api;
mod loader;
mod watcher;

pub use api::{CommandRegistrar, PluginDeclaration, CORE_VERSION, DECLARATION_SYMBOL};
pub use loader::{ArtifactLoader, DylibArtifactLoader, LoadOutcome};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PluginsConfig;
use crate::registry::CommandRegistry;
use watcher::DirectoryScanner;

/// Errors raised while discovering or loading plugin artifacts.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin directory does not exist: {path}")]
    DirectoryNotFound { path: String },

    #[error("failed to read plugin directory {path}: {reason}")]
    DirectoryUnreadable { path: String, reason: String },

    #[error("invalid plugin artifact {path}: {reason}")]
    InvalidArtifact { path: String, reason: String },

    #[error("artifact {path} was built against core {found}, this gateway is {expected}")]
    IncompatibleAbi {
        path: String,
        expected: String,
        found: String,
    },

    #[error("unit `{unit}` does not yield a usable constructor")]
    NoUsableConstructor { unit: String },
}

/// Record of one successfully loaded artifact.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    pub path: PathBuf,
    pub commands: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Default)]
struct WatchState {
    shutdown_tx: Option<broadcast::Sender<()>>,
    watcher: Option<JoinHandle<()>>,
}

/// Scans and watches the artifact directory, feeding the command registry.
pub struct PluginService {
    config: PluginsConfig,
    registry: Arc<CommandRegistry>,
    loader: Arc<dyn ArtifactLoader>,
    state: RwLock<WatchState>,
    artifacts: Arc<RwLock<Vec<LoadedArtifact>>>,
}

impl PluginService {
    pub fn new(
        config: PluginsConfig,
        registry: Arc<CommandRegistry>,
        loader: Arc<dyn ArtifactLoader>,
    ) -> Self {
        Self {
            config,
            registry,
            loader,
            state: RwLock::new(WatchState::default()),
            artifacts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Scan the artifact directory once, then start the polling watcher.
    ///
    /// Only the startup scan filters by file extension; anything else in the
    /// directory is ignored quietly. Artifacts that fail to load are logged
    /// and skipped without failing the start.
    pub async fn start(&self) -> Result<(), PluginError> {
        let directory = self.config.directory.clone();
        if !directory.is_dir() {
            return Err(PluginError::DirectoryNotFound {
                path: directory.display().to_string(),
            });
        }

        let mut state = self.state.write().await;
        if state.watcher.is_some() {
            debug!("Plugin watcher already running");
            return Ok(());
        }

        info!("Loading plugin artifacts from {}", directory.display());
        let mut scanner = DirectoryScanner::new();

        // the first sweep doubles as the startup scan
        let initial = scanner.sweep(&directory)?;
        for path in initial {
            if !has_artifact_extension(&path) {
                debug!("Ignoring non-artifact file {}", path.display());
                continue;
            }
            load_artifact(
                self.loader.as_ref(),
                &self.registry,
                &self.artifacts,
                &path,
            )
            .await;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let context = WatchContext {
            directory,
            poll_interval: Duration::from_millis(self.config.poll_interval_ms.max(1)),
            registry: Arc::clone(&self.registry),
            loader: Arc::clone(&self.loader),
            artifacts: Arc::clone(&self.artifacts),
        };
        state.watcher = Some(tokio::spawn(context.run(scanner, shutdown_rx)));
        state.shutdown_tx = Some(shutdown_tx);
        Ok(())
    }

    /// Signal the watcher and wait for it to exit. Safe to call when the
    /// service never started.
    pub async fn stop(&self) {
        let (shutdown_tx, watcher) = {
            let mut state = self.state.write().await;
            (state.shutdown_tx.take(), state.watcher.take())
        };

        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        if let Some(handle) = watcher {
            if let Err(e) = handle.await {
                warn!("Plugin watcher task failed: {}", e);
            }
            info!("Plugin watcher stopped");
        }
    }

    pub async fn is_watching(&self) -> bool {
        self.state.read().await.watcher.is_some()
    }

    /// Records of every artifact loaded so far, oldest first.
    pub async fn loaded_artifacts(&self) -> Vec<LoadedArtifact> {
        self.artifacts.read().await.clone()
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }
}

struct WatchContext {
    directory: PathBuf,
    poll_interval: Duration,
    registry: Arc<CommandRegistry>,
    loader: Arc<dyn ArtifactLoader>,
    artifacts: Arc<RwLock<Vec<LoadedArtifact>>>,
}

impl WatchContext {
    async fn run(self, mut scanner: DirectoryScanner, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        debug!(
            "Watching {} every {:?}",
            self.directory.display(),
            self.poll_interval
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Plugin watcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match scanner.sweep(&self.directory) {
                        Ok(changed) => {
                            for path in changed {
                                load_artifact(
                                    self.loader.as_ref(),
                                    &self.registry,
                                    &self.artifacts,
                                    &path,
                                )
                                .await;
                            }
                        }
                        Err(e) => warn!("Plugin directory sweep failed, continuing watch: {}", e),
                    }
                }
            }
        }
    }
}

/// Load one artifact, isolating any failure to a log line.
async fn load_artifact(
    loader: &dyn ArtifactLoader,
    registry: &CommandRegistry,
    artifacts: &RwLock<Vec<LoadedArtifact>>,
    path: &Path,
) {
    match loader.load(path, registry) {
        Ok(outcome) => {
            if !outcome.skipped.is_empty() {
                warn!(
                    "Artifact {} had {} unusable unit(s)",
                    path.display(),
                    outcome.skipped.len()
                );
            }
            artifacts.write().await.push(LoadedArtifact {
                path: path.to_path_buf(),
                commands: outcome.registered,
                loaded_at: Utc::now(),
            });
        }
        Err(e) => warn!("Failed to load plugin artifact {}: {}", path.display(), e),
    }
}

fn has_artifact_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(std::env::consts::DLL_EXTENSION)
}
