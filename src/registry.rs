//! Keyed command constructor registry.
//!
//! The registry maps envelope keys to constructor capabilities. It is built
//! for concurrent use: dispatcher workers resolve keys while the plugin
//! watcher registers new constructors, so lookups clone the entry out under a
//! read lock and run the constructor with no lock held. Registration is
//! last-write-wins; replacing an entry is legal and logged, never an error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{Command, CommandError};

/// Constructor capability stored per key: builds a command from the envelope
/// `Data` payload.
pub type CommandConstructor =
    Arc<dyn Fn(Value) -> Result<Box<dyn Command>, CommandError> + Send + Sync>;

/// Errors raised while resolving a key into a command instance.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no command registered for key `{key}`")]
    UnknownCommand { key: String },

    #[error("constructor for key `{key}` failed: {reason}")]
    ConstructionFailed { key: String, reason: String },
}

/// Runtime-mutable mapping from command name to constructor.
pub struct CommandRegistry {
    entries: RwLock<HashMap<String, CommandConstructor>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store `constructor` under `key`, replacing any existing entry.
    pub fn register(&self, key: impl Into<String>, constructor: CommandConstructor) {
        let key = key.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            warn!("Replacing existing command constructor for key: {}", key);
        }
        entries.insert(key.clone(), constructor);
        info!("Registered command constructor for key: {}", key);
    }

    /// Resolve `key` and build a command instance around `payload`.
    ///
    /// The constructor runs outside the lock so a slow build never blocks
    /// registration or other lookups.
    pub fn create(&self, key: &str, payload: Value) -> Result<Box<dyn Command>, RegistryError> {
        let constructor = {
            let entries = self.entries.read();
            entries.get(key).cloned()
        }
        .ok_or_else(|| RegistryError::UnknownCommand {
            key: key.to_string(),
        })?;

        constructor(payload).map_err(|e| RegistryError::ConstructionFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Registered keys in sorted order, for diagnostics.
    pub fn registered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("keys", &self.registered_keys())
            .finish()
    }
}
