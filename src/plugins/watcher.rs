//! Bounded-interval directory polling.
//!
//! Detects created and modified files by comparing modification times
//! between sweeps. Deletions only prune bookkeeping so a later re-creation
//! counts as new; nothing is ever unregistered on the strength of a missing
//! file. A rewrite landing within the filesystem's mtime granularity can be
//! missed, which the polling contract accepts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::PluginError;

/// Tracks per-file modification times across sweeps of one directory.
#[derive(Debug, Default)]
pub(crate) struct DirectoryScanner {
    seen: HashMap<PathBuf, SystemTime>,
}

impl DirectoryScanner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Sweep `directory`, returning files that appeared or changed since the
    /// previous sweep, in name order. The first sweep reports every file.
    pub(crate) fn sweep(&mut self, directory: &Path) -> Result<Vec<PathBuf>, PluginError> {
        let entries =
            std::fs::read_dir(directory).map_err(|e| PluginError::DirectoryUnreadable {
                path: directory.display().to_string(),
                reason: e.to_string(),
            })?;

        let mut present = Vec::new();
        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            present.push((path, modified));
        }
        present.sort();

        let mut changed = Vec::new();
        let mut next_seen = HashMap::with_capacity(present.len());
        for (path, modified) in present {
            match self.seen.get(&path) {
                Some(previous) if *previous >= modified => {}
                _ => changed.push(path.clone()),
            }
            next_seen.insert(path, modified);
        }
        self.seen = next_seen;

        Ok(changed)
    }
}
