//! Dynamic-library artifact loading.

use std::path::Path;

use libloading::{Library, Symbol};
use tracing::{info, warn};

use super::api::{CommandRegistrar, PluginDeclaration, CORE_VERSION, DECLARATION_SYMBOL};
use super::PluginError;
use crate::registry::{CommandConstructor, CommandRegistry};

/// Outcome of loading one artifact.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// Keys registered from this artifact, in registration order.
    pub registered: Vec<String>,
    /// Units rejected in isolation and skipped.
    pub skipped: Vec<String>,
}

/// Loads command constructors from one artifact into the registry.
///
/// The production implementation reads dynamic libraries; tests substitute
/// lighter stand-ins so discovery and watching can be exercised without
/// compiling real plugins.
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, path: &Path, registry: &CommandRegistry) -> Result<LoadOutcome, PluginError>;
}

/// Loads `cdylib` artifacts exposing a [`PluginDeclaration`].
#[derive(Debug, Default)]
pub struct DylibArtifactLoader;

impl ArtifactLoader for DylibArtifactLoader {
    fn load(&self, path: &Path, registry: &CommandRegistry) -> Result<LoadOutcome, PluginError> {
        let artifact = path.display().to_string();

        match path.extension().and_then(|e| e.to_str()) {
            Some(extension) if extension == std::env::consts::DLL_EXTENSION => {}
            _ => {
                return Err(PluginError::InvalidArtifact {
                    path: artifact,
                    reason: format!(
                        "expected a `.{}` dynamic library",
                        std::env::consts::DLL_EXTENSION
                    ),
                });
            }
        }

        // SAFETY: loading a library runs its initializers; the artifact
        // directory is trusted input by contract.
        let library = unsafe { Library::new(path) }.map_err(|e| PluginError::InvalidArtifact {
            path: artifact.clone(),
            reason: format!("failed to load library: {e}"),
        })?;

        // SAFETY: the symbol is a static of type PluginDeclaration in every
        // artifact produced by export_plugin!; the copy is taken while the
        // library is alive.
        let declaration = unsafe {
            let symbol: Symbol<*const PluginDeclaration> = library
                .get(DECLARATION_SYMBOL)
                .map_err(|e| PluginError::InvalidArtifact {
                    path: artifact.clone(),
                    reason: format!("no plugin declaration: {e}"),
                })?;
            **symbol
        };

        if declaration.core_version != CORE_VERSION {
            return Err(PluginError::IncompatibleAbi {
                path: artifact,
                expected: CORE_VERSION.to_string(),
                found: declaration.core_version.to_string(),
            });
        }

        let mut registrar = RegistryRegistrar {
            registry,
            registered: Vec::new(),
            skipped: Vec::new(),
        };
        // SAFETY: version check passed, so both sides agree on the registrar
        // vtable layout.
        unsafe { (declaration.register)(&mut registrar) };

        // Registered constructors point into the library's code, so it must
        // stay mapped for the life of the process. Artifacts are never
        // unloaded or replaced in place.
        std::mem::forget(library);

        info!(
            "Loaded plugin artifact {}: {} command(s)",
            artifact,
            registrar.registered.len()
        );
        Ok(LoadOutcome {
            registered: registrar.registered,
            skipped: registrar.skipped,
        })
    }
}

struct RegistryRegistrar<'a> {
    registry: &'a CommandRegistry,
    registered: Vec<String>,
    skipped: Vec<String>,
}

impl CommandRegistrar for RegistryRegistrar<'_> {
    fn register_command(&mut self, key: &str, constructor: CommandConstructor) {
        if key.trim().is_empty() {
            let failure = PluginError::NoUsableConstructor {
                unit: key.to_string(),
            };
            warn!("Skipping plugin unit: {}", failure);
            self.skipped.push(key.to_string());
            return;
        }
        self.registry.register(key, constructor);
        self.registered.push(key.to_string());
    }
}
