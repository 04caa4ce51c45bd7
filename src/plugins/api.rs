//! The contract between the gateway and dynamically loaded command
//! artifacts.
//!
//! A plugin builds as a `cdylib` and announces itself through one exported
//! static, emitted by [`export_plugin!`]. The loader reads the declaration,
//! checks the core version it was compiled against, and calls its `register`
//! function with a registrar that feeds the live command registry. Because
//! the boundary passes Rust trait objects, plugins must be built with the
//! same toolchain and `gateway-core` version as the running gateway; the
//! version field is the guard for the latter.
//!
//! A minimal plugin looks like this:
//!
//! ```
//! use std::sync::Arc;
//!
//! use gateway_core::command::Command;
//! use gateway_core::commands::RegisterCompanyCommand;
//! use gateway_core::plugins::CommandRegistrar;
//!
//! #[allow(improper_ctypes_definitions)]
//! unsafe extern "C" fn register(registrar: &mut dyn CommandRegistrar) {
//!     registrar.register_command(
//!         "registerCompanyV2",
//!         Arc::new(|data| Ok(Box::new(RegisterCompanyCommand::new(data)) as Box<dyn Command>)),
//!     );
//! }
//!
//! gateway_core::export_plugin!(register);
//! ```

use crate::registry::CommandConstructor;

/// Version token compiled into both the gateway and every plugin.
pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the exported declaration static the loader resolves.
pub const DECLARATION_SYMBOL: &[u8] = b"GATEWAY_PLUGIN_DECLARATION";

/// What an artifact exports: the core version it was compiled against and
/// the function that registers its command constructors.
#[derive(Copy, Clone)]
pub struct PluginDeclaration {
    pub core_version: &'static str,
    pub register: unsafe extern "C" fn(&mut dyn CommandRegistrar),
}

/// Receives constructor registrations from a plugin's `register` function.
///
/// The gateway decides per unit whether an offered constructor is usable; a
/// rejected unit is skipped without affecting the rest of the artifact.
pub trait CommandRegistrar {
    fn register_command(&mut self, key: &str, constructor: CommandConstructor);
}

/// Emit the declaration static a plugin artifact must export.
///
/// `$register` is the plugin's `unsafe extern "C" fn(&mut dyn
/// CommandRegistrar)` entry point.
#[macro_export]
macro_rules! export_plugin {
    ($register:path) => {
        #[doc(hidden)]
        #[no_mangle]
        pub static GATEWAY_PLUGIN_DECLARATION: $crate::plugins::PluginDeclaration =
            $crate::plugins::PluginDeclaration {
                core_version: $crate::plugins::CORE_VERSION,
                register: $register,
            };
    };
}
