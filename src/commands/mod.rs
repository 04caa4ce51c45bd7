//! Built-in command variants.
//!
//! These are seeded into the registry when the dispatcher starts; further
//! variants arrive through the plugin loader at runtime and can replace the
//! built-ins key by key.

mod register_company;
mod register_product;

pub use register_company::RegisterCompanyCommand;
pub use register_product::RegisterProductCommand;

use std::sync::Arc;

use tracing::debug;

use crate::command::Command;
use crate::registry::{CommandConstructor, CommandRegistry};

/// Envelope key for the built-in company registration command.
pub const REGISTER_COMPANY_KEY: &str = "registerCompany";
/// Envelope key for the built-in product registration command.
pub const REGISTER_PRODUCT_KEY: &str = "registerProduct";

/// Seed `registry` with the built-in command constructors.
pub fn register_builtin_commands(registry: &CommandRegistry) {
    let company: CommandConstructor =
        Arc::new(|data| Ok(Box::new(RegisterCompanyCommand::new(data)) as Box<dyn Command>));
    registry.register(REGISTER_COMPANY_KEY, company);

    let product: CommandConstructor =
        Arc::new(|data| Ok(Box::new(RegisterProductCommand::new(data)) as Box<dyn Command>));
    registry.register(REGISTER_PRODUCT_KEY, product);

    debug!("Seeded registry with built-in commands");
}
