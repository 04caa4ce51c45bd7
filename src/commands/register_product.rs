//! Product registration.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::command::{Command, CommandError, Respondable};
use crate::protocol::{self, response_document};

/// Registers a product named in the envelope payload.
///
/// Unlike [`RegisterCompanyCommand`](crate::commands::RegisterCompanyCommand)
/// this variant does not catch its own faults: an unusable payload propagates
/// to the dispatch boundary, which produces the structured failure response.
pub struct RegisterProductCommand {
    data: Value,
}

impl RegisterProductCommand {
    pub fn new(data: Value) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Command for RegisterProductCommand {
    fn data(&self) -> &Value {
        &self.data
    }

    async fn execute(&self, channel: &dyn Respondable) -> Result<(), CommandError> {
        let name = self
            .data
            .get("Name")
            .and_then(Value::as_str)
            .ok_or("missing or non-string `Name` field")?;

        info!("Registering product: {}", name);
        let response = response_document(200, format!("Registered product: {name}"));
        channel.respond(&protocol::encode(&response)?).await?;
        Ok(())
    }
}
