//! Company registration.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::command::{Command, CommandError, Respondable};
use crate::protocol::{self, response_document};

/// Registers a company named in the envelope payload.
///
/// This variant catches its own faults: whatever the payload looks like, the
/// requester hears back, with status 200 on success and 400 when the payload
/// is unusable. Only a failure of the reply channel itself propagates to the
/// dispatch boundary.
pub struct RegisterCompanyCommand {
    data: Value,
}

impl RegisterCompanyCommand {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    fn company_name(&self) -> Result<&str, CommandError> {
        self.data
            .get("Name")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing or non-string `Name` field".into())
    }
}

#[async_trait]
impl Command for RegisterCompanyCommand {
    fn data(&self) -> &Value {
        &self.data
    }

    async fn execute(&self, channel: &dyn Respondable) -> Result<(), CommandError> {
        let response = match self.company_name() {
            Ok(name) => {
                info!("Registering company: {}", name);
                response_document(200, format!("Registered company: {name}"))
            }
            Err(e) => {
                warn!("Company registration failed: {}", e);
                response_document(400, format!("failed to register company: {e}"))
            }
        };

        channel.respond(&protocol::encode(&response)?).await?;
        Ok(())
    }
}
