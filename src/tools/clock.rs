//! `get_current_time`: the local date and time.

use async_trait::async_trait;
use chrono::{Local, SecondsFormat};
use serde_json::{json, Value};

use crate::agent_core::registry::{Tool, ToolInvoker};
use crate::inference::ToolDefinition;

pub struct CurrentTime;

#[async_trait]
impl ToolInvoker for CurrentTime {
    async fn invoke(&self, _arguments: Value) -> anyhow::Result<Value> {
        Ok(Value::String(
            Local::now().to_rfc3339_opts(SecondsFormat::Secs, false),
        ))
    }
}

impl Tool for CurrentTime {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "get_current_time".into(),
            description: "Get the current local date and time as an RFC 3339 timestamp.".into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }
}
