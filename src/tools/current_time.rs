//! Current time tool - reports the server's local date and time

use super::{Tool, ToolContext, ToolOutput};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> String {
        "Get the current local date and time.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> ToolOutput {
        let now = Local::now();
        ToolOutput::success(format!(
            "Current time: {}",
            now.format("%Y-%m-%d %H:%M:%S %:z")
        ))
    }
}
