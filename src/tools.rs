//! Capability registry
//!
//! Tools are stateless handlers registered under a stable id. The registry is
//! process-wide and read-mostly: enabling or disabling a capability is seen by
//! every workflow compiled afterwards, never by workflows already compiled.

mod calculator;
mod current_time;
mod weather;

pub use calculator::CalculatorTool;
pub use current_time::CurrentTimeTool;
pub use weather::{WeatherTool, WEATHER_TIMEOUT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Upper bound for a tool call when the capability does not set one
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result from tool execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }
}

/// Per-call context handed to a tool
#[derive(Clone)]
pub struct ToolContext {
    /// Fires when the call times out or the turn is abandoned
    pub cancel: CancellationToken,
    /// Thread the call belongs to
    pub thread_id: String,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken, thread_id: impl Into<String>) -> Self {
        Self {
            cancel,
            thread_id: thread_id.into(),
        }
    }
}

/// Trait for tools that can be executed by the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as presented to the model
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool. Long-running tools should watch `ctx.cancel`.
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid capability '{id}': {reason}")]
    InvalidCapability { id: String, reason: String },
    #[error("Unknown capability: {0}")]
    UnknownCapability(String),
}

/// Registration request. Every field except `timeout` is required.
#[derive(Clone, Default)]
pub struct CapabilitySpec {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
    pub enabled: Option<bool>,
    pub timeout: Option<Duration>,
    pub handler: Option<Arc<dyn Tool>>,
}

impl CapabilitySpec {
    /// Spec describing `tool` under `id`, enabled, with the default timeout
    pub fn from_tool(id: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            id: id.into(),
            name: Some(tool.name().to_string()),
            description: Some(tool.description()),
            input_schema: Some(tool.input_schema()),
            enabled: Some(true),
            timeout: None,
            handler: Some(tool),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(self, default_timeout: Duration) -> Result<Capability, ToolError> {
        let invalid = |reason: &str| ToolError::InvalidCapability {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id is empty"));
        }
        let name = self
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| invalid("missing name"))?;
        let description = self
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| invalid("missing description"))?;
        let input_schema = self
            .input_schema
            .clone()
            .filter(Value::is_object)
            .ok_or_else(|| invalid("missing or non-object input schema"))?;
        let enabled = self.enabled.ok_or_else(|| invalid("missing enabled flag"))?;
        let handler = self.handler.clone().ok_or_else(|| invalid("missing handler"))?;
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(invalid("timeout must be positive"));
        }

        Ok(Capability {
            id: self.id,
            name,
            description,
            input_schema,
            enabled,
            timeout: self.timeout.unwrap_or(default_timeout),
            handler,
        })
    }
}

/// A registered, validated capability
#[derive(Clone)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub enabled: bool,
    pub timeout: Duration,
    pub handler: Arc<dyn Tool>,
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Process-wide table of capabilities keyed by id
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Capability>>,
    default_timeout: Duration,
}

impl CapabilityRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Registry preloaded with the built-in capabilities
    pub fn standard(default_timeout: Duration) -> Result<Self, ToolError> {
        let registry = Self::new(default_timeout);
        registry.register(CapabilitySpec::from_tool(
            "current_time",
            Arc::new(CurrentTimeTool),
        ))?;
        registry.register(CapabilitySpec::from_tool(
            "calculator",
            Arc::new(CalculatorTool),
        ))?;

        let weather = WeatherTool::from_env().map_err(|e| ToolError::InvalidCapability {
            id: "weather".to_string(),
            reason: format!("cannot create HTTP client: {e}"),
        })?;
        registry.register(
            CapabilitySpec::from_tool("weather", Arc::new(weather)).with_timeout(WEATHER_TIMEOUT),
        )?;
        Ok(registry)
    }

    /// Validate and insert a capability, replacing any previous one with the same id
    pub fn register(&self, spec: CapabilitySpec) -> Result<(), ToolError> {
        let capability = spec.validate(self.default_timeout)?;
        tracing::debug!(id = %capability.id, name = %capability.name, "Registered capability");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability.id.clone(), capability);
        Ok(())
    }

    /// Snapshot of a capability
    pub fn get(&self, id: &str) -> Option<Capability> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn enable(&self, id: &str) -> Result<(), ToolError> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> Result<(), ToolError> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), ToolError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let capability = entries
            .get_mut(id)
            .ok_or_else(|| ToolError::UnknownCapability(id.to_string()))?;
        capability.enabled = enabled;
        tracing::info!(id = %id, enabled, "Capability toggled");
        Ok(())
    }

    /// All capabilities, ordered by id
    pub fn list(&self) -> Vec<Capability> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> String {
            format!("{} tool", self.0)
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn run(&self, _input: Value, _ctx: ToolContext) -> ToolOutput {
            ToolOutput::success(self.0)
        }
    }

    fn spec(id: &str) -> CapabilitySpec {
        CapabilitySpec::from_tool(id, Arc::new(NamedTool("named")))
    }

    #[test]
    fn test_standard_registry() {
        let registry = CapabilityRegistry::standard(DEFAULT_TOOL_TIMEOUT).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["calculator", "current_time", "weather"]);
        assert!(registry.get("current_time").unwrap().enabled);
        assert_eq!(registry.get("weather").unwrap().timeout, WEATHER_TIMEOUT);
        assert_eq!(
            registry.get("calculator").unwrap().timeout,
            DEFAULT_TOOL_TIMEOUT
        );
    }

    #[test]
    fn test_register_rejects_missing_fields() {
        let registry = CapabilityRegistry::new(DEFAULT_TOOL_TIMEOUT);

        let mut no_handler = spec("x");
        no_handler.handler = None;
        assert!(matches!(
            registry.register(no_handler),
            Err(ToolError::InvalidCapability { .. })
        ));

        let mut no_name = spec("x");
        no_name.name = Some("  ".to_string());
        assert!(registry.register(no_name).is_err());

        let mut no_description = spec("x");
        no_description.description = None;
        assert!(registry.register(no_description).is_err());

        let mut bad_schema = spec("x");
        bad_schema.input_schema = Some(json!("string"));
        assert!(registry.register(bad_schema).is_err());

        let mut no_flag = spec("x");
        no_flag.enabled = None;
        assert!(registry.register(no_flag).is_err());

        assert!(registry.get("x").is_none());
    }

    #[test]
    fn test_enable_disable_visible_immediately() {
        let registry = CapabilityRegistry::new(DEFAULT_TOOL_TIMEOUT);
        registry.register(spec("echo")).unwrap();

        registry.disable("echo").unwrap();
        assert!(!registry.get("echo").unwrap().enabled);

        registry.enable("echo").unwrap();
        assert!(registry.get("echo").unwrap().enabled);

        assert!(matches!(
            registry.disable("missing"),
            Err(ToolError::UnknownCapability(_))
        ));
    }

    #[test]
    fn test_timeout_defaults_and_overrides() {
        let registry = CapabilityRegistry::new(Duration::from_millis(1500));
        registry.register(spec("a")).unwrap();
        registry
            .register(spec("b").with_timeout(Duration::from_millis(10)))
            .unwrap();

        assert_eq!(registry.get("a").unwrap().timeout, Duration::from_millis(1500));
        assert_eq!(registry.get("b").unwrap().timeout, Duration::from_millis(10));
        assert!(registry
            .register(spec("c").with_timeout(Duration::ZERO))
            .is_err());
    }

    #[test]
    fn test_snapshots_do_not_follow_later_toggles() {
        let registry = CapabilityRegistry::new(DEFAULT_TOOL_TIMEOUT);
        registry.register(spec("echo")).unwrap();

        let snapshot = registry.get("echo").unwrap();
        registry.disable("echo").unwrap();
        assert!(snapshot.enabled);
    }
}
