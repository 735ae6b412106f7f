//! Plugin/tool-call bridge.
//!
//! With plugins registered, a chat turn becomes two requests. A non-streaming
//! planning request offers the plugins as tools. If the model picks one, its
//! script runs through a [`ScriptExecutor`] and two synthetic messages (the
//! assistant's tool selection and the tool result) are spliced in before the
//! final streaming request. Only the first tool call of a response is honored.

use async_trait::async_trait;
use omnichat_sandbox::ScriptSandbox;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};
use crate::transport::cancellable;

/// JSON-schema type of a plugin parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Number,
    Integer,
    Object,
    Array,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    #[serde(default)]
    pub description: String,
}

/// A user-defined tool backed by a JavaScript snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPlugin {
    /// Identifier offered to the model as the function name.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Script evaluated with the chosen arguments bound as `params`.
    pub code: String,
    #[serde(default)]
    pub parameters: Vec<PluginParameter>,
}

impl ChatPlugin {
    /// Function-calling tool definition.
    pub fn tool_definition(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({ "type": param.kind, "description": param.description }),
            );
        }
        let required: Vec<&str> = self.parameters.iter().map(|p| p.name.as_str()).collect();

        json!({
            "type": "function",
            "function": {
                "name": self.id,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }
            }
        })
    }
}

/// The tool a planning response selected.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSelection {
    /// The assistant message exactly as returned, for replaying.
    pub message: Value,
    pub call_id: Option<String>,
    /// Selected function name (a plugin id).
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

impl ToolSelection {
    /// Extract the first tool call from an OpenAI-shaped assistant message.
    pub fn from_message(message: &Value) -> Option<Self> {
        let call = message.get("tool_calls")?.as_array()?.first()?;
        let function = call.get("function")?;
        Some(Self {
            message: message.clone(),
            call_id: call.get("id").and_then(Value::as_str).map(str::to_string),
            name: function.get("name")?.as_str()?.to_string(),
            arguments: match function.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
        })
    }
}

/// Issues the non-streaming planning request.
#[async_trait]
pub trait ToolPlanner: Send + Sync {
    async fn plan(&self, messages: &[Value], tools: &[Value])
        -> ProviderResult<Option<ToolSelection>>;
}

/// Runs plugin code with its arguments bound as `params`.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, code: &str, params: &Value) -> ProviderResult<String>;
}

#[async_trait]
impl ScriptExecutor for ScriptSandbox {
    async fn execute(&self, code: &str, params: &Value) -> ProviderResult<String> {
        Ok(self.evaluate(code, params).await?)
    }
}

/// One completed tool round.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRound {
    pub selection: ToolSelection,
    pub plugin_id: String,
    pub output: String,
}

/// Plan, and if a tool was selected, execute it.
///
/// Returns `None` when there are no plugins or the model answered without
/// picking a tool. A selection naming an unknown plugin, unparsable
/// arguments, a missing executor and a failed script are all errors. The
/// script is abandoned as soon as `abort` fires.
pub async fn run_plugins(
    planner: &dyn ToolPlanner,
    executor: Option<&dyn ScriptExecutor>,
    plugins: &[ChatPlugin],
    messages: &[Value],
    abort: &CancellationToken,
) -> ProviderResult<Option<ToolRound>> {
    if plugins.is_empty() {
        return Ok(None);
    }

    let tools: Vec<Value> = plugins.iter().map(ChatPlugin::tool_definition).collect();
    let Some(selection) = planner.plan(messages, &tools).await? else {
        debug!("Planning response selected no tool");
        return Ok(None);
    };

    let plugin = plugins
        .iter()
        .find(|p| p.id == selection.name)
        .ok_or_else(|| {
            ProviderError::ToolExecution(format!(
                "model selected unknown tool '{}'",
                selection.name
            ))
        })?;

    let params: Value = if selection.arguments.trim().is_empty() {
        json!({})
    } else {
        serde_json::from_str(&selection.arguments).map_err(|e| {
            ProviderError::ToolExecution(format!(
                "invalid arguments for '{}': {e}: {}",
                plugin.id, selection.arguments
            ))
        })?
    };

    let executor = executor.ok_or_else(|| {
        ProviderError::ToolExecution("no script executor configured".to_string())
    })?;

    let output = cancellable(abort, executor.execute(&plugin.code, &params)).await?;
    info!(plugin = %plugin.id, output_len = output.len(), "Plugin executed");

    Ok(Some(ToolRound {
        plugin_id: plugin.id.clone(),
        selection,
        output,
    }))
}
