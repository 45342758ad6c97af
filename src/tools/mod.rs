//! Callable tools exposed to the agent's model.

mod builtin;
pub mod expr;

pub use builtin::{
    CalculateArgs, NoArgs, WeatherArgs, builtin_tools, calculate, get_current_time, get_weather,
};

use crate::protocol::chat::FunctionTool;
use crate::{Error, Result};
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

type ToolHandler = Box<dyn Fn(Value) -> BoxFuture<Result<Value>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schema: RootSchema,
}

#[derive(Clone, Debug)]
pub struct ToolCall {
    pub name: String,
    pub call_id: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call from the model's raw JSON argument string. Empty arguments
    /// decode as `{}`; anything unparsable is passed through as a string.
    #[must_use]
    pub fn from_raw(name: impl Into<String>, call_id: impl Into<String>, raw_arguments: &str) -> Self {
        let arguments = if raw_arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw_arguments)
                .unwrap_or_else(|_| Value::String(raw_arguments.to_string()))
        };
        Self { name: name.into(), call_id: call_id.into(), arguments }
    }
}

#[derive(Clone, Debug)]
pub struct ToolResult {
    pub call_id: String,
    pub output: Value,
}

impl ToolResult {
    /// Output rendered for a `tool` chat message: strings verbatim, other JSON encoded.
    #[must_use]
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.insert(name, None, handler);
    }

    pub fn tool_with_description<TArgs, TResp, F, Fut>(
        &mut self,
        name: &str,
        description: impl Into<String>,
        handler: F,
    )
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        self.insert(name, Some(description.into()), handler);
    }

    fn insert<TArgs, TResp, F, Fut>(&mut self, name: &str, description: Option<String>, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<TResp>> + Send + 'static,
    {
        let schema = schemars::schema_for!(TArgs);
        let name = name.to_string();
        // Re-registering a name replaces the earlier definition.
        self.defs.retain(|def| def.name != name);
        self.defs.push(ToolDefinition { name: name.clone(), description, schema });

        let user_handler = Arc::new(handler);
        let handler = move |value: Value| -> BoxFuture<Result<Value>> {
            let user_handler = Arc::clone(&user_handler);
            Box::pin(async move {
                let args: TArgs = serde_json::from_value(value)
                    .map_err(|e| Error::Tool(format!("invalid arguments: {e}")))?;
                let resp = user_handler(args).await?;
                serde_json::to_value(resp).map_err(|e| Error::Tool(e.to_string()))
            })
        };

        self.handlers.insert(name, Box::new(handler));
    }

    /// Convert all registered tools into chat-completion function tools.
    ///
    /// # Errors
    /// Returns an error if schema serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn try_as_tools(&self) -> Result<Vec<FunctionTool>> {
        self.defs
            .iter()
            .map(|def| -> Result<FunctionTool> {
                let parameters = serde_json::to_value(&def.schema)?;
                Ok(FunctionTool::new(def.name.clone(), def.description.clone(), parameters))
            })
            .collect()
    }

    /// Dispatch a tool call to the registered handler.
    ///
    /// # Errors
    /// Returns an error if the tool is unknown or execution fails.
    pub async fn dispatch(&self, call: ToolCall) -> Result<ToolResult> {
        let handler = self
            .handlers
            .get(&call.name)
            .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;
        tracing::debug!(tool = %call.name, call_id = %call.call_id, "dispatching tool call");
        let output = handler(call.arguments).await?;
        Ok(ToolResult { call_id: call.call_id, output })
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.defs.iter().map(|def| def.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EchoArgs {
        text: String,
    }

    #[tokio::test]
    async fn dispatch_runs_registered_handler() {
        let mut registry = ToolRegistry::new();
        registry.tool("echo", |args: EchoArgs| async move { Ok(args.text) });

        let call = ToolCall::from_raw("echo", "call_1", r#"{"text":"hi"}"#);
        let result = registry.dispatch(call).await.unwrap();
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.output_text(), "hi");
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_tool_and_bad_arguments() {
        let mut registry = ToolRegistry::new();
        registry.tool("echo", |args: EchoArgs| async move { Ok(args.text) });

        let unknown = registry.dispatch(ToolCall::from_raw("nope", "c", "{}")).await;
        assert!(matches!(unknown, Err(Error::Tool(msg)) if msg.contains("unknown tool")));

        let bad = registry.dispatch(ToolCall::from_raw("echo", "c", r#"{"text": 3}"#)).await;
        assert!(matches!(bad, Err(Error::Tool(msg)) if msg.contains("invalid arguments")));
    }

    #[test]
    fn try_as_tools_carries_schema_and_description() {
        let mut registry = ToolRegistry::new();
        registry.tool_with_description("echo", "Echo text back.", |args: EchoArgs| async move {
            Ok(args.text)
        });
        let tools = registry.try_as_tools().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].kind, "function");
        assert_eq!(tools[0].function.description.as_deref(), Some("Echo text back."));
        assert!(tools[0].function.parameters["properties"]["text"].is_object());
    }

    #[test]
    fn reregistering_replaces_definition() {
        let mut registry = ToolRegistry::new();
        registry.tool("echo", |args: EchoArgs| async move { Ok(args.text) });
        registry.tool("echo", |args: EchoArgs| async move { Ok(args.text.len()) });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_raw_arguments_decode_as_object() {
        let call = ToolCall::from_raw("t", "c", "  ");
        assert!(call.arguments.as_object().is_some_and(serde_json::Map::is_empty));
    }
}
