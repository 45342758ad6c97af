//! Tool-calling conversational agent backed by a chat-completions model.
//!
//! One [`Agent`] is built per process and shared by every session; the
//! per-conversation identity travels in [`RunContext`].

mod factory;
pub mod memory;

pub use factory::{VOICE_ASSISTANT_INSTRUCTIONS, create_voice_agent};
pub use memory::{MemoryDb, MessageRole, StoredMessage, UserMemory};

use crate::protocol::chat::{ChatCompletionRequest, ChatMessage, FunctionTool, ToolCallWire};
use crate::tools::{ToolCall, ToolRegistry};
use crate::transport::rest::ChatCompletionsAdapter;
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt::Write as _;

pub const DEFAULT_HISTORY_MESSAGES: usize = 10;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

const ADD_MEMORY_TOOL: &str = "add_user_memory";
const DELETE_MEMORY_TOOL: &str = "delete_user_memory";

/// What a single agent run answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunInput {
    /// Something the user said or typed.
    User(String),
    /// An out-of-band instruction from the application (e.g. "greet the user").
    Instructions(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub session_id: String,
    pub user_id: String,
}

impl RunContext {
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), user_id: user_id.into() }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AddMemoryArgs {
    /// A short fact about the user worth remembering in future conversations
    memory: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteMemoryArgs {
    /// Id of the memory to delete, as listed in the system prompt
    memory_id: i64,
}

pub struct Agent {
    client: ChatCompletionsAdapter,
    model: String,
    instructions: String,
    tools: ToolRegistry,
    memory: Option<MemoryDb>,
    add_datetime_to_context: bool,
    enable_agentic_memory: bool,
    history_messages: usize,
    max_tool_rounds: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("memory", &self.memory)
            .field("add_datetime_to_context", &self.add_datetime_to_context)
            .field("enable_agentic_memory", &self.enable_agentic_memory)
            .finish_non_exhaustive()
    }
}

impl Agent {
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    #[must_use]
    pub const fn memory(&self) -> Option<&MemoryDb> {
        self.memory.as_ref()
    }

    /// Answer one turn, running any tool calls the model makes along the way.
    ///
    /// # Errors
    /// Returns an error if the model request fails or the model keeps asking
    /// for tools past the round limit. Tool failures are reported back to the
    /// model instead.
    pub async fn run(&self, input: RunInput, ctx: &RunContext) -> Result<String> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(ctx))];
        messages.extend(self.history(ctx));
        match &input {
            RunInput::User(text) => messages.push(ChatMessage::user(text.clone())),
            RunInput::Instructions(text) => messages.push(ChatMessage::system(text.clone())),
        }

        let tools = self.tool_specs()?;
        let mut request = ChatCompletionRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        for round in 0..=self.max_tool_rounds {
            // The last round offers no tools so the model has to answer in text.
            request.tools = if round < self.max_tool_rounds { tools.clone() } else { Vec::new() };

            let response = self.client.complete(&request).await?;
            let message = response.first_message().cloned().unwrap_or_default();
            let calls = message.tool_calls().to_vec();

            if calls.is_empty() {
                let reply = message.content.unwrap_or_default().trim().to_string();
                self.remember(&input, &reply, ctx);
                tracing::debug!(session = %ctx.session_id, rounds = round, "agent run finished");
                return Ok(reply);
            }

            request.messages.push(ChatMessage::Assistant {
                content: message.content.clone(),
                tool_calls: calls.clone(),
            });
            for call in calls {
                let output = self.execute_tool(&call, ctx).await;
                request.messages.push(ChatMessage::tool(call.id, output));
            }
        }

        Err(Error::InvalidState(format!(
            "model still requested tools after {} rounds",
            self.max_tool_rounds
        )))
    }

    fn system_prompt(&self, ctx: &RunContext) -> String {
        let mut prompt = self.instructions.trim().to_string();
        if self.add_datetime_to_context {
            let now = chrono::Local::now();
            let _ = write!(
                prompt,
                "\n\nThe current date and time is {}.",
                now.format("%A, %B %-d, %Y %I:%M %p")
            );
        }
        if self.enable_agentic_memory {
            if let Some(db) = &self.memory {
                match db.user_memories(&ctx.user_id) {
                    Ok(memories) if !memories.is_empty() => {
                        prompt.push_str(
                            "\n\nYou have access to memories from previous interactions with the user:",
                        );
                        for memory in memories {
                            let _ = write!(prompt, "\n- [{}] {}", memory.id, memory.memory);
                        }
                        prompt.push_str(
                            "\nUse the delete_user_memory tool to remove memories that are no longer true.",
                        );
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to load user memories"),
                }
                prompt.push_str(
                    "\n\nWhen the user shares a lasting fact or preference about themselves, save it with the add_user_memory tool.",
                );
            }
        }
        prompt
    }

    fn history(&self, ctx: &RunContext) -> Vec<ChatMessage> {
        let Some(db) = &self.memory else {
            return Vec::new();
        };
        if self.history_messages == 0 {
            return Vec::new();
        }
        match db.recent_messages(&ctx.session_id, self.history_messages) {
            Ok(stored) => stored
                .into_iter()
                .map(|message| match message.role {
                    MessageRole::User => ChatMessage::user(message.content),
                    MessageRole::Assistant => ChatMessage::assistant(message.content),
                })
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to load conversation history");
                Vec::new()
            }
        }
    }

    fn remember(&self, input: &RunInput, reply: &str, ctx: &RunContext) {
        let Some(db) = &self.memory else {
            return;
        };
        let write = || -> Result<()> {
            if let RunInput::User(text) = input {
                db.append_message(&ctx.session_id, &ctx.user_id, MessageRole::User, text)?;
            }
            if !reply.is_empty() {
                db.append_message(&ctx.session_id, &ctx.user_id, MessageRole::Assistant, reply)?;
            }
            Ok(())
        };
        if let Err(err) = write() {
            tracing::warn!(error = %err, "failed to persist conversation turn");
        }
    }

    #[allow(clippy::result_large_err)]
    fn tool_specs(&self) -> Result<Vec<FunctionTool>> {
        let mut specs = self.tools.try_as_tools()?;
        if self.enable_agentic_memory && self.memory.is_some() {
            specs.push(FunctionTool::new(
                ADD_MEMORY_TOOL,
                Some("Save a fact about the user for future conversations.".to_string()),
                serde_json::to_value(schemars::schema_for!(AddMemoryArgs))?,
            ));
            specs.push(FunctionTool::new(
                DELETE_MEMORY_TOOL,
                Some("Delete a saved memory about the user by its id.".to_string()),
                serde_json::to_value(schemars::schema_for!(DeleteMemoryArgs))?,
            ));
        }
        Ok(specs)
    }

    async fn execute_tool(&self, wire: &ToolCallWire, ctx: &RunContext) -> String {
        let call = ToolCall::from_raw(&wire.function.name, &wire.id, &wire.function.arguments);
        let result = match (call.name.as_str(), self.agentic_memory()) {
            (ADD_MEMORY_TOOL, Some(db)) => add_memory(db, ctx, call.arguments),
            (DELETE_MEMORY_TOOL, Some(db)) => delete_memory(db, ctx, call.arguments),
            _ => self.tools.dispatch(call).await.map(|result| result.output_text()),
        };
        result.unwrap_or_else(|err| {
            tracing::warn!(tool = %wire.function.name, error = %err, "tool call failed");
            serde_json::json!({ "error": err.to_string() }).to_string()
        })
    }

    const fn agentic_memory(&self) -> Option<&MemoryDb> {
        if self.enable_agentic_memory { self.memory.as_ref() } else { None }
    }
}

#[allow(clippy::result_large_err)]
fn add_memory(db: &MemoryDb, ctx: &RunContext, arguments: serde_json::Value) -> Result<String> {
    let args: AddMemoryArgs = serde_json::from_value(arguments)
        .map_err(|e| Error::Tool(format!("invalid arguments: {e}")))?;
    let id = db.add_user_memory(&ctx.user_id, args.memory.trim())?;
    tracing::info!(user = %ctx.user_id, memory_id = id, "stored user memory");
    Ok(format!("Memory saved with id {id}."))
}

#[allow(clippy::result_large_err)]
fn delete_memory(db: &MemoryDb, ctx: &RunContext, arguments: serde_json::Value) -> Result<String> {
    let args: DeleteMemoryArgs = serde_json::from_value(arguments)
        .map_err(|e| Error::Tool(format!("invalid arguments: {e}")))?;
    if db.delete_user_memory(&ctx.user_id, args.memory_id)? {
        Ok(format!("Memory {} deleted.", args.memory_id))
    } else {
        Ok(format!("No memory with id {} was found.", args.memory_id))
    }
}

pub struct AgentBuilder {
    client: Option<ChatCompletionsAdapter>,
    model: Option<String>,
    instructions: String,
    tools: ToolRegistry,
    memory: Option<MemoryDb>,
    add_datetime_to_context: bool,
    enable_agentic_memory: bool,
    history_messages: usize,
    max_tool_rounds: usize,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl AgentBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: None,
            model: None,
            instructions: String::new(),
            tools: ToolRegistry::new(),
            memory: None,
            add_datetime_to_context: false,
            enable_agentic_memory: false,
            history_messages: DEFAULT_HISTORY_MESSAGES,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            temperature: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn client(mut self, client: ChatCompletionsAdapter) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn memory(mut self, memory: MemoryDb) -> Self {
        self.memory = Some(memory);
        self
    }

    #[must_use]
    pub const fn add_datetime_to_context(mut self, enabled: bool) -> Self {
        self.add_datetime_to_context = enabled;
        self
    }

    #[must_use]
    pub const fn enable_agentic_memory(mut self, enabled: bool) -> Self {
        self.enable_agentic_memory = enabled;
        self
    }

    /// Number of stored messages replayed into each run (0 disables history).
    #[must_use]
    pub const fn history_messages(mut self, count: usize) -> Self {
        self.history_messages = count;
        self
    }

    #[must_use]
    pub const fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap on tokens generated per completion request.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// # Errors
    /// Returns [`Error::Config`] if the client or model is missing.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<Agent> {
        let client = self.client.ok_or_else(|| Error::Config("agent client required".to_string()))?;
        let model = self
            .model
            .filter(|model| !model.trim().is_empty())
            .ok_or_else(|| Error::Config("agent model required".to_string()))?;
        Ok(Agent {
            client,
            model,
            instructions: self.instructions,
            tools: self.tools,
            memory: self.memory,
            add_datetime_to_context: self.add_datetime_to_context,
            enable_agentic_memory: self.enable_agentic_memory,
            history_messages: self.history_messages,
            max_tool_rounds: self.max_tool_rounds,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(memory: Option<MemoryDb>) -> Agent {
        let mut builder = Agent::builder()
            .client(ChatCompletionsAdapter::new("http://localhost:9/v1", "k").unwrap())
            .model("test-model")
            .instructions("Be brief.")
            .add_datetime_to_context(true)
            .enable_agentic_memory(true);
        if let Some(db) = memory {
            builder = builder.memory(db);
        }
        builder.build().unwrap()
    }

    #[test]
    fn build_requires_model_and_client() {
        assert!(matches!(Agent::builder().model("m").build(), Err(Error::Config(_))));
        let client = ChatCompletionsAdapter::new("http://localhost:9/v1", "k").unwrap();
        assert!(matches!(Agent::builder().client(client).build(), Err(Error::Config(_))));
    }

    #[test]
    fn system_prompt_includes_datetime_and_memories() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.add_user_memory("alice", "has a dog named Rex").unwrap();
        let agent = agent(Some(db));

        let prompt = agent.system_prompt(&RunContext::new("room", "alice"));
        assert!(prompt.starts_with("Be brief."));
        assert!(prompt.contains("The current date and time is"));
        assert!(prompt.contains("has a dog named Rex"));

        let other = agent.system_prompt(&RunContext::new("room", "bob"));
        assert!(!other.contains("Rex"));
    }

    #[test]
    fn memory_tools_only_offered_with_a_store() {
        let without = agent(None);
        assert!(without.tool_specs().unwrap().is_empty());

        let with = agent(Some(MemoryDb::open_in_memory().unwrap()));
        let names: Vec<_> =
            with.tool_specs().unwrap().into_iter().map(|tool| tool.function.name).collect();
        assert_eq!(names, [ADD_MEMORY_TOOL, DELETE_MEMORY_TOOL]);
    }

    #[tokio::test]
    async fn memory_tool_calls_write_the_store() {
        let db = MemoryDb::open_in_memory().unwrap();
        let agent = agent(Some(db.clone()));
        let ctx = RunContext::new("room", "alice");

        let call = ToolCallWire {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: crate::protocol::chat::FunctionCall {
                name: ADD_MEMORY_TOOL.to_string(),
                arguments: r#"{"memory":"likes tea"}"#.to_string(),
            },
        };
        let output = agent.execute_tool(&call, &ctx).await;
        assert!(output.starts_with("Memory saved"));
        assert_eq!(db.user_memories("alice").unwrap()[0].memory, "likes tea");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_error_payload() {
        let agent = agent(None);
        let call = ToolCallWire {
            id: "call_1".to_string(),
            kind: "function".to_string(),
            function: crate::protocol::chat::FunctionCall {
                name: "launch_rocket".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let output = agent.execute_tool(&call, &RunContext::new("r", "u")).await;
        let json: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert!(json["error"].as_str().unwrap().contains("unknown tool"));
    }
}
