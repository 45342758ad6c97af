use super::{Agent, MemoryDb};
use crate::Result;
use crate::config::LlmSettings;
use crate::tools::builtin_tools;
use crate::transport::rest::ChatCompletionsAdapter;

/// Instructions tuned for answers that will be spoken aloud.
pub const VOICE_ASSISTANT_INSTRUCTIONS: &str = "You are a helpful voice assistant.

Key behaviors:
- Keep responses concise and conversational - you're speaking, not writing
- Use natural speech patterns and contractions
- When using tools, briefly explain what you're doing
- If you don't know something, say so honestly
- Be friendly and helpful

You have access to tools for:
- Getting the current time
- Checking weather for any city
- Performing calculations

Remember: Your responses will be spoken aloud, so avoid long lists,
markdown formatting, or complex technical jargon.";

/// Build the voice assistant agent: built-in tools, datetime context and
/// agentic memory over `memory`.
///
/// # Errors
/// Returns an error if the chat client cannot be built from `settings`.
#[allow(clippy::result_large_err)]
pub fn create_voice_agent(settings: &LlmSettings, memory: MemoryDb) -> Result<Agent> {
    let client = ChatCompletionsAdapter::new(&settings.base_url, &settings.api_key)?;
    tracing::info!(model = %settings.model, endpoint = %client.endpoint(), "creating voice agent");
    Agent::builder()
        .client(client)
        .model(settings.model.clone())
        .tools(builtin_tools())
        .instructions(VOICE_ASSISTANT_INSTRUCTIONS)
        .add_datetime_to_context(true)
        .memory(memory)
        .enable_agentic_memory(true)
        .build()
}
