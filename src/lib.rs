#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod agent;
pub mod config;
pub mod entrypoint;
pub mod error;
pub mod protocol;
pub mod sdk;
pub mod tools;
pub mod transport;

pub use agent::{Agent, AgentBuilder, MemoryDb, RunContext, RunInput, create_voice_agent};
pub use config::{DeepgramSettings, LiveKitSettings, LlmSettings, Settings};
pub use entrypoint::{AgentDeps, voice_session};
pub use error::{Error, Result};
pub use sdk::{
    AgentServer, AgentSession, EventHandlers, JobContext, JobProcess, LlmAdapter,
    NoiseCancellation, RunningSession, SessionEvent, TranscriptRelay, Vad,
};
pub use tools::{ToolCall, ToolRegistry, ToolResult, builtin_tools};
pub use transport::{ChatCompletionsAdapter, DeepgramStt, DeepgramTts};

const TRACE_LOG_MAX_BYTES: usize = 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

/// Truncate a payload for trace logs.
pub(crate) fn trace_payload(s: &str) -> std::borrow::Cow<'_, str> {
    safe_truncate(s, TRACE_LOG_MAX_BYTES)
}
