//! Speech and language components plugged into an [`AgentSession`](super::AgentSession).

use super::room::AudioFrame;
use crate::Result;
use crate::agent::{Agent, RunContext, RunInput};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe one complete utterance. An empty string means nothing was recognised.
    async fn recognize(&self, audio: &AudioFrame) -> Result<String>;
}

#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Output sample rate of synthesized audio.
    fn sample_rate(&self) -> u32;

    async fn synthesize(&self, text: &str) -> Result<AudioFrame>;
}

/// A turn handed to the language model.
pub type TurnInput = RunInput;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn respond(&self, input: TurnInput) -> Result<String>;
}

/// Binds a shared [`Agent`] to one conversation.
#[derive(Debug, Clone)]
pub struct LlmAdapter {
    agent: Arc<Agent>,
    context: RunContext,
}

impl LlmAdapter {
    #[must_use]
    pub fn new(agent: Arc<Agent>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { agent, context: RunContext::new(session_id, user_id) }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.context.session_id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.context.user_id
    }
}

#[async_trait]
impl LanguageModel for LlmAdapter {
    async fn respond(&self, input: TurnInput) -> Result<String> {
        self.agent.run(input, &self.context).await
    }
}
