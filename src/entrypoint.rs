//! The job body run for every room the agent joins.

use crate::agent::Agent;
use crate::config::DeepgramSettings;
use crate::sdk::{
    AgentSession, DEFAULT_RELAY_CAPACITY, EventHandlers, JobContext, LlmAdapter,
    NoiseCancellation, TranscriptRelay, VAD_SLOT, Vad,
};
use crate::transport::{DeepgramStt, DeepgramTts};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

pub const GREETING_INSTRUCTIONS: &str = "say hello to the user";

/// Process-wide dependencies shared by every job.
#[derive(Debug)]
pub struct AgentDeps {
    pub agent: Arc<Agent>,
    /// Speech in and out. `None` runs a text-only session.
    pub deepgram: Option<DeepgramSettings>,
    pub participant_timeout: Option<Duration>,
}

/// Connect, wait for a participant, run the voice session until it ends.
///
/// # Errors
/// Returns an error if the room cannot be joined, no participant arrives,
/// the session cannot be built or the room fails mid-session.
pub async fn voice_session(mut ctx: JobContext, deps: Arc<AgentDeps>) -> Result<()> {
    tracing::info!(room = %ctx.room_name(), "connecting to room");
    ctx.connect().await?;
    let participant = ctx.wait_for_participant(deps.participant_timeout).await?;
    tracing::info!(
        room = %ctx.room_name(),
        participant = %participant.identity,
        "connected to room with participant"
    );

    let relay = TranscriptRelay::spawn(ctx.publisher(), DEFAULT_RELAY_CAPACITY);
    let llm = LlmAdapter::new(
        Arc::clone(&deps.agent),
        ctx.room_name(),
        participant.identity.clone(),
    );
    let mut builder = AgentSession::builder()
        .llm(llm)
        .noise_cancellation(NoiseCancellation::for_participant)
        .handlers(relay.handle().attach(EventHandlers::new()));
    builder = match &deps.deepgram {
        Some(deepgram) => {
            let vad = ctx
                .proc()
                .get::<Vad>(VAD_SLOT)
                .ok_or_else(|| Error::Config("voice activity detector was not prewarmed".to_string()))?;
            builder
                .stt(DeepgramStt::from_settings(deepgram)?)
                .tts(DeepgramTts::from_settings(deepgram)?)
                .vad(vad)
        }
        None => builder.audio_output(false),
    };

    let session = builder.build()?;
    let running = session.start(ctx, &participant)?;

    if let Err(err) = running.generate_reply(GREETING_INSTRUCTIONS).await {
        tracing::warn!(error = %err, "greeting failed");
    }

    let result = running.wait().await;
    relay.shutdown().await;
    result
}
