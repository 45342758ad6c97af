//! Voice session runtime: rooms, audio front-end, pipeline and job lifecycle.
//!
//! External systems sit behind [`RoomTransport`], [`SpeechToText`],
//! [`TextToSpeech`] and [`LanguageModel`], so a session can be driven entirely
//! by in-process fakes.

pub mod console;
pub mod events;
pub mod job;
#[cfg(feature = "livekit")]
pub mod livekit;
pub mod noise;
pub mod pipeline;
pub mod relay;
pub mod room;
mod session;
pub mod vad;
pub mod worker;

pub use console::ConsoleRoom;
pub use events::{
    AgentState, EventHandlers, EventStream, SessionEvent, SessionState, SpeechCommitted,
};
pub use job::{JobContext, JobState};
#[cfg(feature = "livekit")]
pub use livekit::{LiveKitRoom, mint_agent_token};
pub use noise::NoiseCancellation;
pub use pipeline::{LanguageModel, LlmAdapter, SpeechToText, TextToSpeech, TurnInput};
pub use relay::{DEFAULT_RELAY_CAPACITY, RelayHandle, RelayOutcome, TranscriptRelay};
pub use room::{
    AudioFrame, BoxFuture, Participant, ParticipantKind, RoomEvent, RoomPublisher, RoomTransport,
};
pub use session::{
    AgentSession, AgentSessionBuilder, OUTPUT_FRAME_MS, RunningSession, SessionHandle,
};
pub use vad::{Vad, VadEvent, VadOptions, VadStream};
pub use worker::{AgentServer, JobProcess, VAD_SLOT, prewarm};
