use super::events::{
    AgentState, EventEmitter, EventHandlers, EventStream, SessionEvent, SessionState,
    SpeechCommitted,
};
use super::job::{JobContext, JobState};
use super::noise::{NoiseCancellation, NoiseSelector};
use super::pipeline::{LanguageModel, SpeechToText, TextToSpeech, TurnInput};
use super::room::{AudioFrame, Participant, RoomEvent, RoomPublisher, RoomTransport};
use super::vad::{Vad, VadEvent, VadStream};
use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Length of each published agent audio frame.
pub const OUTPUT_FRAME_MS: u32 = 20;

const COMMAND_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 128;

/// Voice pipeline configuration. Started once per job.
pub struct AgentSession {
    stt: Option<Arc<dyn SpeechToText>>,
    llm: Arc<dyn LanguageModel>,
    tts: Option<Arc<dyn TextToSpeech>>,
    vad: Option<Arc<Vad>>,
    noise: NoiseSelector,
    audio_output: bool,
    handlers: EventHandlers,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("audio_input", &self.stt.is_some())
            .field("audio_output", &self.audio_output)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    #[must_use]
    pub fn builder() -> AgentSessionBuilder {
        AgentSessionBuilder::new()
    }

    /// Take over the job's room and start serving `participant`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] unless the job is active.
    #[allow(clippy::result_large_err)]
    pub fn start(self, ctx: JobContext, participant: &Participant) -> Result<RunningSession> {
        if ctx.state() != JobState::Active {
            return Err(Error::InvalidState(format!(
                "session needs an active job, job is {:?}",
                ctx.state()
            )));
        }
        let room_name = ctx.room_name().to_string();
        let publisher = ctx.publisher();
        let (room, backlog) = ctx.into_parts();

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(EVENT_CAPACITY);

        let noise = (self.noise)(participant);
        tracing::info!(
            room = %room_name,
            participant = %participant.identity,
            noise_cancellation = ?noise,
            "starting agent session"
        );

        let pipeline = Pipeline {
            participant: participant.clone(),
            stt: self.stt,
            llm: self.llm,
            tts: self.tts,
            vad: self.vad.map(|vad| vad.stream()),
            noise,
            audio_output: self.audio_output,
            publisher,
            emitter: EventEmitter::new(Arc::new(self.handlers), event_tx),
        };
        pipeline.emitter.emit(SessionEvent::StateChanged(SessionState::Starting));
        let task = tokio::spawn(run_session(room, backlog, pipeline, cmd_rx));

        Ok(RunningSession { sender: cmd_tx, event_rx, task: Some(task) })
    }
}

pub struct AgentSessionBuilder {
    stt: Option<Arc<dyn SpeechToText>>,
    llm: Option<Arc<dyn LanguageModel>>,
    tts: Option<Arc<dyn TextToSpeech>>,
    vad: Option<Arc<Vad>>,
    noise: NoiseSelector,
    audio_output: bool,
    handlers: EventHandlers,
}

impl AgentSessionBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stt: None,
            llm: None,
            tts: None,
            vad: None,
            noise: Arc::new(NoiseCancellation::for_participant),
            audio_output: true,
            handlers: EventHandlers::new(),
        }
    }

    #[must_use]
    pub fn stt(mut self, stt: impl SpeechToText + 'static) -> Self {
        self.stt = Some(Arc::new(stt));
        self
    }

    #[must_use]
    pub fn llm(mut self, llm: impl LanguageModel + 'static) -> Self {
        self.llm = Some(Arc::new(llm));
        self
    }

    #[must_use]
    pub fn tts(mut self, tts: impl TextToSpeech + 'static) -> Self {
        self.tts = Some(Arc::new(tts));
        self
    }

    #[must_use]
    pub fn vad(mut self, vad: Arc<Vad>) -> Self {
        self.vad = Some(vad);
        self
    }

    /// Choose input noise cancellation per participant.
    #[must_use]
    pub fn noise_cancellation<F>(mut self, selector: F) -> Self
    where
        F: Fn(&Participant) -> NoiseCancellation + Send + Sync + 'static,
    {
        self.noise = Arc::new(selector);
        self
    }

    /// Speak replies into the room (default). When off, replies are text only.
    #[must_use]
    pub const fn audio_output(mut self, enabled: bool) -> Self {
        self.audio_output = enabled;
        self
    }

    #[must_use]
    pub fn handlers(mut self, handlers: EventHandlers) -> Self {
        self.handlers = handlers;
        self
    }

    /// # Errors
    /// Returns [`Error::Config`] when the LLM is missing, when audio output
    /// is on without TTS, or when only one of STT and VAD is set.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<AgentSession> {
        let llm = self.llm.ok_or_else(|| Error::Config("session needs an llm".to_string()))?;
        if self.audio_output && self.tts.is_none() {
            return Err(Error::Config("audio output needs a tts".to_string()));
        }
        if self.stt.is_some() != self.vad.is_some() {
            return Err(Error::Config("audio input needs both stt and vad".to_string()));
        }
        Ok(AgentSession {
            stt: self.stt,
            llm,
            tts: self.tts,
            vad: self.vad,
            noise: self.noise,
            audio_output: self.audio_output,
            handlers: self.handlers,
        })
    }
}

impl Default for AgentSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

enum Command {
    GenerateReply { instructions: String, respond: oneshot::Sender<Result<String>> },
    Say { text: String, respond: oneshot::Sender<Result<()>> },
    Close,
}

/// Cloneable handle for driving a running session from other tasks.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

impl SessionHandle {
    /// Run an instruction turn and speak the result.
    ///
    /// # Errors
    /// Returns the LLM's error, or [`Error::ConnectionClosed`] if the session has ended.
    pub async fn generate_reply(&self, instructions: impl Into<String>) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::GenerateReply { instructions: instructions.into(), respond: tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Speak `text` verbatim.
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] if the session has ended, or the TTS error.
    pub async fn say(&self, text: impl Into<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Command::Say { text: text.into(), respond: tx })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Ask the session to end. Does nothing if it already has.
    pub async fn close(&self) {
        let _ = self.sender.send(Command::Close).await;
    }
}

#[derive(Debug)]
pub struct RunningSession {
    sender: mpsc::Sender<Command>,
    event_rx: mpsc::Receiver<SessionEvent>,
    task: Option<JoinHandle<Result<()>>>,
}

impl RunningSession {
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle { sender: self.sender.clone() }
    }

    /// See [`SessionHandle::generate_reply`].
    ///
    /// # Errors
    /// Returns the LLM's error, or [`Error::ConnectionClosed`] if the session has ended.
    pub async fn generate_reply(&self, instructions: impl Into<String>) -> Result<String> {
        self.handle().generate_reply(instructions).await
    }

    /// See [`SessionHandle::say`].
    ///
    /// # Errors
    /// Returns [`Error::ConnectionClosed`] if the session has ended, or the TTS error.
    pub async fn say(&self, text: impl Into<String>) -> Result<()> {
        self.handle().say(text).await
    }

    /// Await the next session event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    /// Stream session events.
    #[must_use]
    pub fn events(&mut self) -> EventStream<'_> {
        EventStream::new(&mut self.event_rx)
    }

    /// End the session and wait for it to stop.
    ///
    /// # Errors
    /// Returns the room error that ended the session, if any.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.sender.send(Command::Close).await;
        self.join().await
    }

    /// Wait until the session ends (room closed, participant left or closed
    /// through a handle).
    ///
    /// # Errors
    /// Returns the room error that ended the session, if any.
    pub async fn wait(mut self) -> Result<()> {
        self.join().await
    }

    async fn join(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        task.await
            .map_err(|err| Error::InvalidState(format!("session task failed: {err}")))?
    }
}

async fn run_session(
    mut room: Box<dyn RoomTransport>,
    backlog: VecDeque<RoomEvent>,
    mut pipeline: Pipeline,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()> {
    pipeline.emitter.emit(SessionEvent::StateChanged(SessionState::Running));
    pipeline.set_agent_state(AgentState::Listening);

    let mut result = Ok(());
    let mut open = true;
    for event in backlog {
        if !pipeline.handle_room_event(event).await {
            open = false;
            break;
        }
    }

    while open {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::GenerateReply { instructions, respond }) => {
                        let reply = pipeline.reply(TurnInput::Instructions(instructions)).await;
                        let _ = respond.send(reply);
                    }
                    Some(Command::Say { text, respond }) => {
                        let spoken = pipeline.speak(&text).await;
                        let _ = respond.send(spoken);
                    }
                    Some(Command::Close) | None => break,
                }
            }
            event = room.next_event() => {
                match event {
                    Ok(Some(event)) => open = pipeline.handle_room_event(event).await,
                    Ok(None) => break,
                    Err(err) => {
                        tracing::error!(error = %err, "room transport failed");
                        pipeline.emitter.emit(SessionEvent::Error { message: err.to_string() });
                        result = Err(err);
                        break;
                    }
                }
            }
        }
    }

    if let Some(utterance) = pipeline.vad.as_mut().and_then(VadStream::flush) {
        tracing::debug!(samples = utterance.data.len(), "discarding unfinished utterance");
    }
    pipeline.emitter.emit(SessionEvent::StateChanged(SessionState::Closed));
    tracing::info!(participant = %pipeline.participant.identity, "agent session ended");
    result
}

/// Per-session pipeline state, owned by the session task.
struct Pipeline {
    participant: Participant,
    stt: Option<Arc<dyn SpeechToText>>,
    llm: Arc<dyn LanguageModel>,
    tts: Option<Arc<dyn TextToSpeech>>,
    vad: Option<VadStream>,
    noise: NoiseCancellation,
    audio_output: bool,
    publisher: Arc<dyn RoomPublisher>,
    emitter: EventEmitter,
}

impl Pipeline {
    /// Returns `false` once the session should end.
    async fn handle_room_event(&mut self, event: RoomEvent) -> bool {
        match event {
            RoomEvent::AudioFrame { identity, mut frame } if identity == self.participant.identity => {
                self.noise.apply(&mut frame);
                let events = match self.vad.as_mut() {
                    Some(vad) => vad.push_frame(&frame),
                    None => Vec::new(),
                };
                for event in events {
                    match event {
                        VadEvent::StartOfSpeech => tracing::debug!("user started speaking"),
                        VadEvent::EndOfSpeech(utterance) => self.user_audio(&utterance).await,
                    }
                }
                true
            }
            RoomEvent::ChatMessage { identity, text } if identity == self.participant.identity => {
                let text = text.trim();
                if !text.is_empty() {
                    self.user_turn(text.to_string()).await;
                }
                true
            }
            RoomEvent::ParticipantDisconnected { identity } if identity == self.participant.identity => {
                tracing::info!(participant = %identity, "linked participant left");
                false
            }
            RoomEvent::Disconnected { reason } => {
                tracing::info!(%reason, "room disconnected");
                false
            }
            other => {
                tracing::trace!(event = ?other, "ignoring room event");
                true
            }
        }
    }

    async fn user_audio(&mut self, utterance: &AudioFrame) {
        let Some(stt) = self.stt.clone() else {
            return;
        };
        match stt.recognize(utterance).await {
            Ok(text) if text.trim().is_empty() => {
                tracing::debug!(duration_ms = utterance.duration_ms(), "no speech recognised");
            }
            Ok(text) => self.user_turn(text).await,
            Err(err) => self.report("speech-to-text", &err),
        }
    }

    async fn user_turn(&mut self, text: String) {
        self.emitter.emit(SessionEvent::UserSpeechCommitted(SpeechCommitted::new(
            text.clone(),
            Some(self.participant.identity.clone()),
        )));
        // Failures are already reported as session events.
        let _ = self.reply(TurnInput::User(text)).await;
    }

    async fn reply(&mut self, input: TurnInput) -> Result<String> {
        self.set_agent_state(AgentState::Thinking);
        let reply = match self.llm.respond(input).await {
            Ok(reply) => reply,
            Err(err) => {
                self.report("llm", &err);
                self.set_agent_state(AgentState::Listening);
                return Err(err);
            }
        };
        if reply.trim().is_empty() {
            self.set_agent_state(AgentState::Listening);
            return Ok(reply);
        }
        let spoken = self.speak(&reply).await;
        spoken.map(|()| reply)
    }

    async fn speak(&mut self, text: &str) -> Result<()> {
        let mut result = Ok(());
        if self.audio_output {
            if let Some(tts) = self.tts.clone() {
                self.set_agent_state(AgentState::Speaking);
                result = self.play(tts.as_ref(), text).await;
                if let Err(err) = &result {
                    self.report("text-to-speech", err);
                }
            }
        }
        self.emitter.emit(SessionEvent::AgentSpeechCommitted(SpeechCommitted::new(text, None)));
        self.set_agent_state(AgentState::Listening);
        result
    }

    async fn play(&self, tts: &dyn TextToSpeech, text: &str) -> Result<()> {
        let audio = tts.synthesize(text).await?;
        tracing::debug!(duration_ms = audio.duration_ms(), "publishing agent speech");
        for frame in audio.chunks(OUTPUT_FRAME_MS) {
            self.publisher.publish_audio(frame).await?;
        }
        Ok(())
    }

    fn set_agent_state(&self, state: AgentState) {
        self.emitter.emit(SessionEvent::AgentStateChanged(state));
    }

    fn report(&self, component: &str, err: &Error) {
        tracing::warn!(component, error = %err, "pipeline component failed");
        self.emitter.emit(SessionEvent::Error { message: format!("{component}: {err}") });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::DataPacket;
    use crate::sdk::room::{BoxFuture, ParticipantKind};
    use crate::sdk::worker::JobProcess;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct MockRoom {
        incoming: mpsc::Receiver<RoomEvent>,
        publisher: Arc<MockPublisher>,
    }

    #[derive(Default)]
    struct MockPublisher {
        audio: Mutex<Vec<AudioFrame>>,
    }

    impl RoomPublisher for MockPublisher {
        fn publish_data(&self, _packet: DataPacket) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn publish_audio(&self, frame: AudioFrame) -> BoxFuture<'_, Result<()>> {
            self.audio.lock().unwrap().push(frame);
            Box::pin(async { Ok(()) })
        }
    }

    impl RoomTransport for MockRoom {
        fn room_name(&self) -> &str {
            "test-room"
        }

        fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RoomEvent>>> {
            Box::pin(async move { Ok(self.incoming.recv().await) })
        }

        fn publisher(&self) -> Arc<dyn RoomPublisher> {
            self.publisher.clone()
        }
    }

    struct EchoLlm;

    #[async_trait]
    impl LanguageModel for EchoLlm {
        async fn respond(&self, input: TurnInput) -> Result<String> {
            Ok(match input {
                TurnInput::User(text) => format!("you said {text}"),
                TurnInput::Instructions(text) => format!("[{text}]"),
            })
        }
    }

    struct ToneTts;

    #[async_trait]
    impl TextToSpeech for ToneTts {
        fn sample_rate(&self) -> u32 {
            24_000
        }

        async fn synthesize(&self, _text: &str) -> Result<AudioFrame> {
            Ok(AudioFrame::new(vec![1_000; 2_400], 24_000, 1))
        }
    }

    async fn active_job(
        events: Vec<RoomEvent>,
    ) -> (JobContext, Participant, mpsc::Sender<RoomEvent>, Arc<MockPublisher>) {
        let (tx, rx) = mpsc::channel(32);
        let publisher = Arc::new(MockPublisher::default());
        let room = MockRoom { incoming: rx, publisher: publisher.clone() };
        let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
        ctx.connect().await.unwrap();
        for event in events {
            tx.send(event).await.unwrap();
        }
        tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
            .await
            .unwrap();
        let participant = ctx.wait_for_participant(Some(Duration::from_secs(1))).await.unwrap();
        (ctx, participant, tx, publisher)
    }

    #[tokio::test]
    async fn generate_reply_speaks_and_commits() {
        let (ctx, participant, _tx, publisher) = active_job(Vec::new()).await;
        let commits = Arc::new(Mutex::new(Vec::new()));
        let seen = commits.clone();
        let session = AgentSession::builder()
            .llm(EchoLlm)
            .tts(ToneTts)
            .handlers(EventHandlers::new().on_agent_speech_committed(move |c| {
                seen.lock().unwrap().push(c.content.clone());
            }))
            .build()
            .unwrap();
        let running = session.start(ctx, &participant).unwrap();

        let reply = running.generate_reply("say hello to the user").await.unwrap();
        assert_eq!(reply, "[say hello to the user]");
        assert_eq!(*commits.lock().unwrap(), [Some(reply)]);
        // 100 ms of audio in 20 ms frames
        assert_eq!(publisher.audio.lock().unwrap().len(), 5);

        running.close().await.unwrap();
    }

    #[tokio::test]
    async fn chat_from_backlog_and_live_is_answered() {
        let early = RoomEvent::ChatMessage { identity: "alice".into(), text: "early".into() };
        let (ctx, participant, tx, _publisher) = active_job(vec![early]).await;
        let session = AgentSession::builder().llm(EchoLlm).audio_output(false).build().unwrap();
        let mut running = session.start(ctx, &participant).unwrap();

        tx.send(RoomEvent::ChatMessage { identity: "mallory".into(), text: "ignored".into() })
            .await
            .unwrap();
        tx.send(RoomEvent::ChatMessage { identity: "alice".into(), text: "later".into() })
            .await
            .unwrap();
        tx.send(RoomEvent::Disconnected { reason: "done".into() }).await.unwrap();

        let mut agent_lines = Vec::new();
        while let Some(event) = running.next_event().await {
            if let SessionEvent::AgentSpeechCommitted(c) = event {
                agent_lines.push(c.content.unwrap());
            }
        }
        assert_eq!(agent_lines, ["you said early", "you said later"]);
        running.wait().await.unwrap();
    }

    #[tokio::test]
    async fn start_requires_active_job() {
        let (_tx, rx) = mpsc::channel(1);
        let room = MockRoom { incoming: rx, publisher: Arc::new(MockPublisher::default()) };
        let ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
        let session = AgentSession::builder().llm(EchoLlm).audio_output(false).build().unwrap();
        let participant = Participant::new("alice", ParticipantKind::Standard);
        assert!(matches!(session.start(ctx, &participant), Err(Error::InvalidState(_))));
    }

    #[test]
    fn build_validates_components() {
        assert!(matches!(AgentSession::builder().build(), Err(Error::Config(_))));
        assert!(matches!(AgentSession::builder().llm(EchoLlm).build(), Err(Error::Config(_))));
        let half_input = AgentSession::builder()
            .llm(EchoLlm)
            .audio_output(false)
            .vad(Arc::new(Vad::load()))
            .build();
        assert!(matches!(half_input, Err(Error::Config(_))));
    }
}
