use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use voice_agent_rs::agent::{Agent, MemoryDb, MessageRole};
use voice_agent_rs::entrypoint::{AgentDeps, voice_session};
use voice_agent_rs::protocol::packets::{ChatPacket, DataPacket};
use voice_agent_rs::sdk::{
    AgentServer, AgentSession, AudioFrame, BoxFuture, ConsoleRoom, EventHandlers, JobContext,
    JobProcess, JobState, LanguageModel, NoiseCancellation, Participant, ParticipantKind,
    RoomEvent, RoomPublisher, RoomTransport, SessionEvent, SpeechToText, TextToSpeech, TurnInput,
    Vad, prewarm,
};
use voice_agent_rs::{ChatCompletionsAdapter, Error, Result, builtin_tools};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RATE: u32 = 16_000;
const FRAME_SAMPLES: usize = 320;

struct ChannelRoom {
    name: String,
    incoming: mpsc::Receiver<RoomEvent>,
    publisher: Arc<RecordingPublisher>,
}

#[derive(Default)]
struct RecordingPublisher {
    chat: Mutex<Vec<String>>,
    audio_frames: Mutex<usize>,
    notify: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl RoomPublisher for RecordingPublisher {
    fn publish_data(&self, packet: DataPacket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let message = serde_json::from_slice::<ChatPacket>(&packet.payload)?.message;
            self.chat.lock().unwrap().push(message.clone());
            if let Some(notify) = self.notify.lock().unwrap().as_ref() {
                let _ = notify.send(message);
            }
            Ok(())
        })
    }

    fn publish_audio(&self, _frame: AudioFrame) -> BoxFuture<'_, Result<()>> {
        *self.audio_frames.lock().unwrap() += 1;
        Box::pin(async { Ok(()) })
    }
}

impl RoomTransport for ChannelRoom {
    fn room_name(&self) -> &str {
        &self.name
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

fn channel_room(
    name: &str,
) -> (ChannelRoom, mpsc::Sender<RoomEvent>, Arc<RecordingPublisher>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::channel(256);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let publisher = Arc::new(RecordingPublisher {
        notify: Mutex::new(Some(notify_tx)),
        ..RecordingPublisher::default()
    });
    let room = ChannelRoom { name: name.to_string(), incoming: rx, publisher: publisher.clone() };
    (room, tx, publisher, notify_rx)
}

fn text_reply(content: &str) -> Value {
    json!({
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content }, "finish_reason": "stop" }],
        "usage": null
    })
}

fn tool_reply(name: &str, arguments: &str) -> Value {
    json!({
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{ "id": "call_1", "type": "function", "function": { "name": name, "arguments": arguments } }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": null
    })
}

async fn llm_server(replies: Vec<Value>) -> MockServer {
    let server = MockServer::start().await;
    for reply in replies {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .up_to_n_times(1)
            .mount(&server)
            .await;
    }
    server
}

fn agent(server: &MockServer, memory: MemoryDb) -> Arc<Agent> {
    let client = ChatCompletionsAdapter::new(&format!("{}/v1", server.uri()), "sk-test").unwrap();
    Arc::new(
        Agent::builder()
            .client(client)
            .model("test-model")
            .instructions("You are a helpful voice assistant.")
            .tools(builtin_tools())
            .memory(memory)
            .build()
            .unwrap(),
    )
}

fn server_with(deps: AgentDeps) -> AgentServer {
    let deps = Arc::new(deps);
    AgentServer::new()
        .setup_fnc(prewarm)
        .rtc_session(move |ctx| voice_session(ctx, Arc::clone(&deps)))
}

#[tokio::test]
async fn text_session_greets_answers_and_relays_transcripts() {
    let server = llm_server(vec![
        text_reply("Hello! How can I help?"),
        tool_reply("calculate", r#"{"expression":"2 + 2"}"#),
        text_reply("Two plus two is 4."),
    ])
    .await;
    let memory = MemoryDb::open_in_memory().unwrap();
    let agent_server = server_with(AgentDeps {
        agent: agent(&server, memory.clone()),
        deepgram: None,
        participant_timeout: Some(Duration::from_secs(5)),
    });

    let (room, tx, publisher, mut published) = channel_room("room-42");
    tx.send(RoomEvent::ParticipantConnected(Participant::new("agent-b", ParticipantKind::Agent)))
        .await
        .unwrap();
    tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
        .await
        .unwrap();
    let job = tokio::spawn(async move { agent_server.run_job(Box::new(room)).await });

    assert_eq!(published.recv().await.unwrap(), "Hello! How can I help?");

    tx.send(RoomEvent::ChatMessage { identity: "alice".into(), text: "What's 2 + 2?".into() })
        .await
        .unwrap();
    assert_eq!(published.recv().await.unwrap(), "What's 2 + 2?");
    assert_eq!(published.recv().await.unwrap(), "Two plus two is 4.");

    tx.send(RoomEvent::Disconnected { reason: "room deleted".into() }).await.unwrap();
    job.await.unwrap().unwrap();

    assert_eq!(*publisher.audio_frames.lock().unwrap(), 0);
    let stored = memory.recent_messages("room-42", 10).unwrap();
    let roles: Vec<_> = stored.iter().map(|message| message.role).collect();
    assert_eq!(roles, [MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let greeting: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(greeting["messages"][1], json!({ "role": "system", "content": "say hello to the user" }));
    let tool_round: Value = serde_json::from_slice(&requests[2].body).unwrap();
    let messages = tool_round["messages"].as_array().unwrap();
    assert_eq!(messages.last().unwrap()["content"], "The result of 2 + 2 is 4");
}

#[tokio::test]
async fn server_runs_rooms_side_by_side() {
    let server = llm_server(vec![text_reply("Hello!"), text_reply("Hello!")]).await;
    let memory = MemoryDb::open_in_memory().unwrap();
    let agent_server = Arc::new(server_with(AgentDeps {
        agent: agent(&server, memory.clone()),
        deepgram: None,
        participant_timeout: Some(Duration::from_secs(5)),
    }));

    let (first, first_tx, _, mut first_published) = channel_room("room-a");
    let (second, second_tx, _, mut second_published) = channel_room("room-b");
    let (broken, broken_tx, _, _) = channel_room("room-gone");
    broken_tx.send(RoomEvent::Disconnected { reason: "deleted".into() }).await.unwrap();
    for tx in [&first_tx, &second_tx] {
        tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
            .await
            .unwrap();
    }

    let rooms: Vec<Box<dyn RoomTransport>> = vec![Box::new(broken), Box::new(first), Box::new(second)];
    let run = tokio::spawn(agent_server.run(futures::stream::iter(rooms)));

    // Both greetings arrive while both rooms are still open.
    let greet = async {
        assert_eq!(first_published.recv().await.unwrap(), "Hello!");
        assert_eq!(second_published.recv().await.unwrap(), "Hello!");
    };
    tokio::time::timeout(Duration::from_secs(5), greet).await.unwrap();
    assert!(!run.is_finished());

    first_tx.send(RoomEvent::Disconnected { reason: "done".into() }).await.unwrap();
    second_tx.send(RoomEvent::Disconnected { reason: "done".into() }).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), run).await.unwrap().unwrap();

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(memory.recent_messages("room-a", 10).unwrap().len(), 1);
    assert_eq!(memory.recent_messages("room-b", 10).unwrap().len(), 1);
    assert!(memory.recent_messages("room-gone", 10).unwrap().is_empty());
}

#[tokio::test]
async fn console_room_prints_transcripts() {
    let server = llm_server(vec![text_reply("Hi there!"), text_reply("It is sunny.")]).await;
    let agent_server = server_with(AgentDeps {
        agent: agent(&server, MemoryDb::open_in_memory().unwrap()),
        deepgram: None,
        participant_timeout: None,
    });

    let (mut user_input, room_input) = tokio::io::duplex(1024);
    let (room_output, user_output) = tokio::io::duplex(1024);
    let room = ConsoleRoom::new("console", BufReader::new(room_input), Box::new(room_output));
    let job = tokio::spawn(async move { agent_server.run_job(Box::new(room)).await });

    let mut lines = BufReader::new(user_output).lines();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "> Hi there!");

    user_input.write_all(b"\n  \nhow is the weather\n").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "> how is the weather");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "> It is sunny.");

    drop(user_input);
    job.await.unwrap().unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn voice_session_without_prewarm_fails_for_audio() {
    let server = llm_server(Vec::new()).await;
    let deps = Arc::new(AgentDeps {
        agent: agent(&server, MemoryDb::open_in_memory().unwrap()),
        deepgram: Some(voice_agent_rs::DeepgramSettings {
            api_key: "dg".to_string(),
            base_url: server.uri(),
        }),
        participant_timeout: None,
    });
    let (room, tx, _publisher, _published) = channel_room("no-vad");
    tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
        .await
        .unwrap();

    let ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    let err = voice_session(ctx, deps).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

struct RecordingStt {
    utterances: Mutex<Vec<usize>>,
}

#[async_trait]
impl SpeechToText for RecordingStt {
    async fn recognize(&self, audio: &AudioFrame) -> Result<String> {
        self.utterances.lock().unwrap().push(audio.data.len());
        Ok("what time is it".to_string())
    }
}

struct EchoLlm;

#[async_trait]
impl LanguageModel for EchoLlm {
    async fn respond(&self, input: TurnInput) -> Result<String> {
        match input {
            TurnInput::User(text) => Ok(format!("you asked: {text}")),
            TurnInput::Instructions(_) => Ok(String::new()),
        }
    }
}

struct SilenceTts;

#[async_trait]
impl TextToSpeech for SilenceTts {
    fn sample_rate(&self) -> u32 {
        24_000
    }

    async fn synthesize(&self, _text: &str) -> Result<AudioFrame> {
        // 200 ms
        Ok(AudioFrame::new(vec![0; 4_800], 24_000, 1))
    }
}

fn tone(amplitude: i16) -> AudioFrame {
    let data = (0..FRAME_SAMPLES).map(|i| if i % 2 == 0 { amplitude } else { -amplitude }).collect();
    AudioFrame::new(data, RATE, 1)
}

fn silence() -> AudioFrame {
    AudioFrame::new(vec![0; FRAME_SAMPLES], RATE, 1)
}

/// Run a speech burst from `participant` through an audio session and return
/// the session events plus the utterance sizes the STT saw.
async fn run_audio_session(
    participant: Participant,
    amplitude: i16,
) -> (Vec<SessionEvent>, Vec<usize>, usize) {
    let (room, tx, publisher, _published) = channel_room("audio");
    let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    ctx.connect().await.unwrap();
    tx.send(RoomEvent::ParticipantConnected(participant.clone())).await.unwrap();
    let participant = ctx.wait_for_participant(None).await.unwrap();

    let stt = Arc::new(RecordingStt { utterances: Mutex::new(Vec::new()) });
    let session = AgentSession::builder()
        .stt(SharedStt(stt.clone()))
        .llm(EchoLlm)
        .tts(SilenceTts)
        .vad(Arc::new(Vad::load()))
        .noise_cancellation(NoiseCancellation::for_participant)
        .build()
        .unwrap();
    let mut running = session.start(ctx, &participant).unwrap();

    let identity = participant.identity.clone();
    for _ in 0..10 {
        tx.send(RoomEvent::AudioFrame { identity: identity.clone(), frame: tone(amplitude) })
            .await
            .unwrap();
    }
    for _ in 0..30 {
        tx.send(RoomEvent::AudioFrame { identity: identity.clone(), frame: silence() }).await.unwrap();
    }
    tx.send(RoomEvent::ParticipantDisconnected { identity }).await.unwrap();

    let mut events = Vec::new();
    while let Some(event) = running.next_event().await {
        events.push(event);
    }
    running.wait().await.unwrap();
    let utterances = stt.utterances.lock().unwrap().clone();
    let frames = *publisher.audio_frames.lock().unwrap();
    (events, utterances, frames)
}

struct SharedStt(Arc<RecordingStt>);

#[async_trait]
impl SpeechToText for SharedStt {
    async fn recognize(&self, audio: &AudioFrame) -> Result<String> {
        self.0.recognize(audio).await
    }
}

#[tokio::test]
async fn speech_is_segmented_transcribed_and_spoken() {
    let (events, utterances, frames) =
        run_audio_session(Participant::new("alice", ParticipantKind::Standard), 3_000).await;

    assert_eq!(utterances.len(), 1);
    // 200 ms of speech plus 560 ms of trailing silence
    assert_eq!(utterances[0], 38 * FRAME_SAMPLES);
    // 200 ms of agent audio in 20 ms frames
    assert_eq!(frames, 10);

    let commits: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::UserSpeechCommitted(c) | SessionEvent::AgentSpeechCommitted(c) => {
                c.content.clone()
            }
            _ => None,
        })
        .collect();
    assert_eq!(commits, ["what time is it", "you asked: what time is it"]);
    assert!(events.contains(&SessionEvent::AgentStateChanged(
        voice_agent_rs::sdk::AgentState::Speaking
    )));
}

#[tokio::test]
async fn telephony_gate_drops_quiet_sip_audio() {
    let (_, utterances, _) =
        run_audio_session(Participant::new("caller", ParticipantKind::Sip), 450).await;
    assert!(utterances.is_empty());

    let (_, utterances, _) =
        run_audio_session(Participant::new("mic", ParticipantKind::Standard), 450).await;
    assert_eq!(utterances.len(), 1);
}

#[tokio::test]
async fn handlers_run_in_emission_order() {
    let (room, tx, _publisher, _published) = channel_room("ordered");
    let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    ctx.connect().await.unwrap();
    tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
        .await
        .unwrap();
    let participant = ctx.wait_for_participant(None).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (first, second) = (seen.clone(), seen.clone());
    let handlers = EventHandlers::new()
        .on_user_speech_committed(move |c| {
            first.lock().unwrap().push(format!("user:{}", c.content.as_deref().unwrap_or_default()));
        })
        .on_agent_speech_committed(move |c| {
            second.lock().unwrap().push(format!("agent:{}", c.content.as_deref().unwrap_or_default()));
        });
    let session = AgentSession::builder()
        .llm(EchoLlm)
        .audio_output(false)
        .handlers(handlers)
        .build()
        .unwrap();
    let running = session.start(ctx, &participant).unwrap();

    running.say("welcome").await.unwrap();
    tx.send(RoomEvent::ChatMessage { identity: "alice".into(), text: "one".into() }).await.unwrap();
    tx.send(RoomEvent::ChatMessage { identity: "alice".into(), text: "two".into() }).await.unwrap();
    tx.send(RoomEvent::Disconnected { reason: "bye".into() }).await.unwrap();
    running.wait().await.unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        [
            "agent:welcome",
            "user:one",
            "agent:you asked: one",
            "user:two",
            "agent:you asked: two"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn participant_wait_times_out() {
    let (room, _tx, _publisher, _published) = channel_room("empty");
    let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    ctx.connect().await.unwrap();

    let err = ctx.wait_for_participant(Some(Duration::from_secs(30))).await.unwrap_err();
    assert!(matches!(err, Error::ParticipantTimeout(limit) if limit == Duration::from_secs(30)));
    assert_eq!(ctx.state(), JobState::Ended);
}

#[tokio::test]
async fn room_closing_before_participant_ends_job() {
    let (room, tx, _publisher, _published) = channel_room("closing");
    let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    assert!(ctx.wait_for_participant(None).await.is_err());

    ctx.connect().await.unwrap();
    tx.send(RoomEvent::ParticipantConnected(Participant::new("bot", ParticipantKind::Agent)))
        .await
        .unwrap();
    tx.send(RoomEvent::Disconnected { reason: "shutdown".into() }).await.unwrap();

    let err = ctx.wait_for_participant(None).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert_eq!(ctx.state(), JobState::Ended);
}

#[tokio::test]
async fn early_events_are_kept_for_the_session() {
    let (room, tx, _publisher, _published) = channel_room("early");
    let mut ctx = JobContext::new(Box::new(room), Arc::new(JobProcess::new()));
    ctx.connect().await.unwrap();
    tx.send(RoomEvent::ChatMessage { identity: "alice".into(), text: "before join".into() })
        .await
        .unwrap();
    tx.send(RoomEvent::ParticipantConnected(Participant::new("alice", ParticipantKind::Standard)))
        .await
        .unwrap();
    let participant = ctx.wait_for_participant(None).await.unwrap();
    assert_eq!(ctx.state(), JobState::Active);
    assert_eq!(ctx.participant().map(|p| p.identity.as_str()), Some("alice"));

    let session = AgentSession::builder().llm(EchoLlm).audio_output(false).build().unwrap();
    let mut running = session.start(ctx, &participant).unwrap();
    tx.send(RoomEvent::Disconnected { reason: "done".into() }).await.unwrap();

    let mut replies = Vec::new();
    while let Some(event) = running.next_event().await {
        if let SessionEvent::AgentSpeechCommitted(c) = event {
            replies.extend(c.content);
        }
    }
    assert_eq!(replies, ["you asked: before join"]);
}

#[tokio::test]
async fn prewarm_runs_once_and_loads_vad() {
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let server = AgentServer::new()
        .setup_fnc(move |proc| {
            *counter.lock().unwrap() += 1;
            prewarm(proc)
        })
        .rtc_session(|_ctx| async { Ok(()) });

    server.prewarm().await.unwrap();
    let (room, _tx, _publisher, _published) = channel_room("job");
    server.run_job(Box::new(room)).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(server.proc().get::<Vad>(voice_agent_rs::sdk::VAD_SLOT).is_some());
}
