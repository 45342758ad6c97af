//! [`RoomTransport`] over a LiveKit room.

use super::room::{
    AudioFrame, BoxFuture, Participant, ParticipantKind, RoomEvent, RoomPublisher, RoomTransport,
};
use crate::config::LiveKitSettings;
use crate::protocol::packets::{CHAT_INPUT_TOPIC, DataPacket};
use crate::{Error, Result};
use futures::StreamExt;
use livekit::options::TrackPublishOptions;
use livekit::prelude::{
    LocalAudioTrack, LocalTrack, RemoteParticipant, RemoteTrack, Room, RoomOptions,
};
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit_api::access_token::{AccessToken, VideoGrants};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Rate remote audio is resampled to before VAD and STT.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Rate of the published agent track.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
const OUTPUT_QUEUE_MS: u32 = 200;
const AGENT_TRACK_NAME: &str = "agent-voice";

/// Mint a room-join token for the agent.
///
/// # Errors
/// Returns [`Error::Config`] if the token cannot be signed.
#[allow(clippy::result_large_err)]
pub fn mint_agent_token(settings: &LiveKitSettings, room: &str, identity: &str) -> Result<String> {
    AccessToken::with_api_key(&settings.api_key, &settings.api_secret)
        .with_identity(identity)
        .with_name(identity)
        .with_grants(VideoGrants {
            room_join: true,
            room: room.to_string(),
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
            agent: true,
            ..Default::default()
        })
        .to_jwt()
        .map_err(|e| Error::Config(format!("failed to sign livekit token: {e}")))
}

pub struct LiveKitRoom {
    settings: LiveKitSettings,
    name: String,
    identity: String,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    events_rx: mpsc::UnboundedReceiver<RoomEvent>,
    publisher: Arc<LiveKitPublisher>,
}

impl std::fmt::Debug for LiveKitRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveKitRoom")
            .field("url", &self.settings.url)
            .field("name", &self.name)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl LiveKitRoom {
    #[must_use]
    pub fn new(settings: LiveKitSettings, room: impl Into<String>, identity: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            settings,
            name: room.into(),
            identity: identity.into(),
            events_tx,
            events_rx,
            publisher: Arc::new(LiveKitPublisher::default()),
        }
    }

    async fn open(&mut self) -> Result<()> {
        let token = mint_agent_token(&self.settings, &self.name, &self.identity)?;
        let (room, mut lk_events) = Room::connect(&self.settings.url, &token, RoomOptions::default())
            .await
            .map_err(|e| Error::Room(e.to_string()))?;
        tracing::info!(room = %room.name(), "connected to livekit");

        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            OUTPUT_SAMPLE_RATE,
            1,
            OUTPUT_QUEUE_MS,
        );
        let track = LocalAudioTrack::create_audio_track(
            AGENT_TRACK_NAME,
            RtcAudioSource::Native(source.clone()),
        );
        room.local_participant()
            .publish_track(LocalTrack::Audio(track), TrackPublishOptions::default())
            .await
            .map_err(|e| Error::Room(e.to_string()))?;

        for participant in room.remote_participants().values() {
            let _ = self.events_tx.send(RoomEvent::ParticipantConnected(map_participant(participant)));
        }

        let room = Arc::new(room);
        self.publisher.attach(Arc::clone(&room), source);

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = lk_events.recv().await {
                if !forward(event, &events_tx) {
                    break;
                }
            }
            let _ = events_tx.send(RoomEvent::Disconnected { reason: "room closed".to_string() });
        });
        Ok(())
    }
}

/// Map one LiveKit event. Returns `false` once the room is gone.
fn forward(event: livekit::RoomEvent, tx: &mpsc::UnboundedSender<RoomEvent>) -> bool {
    use livekit::RoomEvent as Lk;
    let mapped = match event {
        Lk::ParticipantConnected(participant) => {
            Some(RoomEvent::ParticipantConnected(map_participant(&participant)))
        }
        Lk::ParticipantDisconnected(participant) => Some(RoomEvent::ParticipantDisconnected {
            identity: participant.identity().to_string(),
        }),
        Lk::TrackSubscribed { track: RemoteTrack::Audio(track), participant, .. } => {
            let identity = participant.identity().to_string();
            tracing::debug!(participant = %identity, "subscribed to audio track");
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut stream = NativeAudioStream::new(
                    track.rtc_track(),
                    i32::try_from(INPUT_SAMPLE_RATE).unwrap_or(16_000),
                    1,
                );
                while let Some(frame) = stream.next().await {
                    let frame = AudioFrame::new(frame.data.to_vec(), frame.sample_rate, frame.num_channels);
                    if tx.send(RoomEvent::AudioFrame { identity: identity.clone(), frame }).is_err() {
                        break;
                    }
                }
            });
            None
        }
        Lk::DataReceived { payload, topic, participant, .. } => {
            match (topic.as_deref(), participant) {
                (Some(CHAT_INPUT_TOPIC), Some(participant)) => Some(RoomEvent::ChatMessage {
                    identity: participant.identity().to_string(),
                    text: chat_text(&payload),
                }),
                _ => None,
            }
        }
        Lk::Disconnected { reason } => {
            let _ = tx.send(RoomEvent::Disconnected { reason: format!("{reason:?}") });
            return false;
        }
        _ => None,
    };
    if let Some(event) = mapped {
        return tx.send(event).is_ok();
    }
    true
}

/// Chat payloads are JSON with a `message` field; plain text is accepted too.
fn chat_text(payload: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()
        .and_then(|value| value.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned())
}

fn map_participant(participant: &RemoteParticipant) -> Participant {
    use livekit::participant::ParticipantKind as Lk;
    let kind = match participant.kind() {
        Lk::Sip => ParticipantKind::Sip,
        Lk::Ingress => ParticipantKind::Ingress,
        Lk::Egress => ParticipantKind::Egress,
        Lk::Agent => ParticipantKind::Agent,
        _ => ParticipantKind::Standard,
    };
    let name = participant.name();
    Participant {
        identity: participant.identity().to_string(),
        name: (!name.is_empty()).then_some(name),
        kind,
    }
}

impl RoomTransport for LiveKitRoom {
    fn room_name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.open())
    }

    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RoomEvent>>> {
        Box::pin(async move { Ok(self.events_rx.recv().await) })
    }

    fn publisher(&self) -> Arc<dyn RoomPublisher> {
        self.publisher.clone()
    }
}

#[derive(Default)]
struct LiveKitPublisher {
    inner: std::sync::OnceLock<(Arc<Room>, NativeAudioSource)>,
}

impl LiveKitPublisher {
    fn attach(&self, room: Arc<Room>, source: NativeAudioSource) {
        let _ = self.inner.set((room, source));
    }

    #[allow(clippy::result_large_err)]
    fn connected(&self) -> Result<&(Arc<Room>, NativeAudioSource)> {
        self.inner.get().ok_or_else(|| Error::InvalidState("livekit room is not connected".to_string()))
    }
}

impl RoomPublisher for LiveKitPublisher {
    fn publish_data(&self, packet: DataPacket) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let (room, _) = self.connected()?;
            room.local_participant()
                .publish_data(livekit::DataPacket {
                    payload: packet.payload,
                    topic: Some(packet.topic),
                    reliable: packet.reliable,
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::Room(e.to_string()))
        })
    }

    fn publish_audio(&self, frame: AudioFrame) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let (_, source) = self.connected()?;
            let samples_per_channel = u32::try_from(frame.samples_per_channel()).unwrap_or(u32::MAX);
            let lk_frame = livekit::webrtc::audio_frame::AudioFrame {
                data: Cow::Owned(frame.data),
                sample_rate: frame.sample_rate,
                num_channels: frame.num_channels,
                samples_per_channel,
            };
            source.capture_frame(&lk_frame).await.map_err(|e| Error::Room(e.to_string()))
        })
    }
}
