//! Room abstraction the voice session runs against.

use crate::Result;
use crate::protocol::packets::DataPacket;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipantKind {
    #[default]
    Standard,
    Ingress,
    Egress,
    /// Telephony caller bridged in over SIP.
    Sip,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    pub name: Option<String>,
    pub kind: ParticipantKind,
}

impl Participant {
    #[must_use]
    pub fn new(identity: impl Into<String>, kind: ParticipantKind) -> Self {
        Self { identity: identity.into(), name: None, kind }
    }
}

/// Interleaved PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFrame {
    pub data: Vec<i16>,
    pub sample_rate: u32,
    pub num_channels: u32,
}

impl AudioFrame {
    #[must_use]
    pub const fn new(data: Vec<i16>, sample_rate: u32, num_channels: u32) -> Self {
        Self { data, sample_rate, num_channels }
    }

    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        self.data.len() / self.num_channels.max(1) as usize
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples_per_channel() as u64 * 1000 / u64::from(self.sample_rate)
    }

    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() * 2);
        for sample in &self.data {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        buf
    }

    /// Decode little-endian PCM16 bytes; a trailing odd byte is ignored.
    #[must_use]
    pub fn from_le_bytes(bytes: &[u8], sample_rate: u32, num_channels: u32) -> Self {
        let data = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Self { data, sample_rate, num_channels }
    }

    /// Split into consecutive frames of `frame_ms` milliseconds (last one may be shorter).
    #[must_use]
    pub fn chunks(&self, frame_ms: u32) -> Vec<Self> {
        let per_frame = (self.sample_rate * frame_ms / 1000).max(1) as usize
            * self.num_channels.max(1) as usize;
        self.data
            .chunks(per_frame)
            .map(|chunk| Self::new(chunk.to_vec(), self.sample_rate, self.num_channels))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected(Participant),
    ParticipantDisconnected { identity: String },
    AudioFrame { identity: String, frame: AudioFrame },
    ChatMessage { identity: String, text: String },
    Disconnected { reason: String },
}

/// Outbound half of a room connection. Cheap to share between tasks.
pub trait RoomPublisher: Send + Sync {
    fn publish_data(&self, packet: DataPacket) -> BoxFuture<'_, Result<()>>;
    fn publish_audio(&self, frame: AudioFrame) -> BoxFuture<'_, Result<()>>;
}

/// A connection to one real-time room.
pub trait RoomTransport: Send {
    fn room_name(&self) -> &str;
    fn connect(&mut self) -> BoxFuture<'_, Result<()>>;
    fn next_event(&mut self) -> BoxFuture<'_, Result<Option<RoomEvent>>>;
    fn publisher(&self) -> Arc<dyn RoomPublisher>;
}
