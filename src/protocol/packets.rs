use serde::{Deserialize, Serialize};

/// Data-channel topic the front-end chat UI listens on.
pub const CHAT_TOPIC: &str = "lk-chat-topic";

/// Topic on which participants send typed chat into the room.
pub const CHAT_INPUT_TOPIC: &str = "lk.chat";

/// Transcript envelope published for the chat UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatPacket {
    pub message: String,
    /// Unix epoch, milliseconds.
    pub timestamp: i64,
}

impl ChatPacket {
    #[must_use]
    pub fn new(message: impl Into<String>, timestamp: i64) -> Self {
        Self { message: message.into(), timestamp }
    }

    /// Stamp a message with the current wall-clock time.
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self::new(message, chrono::Utc::now().timestamp_millis())
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// A payload published on a room data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub payload: Vec<u8>,
    pub topic: String,
    pub reliable: bool,
}

impl DataPacket {
    #[must_use]
    pub fn reliable(payload: Vec<u8>, topic: impl Into<String>) -> Self {
        Self { payload, topic: topic.into(), reliable: true }
    }
}
