use crate::protocol::chat::ApiErrorBody;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP protocol error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API error ({status}): {error}")]
    Api { status: u16, error: ApiErrorBody },

    #[error("Memory store error: {0}")]
    Memory(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Room error: {0}")]
    Room(String),

    #[error("Speech-to-text error: {0}")]
    Stt(String),

    #[error("Text-to-speech error: {0}")]
    Tts(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No participant joined within {0:?}")]
    ParticipantTimeout(Duration),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn missing_env(name: &str) -> Self {
        Self::Config(format!("missing environment variable {name}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
