//! Deepgram pre-recorded speech-to-text and text-to-speech over REST.

use super::rest::{check_status, endpoint};
use crate::config::DeepgramSettings;
use crate::protocol::deepgram::{ListenResponse, SpeakRequest};
use crate::sdk::pipeline::{SpeechToText, TextToSpeech};
use crate::sdk::room::AudioFrame;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub const DEFAULT_STT_MODEL: &str = "nova-3";
pub const DEFAULT_TTS_MODEL: &str = "aura-2-andromeda-en";
pub const DEFAULT_TTS_SAMPLE_RATE: u32 = 24_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[allow(clippy::result_large_err)]
fn client_and_auth(api_key: &str) -> Result<(Client, HeaderValue)> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let mut auth = HeaderValue::from_str(&format!("Token {api_key}"))?;
    auth.set_sensitive(true);
    Ok((client, auth))
}

#[derive(Clone, Debug)]
pub struct DeepgramStt {
    client: Client,
    auth_header: HeaderValue,
    endpoint: Url,
    model: String,
    language: String,
}

impl DeepgramStt {
    /// # Errors
    /// Returns an error if the base URL or API key is invalid.
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let (client, auth_header) = client_and_auth(api_key)?;
        Ok(Self {
            client,
            auth_header,
            endpoint: endpoint(base_url, "v1/listen")?,
            model: DEFAULT_STT_MODEL.to_string(),
            language: "en".to_string(),
        })
    }

    /// # Errors
    /// Returns an error if the settings hold an invalid URL or key.
    #[allow(clippy::result_large_err)]
    pub fn from_settings(settings: &DeepgramSettings) -> Result<Self> {
        Self::new(&settings.base_url, &settings.api_key)
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl SpeechToText for DeepgramStt {
    async fn recognize(&self, audio: &AudioFrame) -> Result<String> {
        if audio.data.is_empty() {
            return Ok(String::new());
        }
        let sample_rate = audio.sample_rate.to_string();
        let channels = audio.num_channels.to_string();
        tracing::debug!(duration_ms = audio.duration_ms(), "sending utterance to deepgram");
        let res = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "application/octet-stream")
            .query(&[
                ("model", self.model.as_str()),
                ("language", self.language.as_str()),
                ("smart_format", "true"),
                ("encoding", "linear16"),
                ("sample_rate", sample_rate.as_str()),
                ("channels", channels.as_str()),
            ])
            .body(audio.to_le_bytes())
            .send()
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;
        let res = check_status(res).await?;
        let body: ListenResponse = res.json().await?;
        Ok(body.transcript().trim().to_string())
    }
}

#[derive(Clone, Debug)]
pub struct DeepgramTts {
    client: Client,
    auth_header: HeaderValue,
    endpoint: Url,
    model: String,
    sample_rate: u32,
}

impl DeepgramTts {
    /// # Errors
    /// Returns an error if the base URL or API key is invalid.
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let (client, auth_header) = client_and_auth(api_key)?;
        Ok(Self {
            client,
            auth_header,
            endpoint: endpoint(base_url, "v1/speak")?,
            model: DEFAULT_TTS_MODEL.to_string(),
            sample_rate: DEFAULT_TTS_SAMPLE_RATE,
        })
    }

    /// # Errors
    /// Returns an error if the settings hold an invalid URL or key.
    #[allow(clippy::result_large_err)]
    pub fn from_settings(settings: &DeepgramSettings) -> Result<Self> {
        Self::new(&settings.base_url, &settings.api_key)
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TextToSpeech for DeepgramTts {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn synthesize(&self, text: &str) -> Result<AudioFrame> {
        let sample_rate = self.sample_rate.to_string();
        let res = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .query(&[
                ("model", self.model.as_str()),
                ("encoding", "linear16"),
                ("sample_rate", sample_rate.as_str()),
                ("container", "none"),
            ])
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| Error::Tts(e.to_string()))?;
        let res = check_status(res).await?;
        let bytes = res.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        Ok(AudioFrame::from_le_bytes(&bytes, self.sample_rate, 1))
    }
}
