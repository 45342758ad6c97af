use serde::{Deserialize, Serialize};

/// Response of the pre-recorded `/v1/listen` endpoint (fields we read).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenResponse {
    #[serde(default)]
    pub results: ListenResults,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenResults {
    #[serde(default)]
    pub channels: Vec<ListenChannel>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ListenChannel {
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Alternative {
    #[serde(default)]
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

impl ListenResponse {
    /// Transcript of the first alternative of the first channel.
    #[must_use]
    pub fn transcript(&self) -> &str {
        self.results
            .channels
            .first()
            .and_then(|channel| channel.alternatives.first())
            .map_or("", |alt| alt.transcript.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeakRequest<'a> {
    pub text: &'a str,
}
