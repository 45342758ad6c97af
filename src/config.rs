//! Environment-driven configuration.
//!
//! Every lookup goes through an [`EnvSource`] so tests can supply variables
//! without touching the process environment.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MEMORY_DB: &str = "memory.db";
pub const DEFAULT_DEEPGRAM_BASE_URL: &str = "https://api.deepgram.com";

/// Source of configuration variables.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

fn non_empty(env: &impl EnvSource, name: &str) -> Option<String> {
    env.var(name).filter(|value| !value.trim().is_empty())
}

#[allow(clippy::result_large_err)]
fn required(env: &impl EnvSource, name: &str) -> Result<String> {
    non_empty(env, name).ok_or_else(|| Error::missing_env(name))
}

/// Chat-completion endpoint used by the agent.
#[derive(Clone)]
pub struct LlmSettings {
    pub model: String,
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl LlmSettings {
    /// `GROQ_MODEL`, `GROQ_API_KEY` (or `OPENAI_API_KEY`), optional `GROQ_URL`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when the model or API key is missing.
    #[allow(clippy::result_large_err)]
    pub fn from_env(env: &impl EnvSource) -> Result<Self> {
        let model = required(env, "GROQ_MODEL")?;
        let api_key = non_empty(env, "GROQ_API_KEY")
            .or_else(|| non_empty(env, "OPENAI_API_KEY"))
            .ok_or_else(|| Error::missing_env("GROQ_API_KEY (or OPENAI_API_KEY)"))?;
        let base_url =
            non_empty(env, "GROQ_URL").unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string());
        Ok(Self { model, api_key, base_url })
    }
}

#[derive(Clone)]
pub struct DeepgramSettings {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for DeepgramSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepgramSettings")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl DeepgramSettings {
    /// # Errors
    /// Returns [`Error::Config`] when `DEEPGRAM_API_KEY` is missing.
    #[allow(clippy::result_large_err)]
    pub fn from_env(env: &impl EnvSource) -> Result<Self> {
        Ok(Self {
            api_key: required(env, "DEEPGRAM_API_KEY")?,
            base_url: DEFAULT_DEEPGRAM_BASE_URL.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct LiveKitSettings {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl fmt::Debug for LiveKitSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveKitSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

impl LiveKitSettings {
    /// # Errors
    /// Returns [`Error::Config`] when any of the three variables is missing.
    #[allow(clippy::result_large_err)]
    pub fn from_env(env: &impl EnvSource) -> Result<Self> {
        Ok(Self {
            url: required(env, "LIVEKIT_URL")?,
            api_key: required(env, "LIVEKIT_API_KEY")?,
            api_secret: required(env, "LIVEKIT_API_SECRET")?,
        })
    }
}

/// Process-wide settings shared by every job.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub memory_db_path: PathBuf,
    pub participant_timeout: Option<Duration>,
}

impl Settings {
    /// # Errors
    /// Returns [`Error::Config`] on missing credentials or a malformed timeout.
    #[allow(clippy::result_large_err)]
    pub fn from_env(env: &impl EnvSource) -> Result<Self> {
        let llm = LlmSettings::from_env(env)?;
        let memory_db_path = non_empty(env, "AGENT_MEMORY_DB")
            .map_or_else(|| PathBuf::from(DEFAULT_MEMORY_DB), PathBuf::from);
        let participant_timeout = match non_empty(env, "AGENT_PARTICIPANT_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    Error::Config(format!("AGENT_PARTICIPANT_TIMEOUT_SECS is not a number: {raw}"))
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };
        Ok(Self { llm, memory_db_path, participant_timeout })
    }
}
