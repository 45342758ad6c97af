use crate::error::{Error, Result};
use crate::trace_payload;
use crate::protocol::chat::{ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use reqwest::{Client, Response};
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Adapter for an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct ChatCompletionsAdapter {
    client: Client,
    auth_header: HeaderValue,
    endpoint: Url,
}

impl ChatCompletionsAdapter {
    /// Create a new adapter for `base_url` (e.g. `https://api.groq.com/openai/v1`).
    ///
    /// # Errors
    /// Returns an error if the URL or API key is invalid or the client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        Self::new_with_timeouts(base_url, api_key, DEFAULT_TIMEOUT, DEFAULT_POOL_IDLE_TIMEOUT)
    }

    /// Create a new adapter with custom timeouts.
    ///
    /// # Errors
    /// Returns an error if the URL or API key is invalid or the client build fails.
    #[allow(clippy::result_large_err)]
    pub fn new_with_timeouts(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        pool_idle_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(pool_idle_timeout)
            .build()?;

        let mut auth_header = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        auth_header.set_sensitive(true);

        Ok(Self {
            client,
            auth_header,
            endpoint: endpoint(base_url, "chat/completions")?,
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Run one chat completion.
    ///
    /// # Errors
    /// Returns an error if the request fails or the server answers with a non-success status.
    pub async fn complete(&self, request: &ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let body = serde_json::to_string(request)?;
        tracing::trace!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion: {}",
            trace_payload(&body)
        );
        let res = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.auth_header)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let text = check_status(res).await?.text().await?;
        tracing::trace!("chat completion response: {}", trace_payload(&text));
        Ok(serde_json::from_str(&text)?)
    }
}

/// Join `path` onto `base`, keeping any path prefix the base already has.
///
/// # Errors
/// Returns an error if `base` is not a valid URL.
#[allow(clippy::result_large_err)]
pub(crate) fn endpoint(base: &str, path: &str) -> Result<Url> {
    let mut base = base.trim_end_matches('/').to_string();
    base.push('/');
    Ok(Url::parse(&base)?.join(path)?)
}

/// Turn non-success responses into [`Error::Api`], keeping the server's message.
pub(crate) async fn check_status(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    Err(Error::Api { status: status.as_u16(), error: ApiErrorBody::from_body(&body) })
}
