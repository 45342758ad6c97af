//! OpenAI-compatible chat-completions wire types.
//!
//! Only the subset needed for tool-calling conversations is modelled; unknown
//! response fields are ignored so compatible providers (Groq, OpenAI, local
//! gateways) deserialize alike.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// JSON Schema for tool parameters (intentionally untyped).
pub type JsonSchema = Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallWire>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::System { content: content.into() }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant { content: Some(content.into()), tool_calls: Vec::new() }
    }

    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool { tool_call_id: tool_call_id.into(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallWire {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as produced by the model.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSpec,
}

impl FunctionTool {
    #[must_use]
    pub fn new(name: impl Into<String>, description: Option<String>, parameters: JsonSchema) -> Self {
        Self {
            kind: function_kind(),
            function: FunctionSpec { name: name.into(), description, parameters },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: JsonSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatCompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// The message of the first choice, if any.
    #[must_use]
    pub fn first_message(&self) -> Option<&ResponseMessage> {
        self.choices.first().map(|choice| &choice.message)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallWire>>,
}

impl ResponseMessage {
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCallWire] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Error payload returned by OpenAI-compatible servers (`{"error": {...}}`).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<Value>,
}

impl ApiErrorBody {
    /// Parse a raw error response body, keeping the raw text when it is not the
    /// standard envelope.
    #[must_use]
    pub fn from_body(body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: ApiErrorBody,
        }

        serde_json::from_str::<Envelope>(body).map_or_else(
            |_| Self { message: body.trim().to_string(), error_type: None, code: None },
            |envelope| envelope.error,
        )
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            Some(kind) => write!(f, "{kind}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_tool_call_message_round_trips_from_response() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "llama",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let message = response.first_message().unwrap();
        assert!(message.content.is_none());
        assert_eq!(message.tool_calls()[0].function.name, "get_weather");
    }

    #[test]
    fn request_omits_empty_tools() {
        let request = ChatCompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn api_error_body_parses_envelope_or_keeps_text() {
        let parsed = ApiErrorBody::from_body(
            r#"{"error":{"message":"bad key","type":"invalid_request_error","code":"invalid_api_key"}}"#,
        );
        assert_eq!(parsed.message, "bad key");
        assert_eq!(parsed.to_string(), "invalid_request_error: bad key");

        let raw = ApiErrorBody::from_body("gateway timeout\n");
        assert_eq!(raw.message, "gateway timeout");
        assert!(raw.error_type.is_none());
    }
}
