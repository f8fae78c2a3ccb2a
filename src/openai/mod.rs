//! OpenAI chat-completion wire types and the glue from upstream events to them.

use serde::{Deserialize, Serialize};

use crate::messages::{ChatMessage, random_hex_id};
use crate::relay::{RelayError, RelayResult};
use crate::stream::{UpstreamEvent, UpstreamStream, Usage};

/// Terminating line of an OpenAI event stream.
pub const SSE_DONE: &str = "data: [DONE]\n\n";

/// Incoming chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            user: None,
        }
    }
}

/// `stop` accepts a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    pub fn new(id: impl Into<String>, model: impl Into<String>, content: String, usage: Usage) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion".into(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(content),
                finish_reason: "stop".into(),
            }],
            usage,
        }
    }

    pub fn content(&self) -> String {
        self.choices
            .first()
            .map(|choice| choice.message.text())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        content: Option<String>,
        finish_reason: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion.chunk".into(),
            created: chrono::Utc::now().timestamp(),
            model: model.into(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content,
                },
                finish_reason: finish_reason.map(str::to_string),
            }],
        }
    }

    /// The chunk framed as one SSE `data:` event.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>, kind: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.into(),
                code: code.map(str::to_string),
            },
        }
    }

    /// Error body for a relay failure. Relay-internal details are not exposed.
    pub fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::UpstreamBlocked { message, .. }
            | RelayError::UpstreamHttp { message, .. }
            | RelayError::ChallengeFetch { message, .. } => Self::new(message.clone(), "cursor_web_error", None),
            RelayError::UpstreamTransport(_) | RelayError::StreamDecode(_) => {
                Self::new(err.to_string(), "cursor_web_error", None)
            }
            RelayError::Cancelled => Self::new("Request cancelled", "cancelled", Some("request_cancelled")),
            _ => Self::new("Internal server error", "internal_error", None),
        }
    }
}

/// Fresh `chatcmpl-` identifier.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", random_hex_id(29))
}

/// OpenAI chunk for one upstream event.
///
/// `Usage` has no chunk of its own; `End` becomes the `finish_reason: "stop"`
/// chunk. `Error` has none either: the caller reports it and closes the stream.
pub fn chunk_for_event(id: &str, model: &str, event: &UpstreamEvent) -> Option<ChatCompletionChunk> {
    match event {
        UpstreamEvent::TextDelta(text) => Some(ChatCompletionChunk::new(id, model, Some(text.clone()), None)),
        UpstreamEvent::End => Some(ChatCompletionChunk::new(id, model, None, Some("stop"))),
        UpstreamEvent::Usage(_) | UpstreamEvent::Error(_) => None,
    }
}

/// Folds a whole stream into a non-streaming response.
pub async fn collect_completion(mut stream: UpstreamStream, model: &str) -> RelayResult<ChatCompletionResponse> {
    let mut content = String::new();
    let mut usage = Usage::default();

    loop {
        match stream.recv().await {
            Some(UpstreamEvent::TextDelta(text)) => content.push_str(&text),
            Some(UpstreamEvent::Usage(reported)) => usage = reported,
            Some(UpstreamEvent::Error(message)) => return Err(RelayError::StreamDecode(message)),
            Some(UpstreamEvent::End) => break,
            // Only a cancelled decoder closes without a terminal event.
            None => return Err(RelayError::Cancelled),
        }
    }

    Ok(ChatCompletionResponse::new(completion_id(), model, content, usage))
}
