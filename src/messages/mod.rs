//! OpenAI-style chat messages and their translation into the vendor payload.

pub mod truncation;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

pub use truncation::truncate_messages;

const TRIGGER: &str = "submit-message";

/// One message of an OpenAI chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, deserialize_with = "nullable_content")]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Flattened text content.
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Length of the flattened text in bytes.
    pub fn text_len(&self) -> usize {
        self.content.text_len()
    }

    pub fn is_system(&self) -> bool {
        self.role.eq_ignore_ascii_case("system")
    }
}

/// Either a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts.iter().filter_map(ContentPart::text).collect(),
        }
    }

    pub fn text_len(&self) -> usize {
        match self {
            MessageContent::Text(text) => text.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(ContentPart::text)
                .map(str::len)
                .sum(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

fn nullable_content<'de, D>(deserializer: D) -> Result<MessageContent, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<MessageContent>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// A typed content part. Only `text` parts carry text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<serde_json::Value>,
}

impl ContentPart {
    pub fn text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.text.as_deref()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Vendor message: a role and exactly one text part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorMessage {
    pub role: String,
    pub parts: Vec<VendorPart>,
}

impl VendorMessage {
    fn text(role: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![VendorPart {
                kind: "text".into(),
                text: text.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Body of the vendor chat POST.
#[derive(Debug, Clone, Serialize)]
pub struct VendorRequest {
    pub context: Vec<serde_json::Value>,
    pub model: String,
    pub id: String,
    pub messages: Vec<VendorMessage>,
    pub trigger: &'static str,
}

impl VendorRequest {
    pub fn new(model: impl Into<String>, messages: Vec<VendorMessage>) -> Self {
        Self {
            context: Vec::new(),
            model: model.into(),
            id: random_hex_id(16),
            messages,
            trigger: TRIGGER,
        }
    }
}

/// Translates chat messages into vendor messages.
///
/// A non-empty `inject` is appended (after a newline) to a leading `system`
/// message, or becomes a new leading system message when there is none.
/// Messages with an empty role are dropped.
pub fn to_vendor_messages(messages: &[ChatMessage], inject: Option<&str>) -> Vec<VendorMessage> {
    let inject = inject.filter(|value| !value.is_empty());
    let mut result = Vec::with_capacity(messages.len() + 1);
    let mut rest = messages;

    match (messages.first(), inject) {
        (Some(first), Some(extra)) if first.role == "system" => {
            result.push(VendorMessage::text("system", format!("{}\n{extra}", first.text())));
            rest = &messages[1..];
        }
        (_, Some(extra)) => result.push(VendorMessage::text("system", extra)),
        (Some(first), None) if first.role == "system" => {
            result.push(VendorMessage::text("system", first.text()));
            rest = &messages[1..];
        }
        _ => {}
    }

    result.extend(
        rest.iter()
            .filter(|message| !message.role.is_empty())
            .map(|message| VendorMessage::text(message.role.clone(), message.text())),
    );

    result
}

/// Random lowercase hex string of `len` characters.
pub fn random_hex_id(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .filter_map(|_| char::from_digit(rng.gen_range(0..16), 16))
        .collect()
}
