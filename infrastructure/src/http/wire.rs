//! JSON bodies shared by the gateway server and its client.

use roundtable_domain::{Message, StreamEvent, Usage};
use serde::{Deserialize, Serialize};

/// `POST /chat` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatBody {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One `data:` line of a streaming `/chat` response.
///
/// A stream always ends with exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireEvent {
    Content { delta: String },
    Reasoning { delta: String },
    Done { usage: Option<Usage> },
    Error { message: String },
}

impl WireEvent {
    /// Back to a gateway event; `Done` without usage has no counterpart.
    pub fn into_stream_event(self) -> Option<StreamEvent> {
        match self {
            WireEvent::Content { delta } => Some(StreamEvent::Content(delta)),
            WireEvent::Reasoning { delta } => Some(StreamEvent::Reasoning(delta)),
            WireEvent::Done { usage } => usage.map(StreamEvent::Usage),
            WireEvent::Error { message } => Some(StreamEvent::Error(message)),
        }
    }
}

/// Non-streaming `/chat` success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionBody {
    pub content: String,
    pub reasoning: Option<String>,
    pub usage: Option<Usage>,
}

/// Error body for every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub model: String,
}
