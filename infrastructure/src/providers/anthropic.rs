//! Anthropic Messages API.
//!
//! System text moves to the top-level `system` field; the stream is a
//! sequence of typed events whose deltas are indexed by content block.

use super::transport::{EventDecoder, ended_early, open_stream, parse_payload};
use super::{ANTHROPIC_API_VERSION, ProviderAdapter, ProviderSettings};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{ChatRequest, GatewayError, StreamHandle};
use roundtable_domain::{Provider, StreamEvent, Usage, flatten_system};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct AnthropicAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl AnthropicAdapter {
    pub fn new(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    fn body(&self, model: &str, request: &ChatRequest) -> Value {
        let (system, turns) = flatten_system(&request.messages);
        let messages: Vec<Value> = turns
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
            "stream": true,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn api_key(&self) -> Option<&str> {
        self.settings.api_key.as_deref()
    }

    async fn stream(
        &self,
        model: &str,
        request: &ChatRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError> {
        debug!("anthropic messages call for {}", model);
        let version = self
            .settings
            .api_version
            .as_deref()
            .unwrap_or(ANTHROPIC_API_VERSION);
        let http = self
            .client
            .post(self.settings.endpoint("messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", version)
            .json(&self.body(model, request));
        open_stream("anthropic", http, AnthropicDecoder::default(), cancel).await
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockStart {
        index: usize,
        content_block: Block,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: WireError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartMessage {
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Block {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        thinking: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Text,
    Thinking,
    /// tool_use, redacted_thinking and anything newer
    Ignored,
}

/// Tracks open content blocks and accumulates split usage.
#[derive(Default)]
pub struct AnthropicDecoder {
    blocks: HashMap<usize, BlockKind>,
    usage: Option<Usage>,
    stopped: bool,
}

impl AnthropicDecoder {
    fn merge_usage(&mut self, usage: WireUsage) -> StreamEvent {
        let update = Usage::new(usage.input_tokens, usage.output_tokens);
        let merged = match self.usage.take() {
            Some(mut current) => {
                current.merge(&update);
                current
            }
            None => update,
        };
        self.usage = Some(merged.clone());
        StreamEvent::Usage(merged)
    }
}

impl EventDecoder for AnthropicDecoder {
    fn decode(&mut self, payload: &str) -> Vec<StreamEvent> {
        let Some(event) = parse_payload::<WireEvent>(payload) else {
            return Vec::new();
        };

        match event {
            WireEvent::MessageStart { message } => {
                message.usage.map(|u| self.merge_usage(u)).into_iter().collect()
            }
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                let kind = match content_block.kind.as_str() {
                    "text" => BlockKind::Text,
                    "thinking" => BlockKind::Thinking,
                    _ => BlockKind::Ignored,
                };
                self.blocks.insert(index, kind);
                Vec::new()
            }
            WireEvent::ContentBlockDelta { index, delta } => {
                // A delta for an unannounced block is taken at face value.
                let kind = self.blocks.get(&index).copied();
                match (delta, kind) {
                    (_, Some(BlockKind::Ignored)) => Vec::new(),
                    (Delta::TextDelta { text }, _) if !text.is_empty() => {
                        vec![StreamEvent::Content(text)]
                    }
                    (Delta::ThinkingDelta { thinking }, _) if !thinking.is_empty() => {
                        vec![StreamEvent::Reasoning(thinking)]
                    }
                    _ => Vec::new(),
                }
            }
            WireEvent::ContentBlockStop { index } => {
                self.blocks.remove(&index);
                Vec::new()
            }
            WireEvent::MessageDelta { usage } => {
                usage.map(|u| self.merge_usage(u)).into_iter().collect()
            }
            WireEvent::MessageStop => {
                self.stopped = true;
                Vec::new()
            }
            WireEvent::Error { error } => {
                self.stopped = true;
                let message = match (error.kind, error.message) {
                    (Some(kind), Some(message)) => format!("{}: {}", kind, message),
                    (_, Some(message)) => message,
                    (Some(kind), None) => kind,
                    (None, None) => "unknown error".to_string(),
                };
                vec![StreamEvent::Error(message)]
            }
            WireEvent::Other => Vec::new(),
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.stopped {
            Vec::new()
        } else {
            vec![ended_early("anthropic", "message_stop")]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::sse::SseDecoder;
    use roundtable_domain::Message;

    const CAPTURED: &str = r#"event: message_start
data: {"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","content":[],"model":"claude-sonnet-4-5","usage":{"input_tokens":25,"output_tokens":1}}}

event: content_block_start
data: {"type":"content_block_start","index":0,"content_block":{"type":"thinking","thinking":""}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"Let me think"}}

event: content_block_delta
data: {"type":"content_block_delta","index":0,"delta":{"type":"signature_delta","signature":"abc"}}

event: content_block_stop
data: {"type":"content_block_stop","index":0}

event: content_block_start
data: {"type":"content_block_start","index":1,"content_block":{"type":"text","text":""}}

event: ping
data: {"type": "ping"}

event: content_block_delta
data: {"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":"Hello"}}

event: content_block_stop
data: {"type":"content_block_stop","index":1}

event: message_delta
data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":15}}

event: message_stop
data: {"type":"message_stop"}

"#;

    #[test]
    fn test_decodes_captured_stream() {
        let mut sse = SseDecoder::new();
        let mut decoder = AnthropicDecoder::default();
        let events: Vec<StreamEvent> = sse
            .push(CAPTURED.as_bytes())
            .iter()
            .flat_map(|p| decoder.decode(p))
            .collect();

        assert_eq!(events.len(), 4);
        assert_eq!(events[1], StreamEvent::Reasoning("Let me think".into()));
        assert_eq!(events[2], StreamEvent::Content("Hello".into()));
        let StreamEvent::Usage(usage) = &events[3] else {
            panic!("expected usage");
        };
        assert_eq!(usage.prompt_tokens, Some(25));
        assert_eq!(usage.completion_tokens, Some(15));
        assert_eq!(usage.total_tokens, Some(40));
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_cut_stream_reports_missing_stop() {
        let cut = CAPTURED
            .split("event: message_delta")
            .next()
            .unwrap_or_default();
        let mut sse = SseDecoder::new();
        let mut decoder = AnthropicDecoder::default();
        let events: Vec<StreamEvent> = sse
            .push(cut.as_bytes())
            .iter()
            .flat_map(|p| decoder.decode(p))
            .collect();
        assert_eq!(events.last(), Some(&StreamEvent::Content("Hello".into())));
        assert_eq!(
            decoder.finish(),
            vec![StreamEvent::Error(
                "anthropic stream ended without message_stop".into()
            )]
        );
    }

    #[test]
    fn test_error_event() {
        let mut decoder = AnthropicDecoder::default();
        let events = decoder.decode(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert_eq!(
            events,
            vec![StreamEvent::Error("overloaded_error: Overloaded".into())]
        );
    }

    #[test]
    fn test_tool_blocks_are_ignored() {
        let mut decoder = AnthropicDecoder::default();
        decoder.decode(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t","name":"x","input":{}}}"#,
        );
        let events = decoder.decode(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_body_flattens_system() {
        let adapter = AnthropicAdapter::new(
            reqwest::Client::new(),
            ProviderSettings::defaults(Provider::Anthropic),
        );
        let request = ChatRequest::new(
            "x",
            vec![
                Message::system("Be brief."),
                Message::system("Use markdown."),
                Message::user("Hi"),
            ],
        );
        let body = adapter.body("claude-sonnet-4-5", &request);
        assert_eq!(body["system"], "Be brief.\n\nUse markdown.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 8192);
    }
}
