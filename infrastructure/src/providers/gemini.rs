//! Google Gemini `streamGenerateContent` (SSE mode).

use super::transport::{EventDecoder, ended_early, open_stream, parse_payload};
use super::{ProviderAdapter, ProviderSettings};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{ChatRequest, GatewayError, StreamHandle};
use roundtable_domain::{Provider, Role, StreamEvent, Usage, flatten_system};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct GeminiAdapter {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    fn url(&self, model: &str) -> String {
        self.settings
            .endpoint(&format!("models/{}:streamGenerateContent?alt=sse", model))
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let (system, turns) = flatten_system(&request.messages);
        let contents: Vec<Value> = turns
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": request.max_tokens.unwrap_or(self.settings.max_tokens),
                "thinkingConfig": { "includeThoughts": true },
            },
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn provider(&self) -> Provider {
        Provider::Gemini
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
        debug!("gemini streamGenerateContent for {}", model);
        let http = self
            .client
            .post(self.url(model))
            .header("x-goog-api-key", api_key)
            .json(&self.body(request));
        open_stream("gemini", http, GeminiDecoder::default(), cancel).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    thoughts_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

#[derive(Deserialize)]
struct WireError {
    code: Option<u16>,
    message: Option<String>,
}

/// Every chunk carries cumulative usage; only the `finishReason` is tracked.
#[derive(Default)]
pub struct GeminiDecoder {
    finished: bool,
}

impl EventDecoder for GeminiDecoder {
    fn decode(&mut self, payload: &str) -> Vec<StreamEvent> {
        let Some(chunk) = parse_payload::<Chunk>(payload) else {
            return Vec::new();
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            let message = error.message.unwrap_or_else(|| "unknown error".into());
            let message = match error.code {
                Some(code) => format!("{} ({})", message, code),
                None => message,
            };
            return vec![StreamEvent::Error(message)];
        }

        let mut events = Vec::new();
        let candidate = chunk.candidates.into_iter().next();
        if candidate.as_ref().is_some_and(|c| c.finish_reason.is_some()) {
            self.finished = true;
        }
        let parts = candidate
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();
        for part in parts {
            let Some(text) = part.text.filter(|t| !t.is_empty()) else {
                continue;
            };
            events.push(if part.thought {
                StreamEvent::Reasoning(text)
            } else {
                StreamEvent::Content(text)
            });
        }

        if let Some(meta) = chunk.usage_metadata {
            // Thinking tokens are billed as output.
            let completion = match (meta.candidates_token_count, meta.thoughts_token_count) {
                (Some(c), Some(t)) => Some(c + t),
                (c, t) => c.or(t),
            };
            let mut usage = Usage::new(meta.prompt_token_count, completion);
            if meta.total_token_count.is_some() {
                usage.total_tokens = meta.total_token_count;
            }
            events.push(StreamEvent::Usage(usage));
        }
        events
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            Vec::new()
        } else {
            vec![ended_early("gemini", "finishReason")]
        }
    }
}
