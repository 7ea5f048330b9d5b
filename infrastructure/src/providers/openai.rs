//! OpenAI-style chat completions, used by OpenRouter and OpenAI.

use super::transport::{EventDecoder, ended_early, open_stream, parse_payload};
use super::{ProviderAdapter, ProviderSettings};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{ChatRequest, GatewayError, StreamHandle};
use roundtable_domain::{Message, Provider, StreamEvent, Usage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ChatCompletionsAdapter {
    provider: Provider,
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl ChatCompletionsAdapter {
    pub fn new(provider: Provider, client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self {
            provider,
            client,
            settings,
        }
    }

    pub fn openrouter(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self::new(Provider::OpenRouter, client, settings)
    }

    pub fn openai(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self::new(Provider::OpenAi, client, settings)
    }

    fn body(&self, model: &str, request: &ChatRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.settings.max_tokens);
        let messages: Vec<WireMessage<'_>> = request.messages.iter().map(WireMessage::from).collect();
        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        match self.provider {
            // Reasoning models reject `max_tokens` on the OpenAI API.
            Provider::OpenAi => body["max_completion_tokens"] = json!(max_tokens),
            _ => {
                body["max_tokens"] = json!(max_tokens);
                body["usage"] = json!({ "include": true });
            }
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for ChatCompletionsAdapter {
    fn provider(&self) -> Provider {
        self.provider
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
        debug!("{} chat completion for {}", self.provider, model);
        let http = self
            .client
            .post(self.settings.endpoint("chat/completions"))
            .bearer_auth(api_key)
            .json(&self.body(model, request));
        open_stream(
            self.provider.as_str(),
            http,
            ChatCompletionsDecoder::default(),
            cancel,
        )
        .await
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
        }
    }
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
    /// OpenRouter
    reasoning: Option<String>,
    /// DeepSeek-style upstreams
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
    cost: Option<f64>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<Value>,
}

/// Decodes `choices[0].delta` chunks.
///
/// A stream is finished by `[DONE]` or a `finish_reason`.
#[derive(Default)]
pub struct ChatCompletionsDecoder {
    finished: bool,
}

impl EventDecoder for ChatCompletionsDecoder {
    fn decode(&mut self, payload: &str) -> Vec<StreamEvent> {
        let Some(chunk) = parse_payload::<Chunk>(payload) else {
            return Vec::new();
        };

        if let Some(error) = chunk.error {
            self.finished = true;
            let message = match (error.message, error.code) {
                (Some(message), Some(code)) => format!("{} ({})", message, code),
                (Some(message), None) => message,
                (None, code) => format!("upstream error {}", code.unwrap_or(Value::Null)),
            };
            return vec![StreamEvent::Error(message)];
        }

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if choice.finish_reason.is_some() {
                self.finished = true;
            }
            let delta = choice.delta;
            if let Some(reasoning) = delta
                .reasoning
                .or(delta.reasoning_content)
                .filter(|r| !r.is_empty())
            {
                events.push(StreamEvent::Reasoning(reasoning));
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                events.push(StreamEvent::Content(content));
            }
        }
        if let Some(usage) = chunk.usage {
            let mut normalized =
                Usage::new(usage.prompt_tokens, usage.completion_tokens).with_cost(usage.cost);
            if usage.total_tokens.is_some() {
                normalized.total_tokens = usage.total_tokens;
            }
            events.push(StreamEvent::Usage(normalized));
        }
        events
    }

    fn done_sentinel(&mut self) {
        self.finished = true;
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            Vec::new()
        } else {
            vec![ended_early("chat completions", "[DONE]")]
        }
    }
}
