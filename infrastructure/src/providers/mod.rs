//! Vendor adapters behind the [`LlmGateway`](roundtable_application::LlmGateway) port.
//!
//! | Adapter | Wire format |
//! |---------|-------------|
//! | [`ChatCompletionsAdapter`] | OpenAI-style `choices[].delta` (OpenRouter, OpenAI) |
//! | [`AnthropicAdapter`] | Messages API, content-block-indexed deltas |
//! | [`GeminiAdapter`] | `streamGenerateContent` candidate arrays |
//!
//! [`ProviderGateway`] resolves each model id to an adapter.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod routing;
pub mod sse;
pub mod transport;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::ChatCompletionsAdapter;
pub use routing::ProviderGateway;

use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{ChatRequest, GatewayError, StreamHandle};
use roundtable_domain::Provider;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_TOKENS: u32 = 8192;
pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// Resolved connection settings for one vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
    /// Anthropic only
    pub api_version: Option<String>,
}

impl ProviderSettings {
    /// Built-in endpoint and limits, no key.
    pub fn defaults(provider: Provider) -> Self {
        let (base_url, api_version) = match provider {
            Provider::OpenRouter => ("https://openrouter.ai/api/v1", None),
            Provider::OpenAi => ("https://api.openai.com/v1", None),
            Provider::Anthropic => (
                "https://api.anthropic.com/v1",
                Some(ANTHROPIC_API_VERSION.to_string()),
            ),
            Provider::Gemini => ("https://generativelanguage.googleapis.com/v1beta", None),
        };
        Self {
            api_key: None,
            base_url: base_url.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            api_version,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.trim().is_empty());
        self
    }

    /// `base_url` joined with `path`, tolerating a trailing slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Environment variable conventionally holding a provider's key.
pub fn default_key_env(provider: Provider) -> &'static str {
    match provider {
        Provider::OpenRouter => "OPENROUTER_API_KEY",
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Gemini => "GEMINI_API_KEY",
    }
}

/// One vendor's chat endpoint.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Key from configuration, if any.
    fn api_key(&self) -> Option<&str>;

    /// Start a streaming call for `model` (the provider-native name).
    async fn stream(
        &self,
        model: &str,
        request: &ChatRequest,
        api_key: &str,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError>;
}
