use super::{
    AnthropicAdapter, ChatCompletionsAdapter, GeminiAdapter, ProviderAdapter, ProviderSettings,
};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::{
    ChatRequest, GatewayError, LlmGateway, StreamHandle,
};
use roundtable_domain::{ModelTarget, Provider};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// In-process gateway: resolves each model id and forwards to the matching
/// vendor adapter.
pub struct ProviderGateway {
    providers: Vec<Arc<dyn ProviderAdapter>>,
}

impl ProviderGateway {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self { providers }
    }

    /// One adapter per provider, sharing a connection pool.
    pub fn from_settings(settings: BTreeMap<Provider, ProviderSettings>) -> Self {
        let client = reqwest::Client::new();
        let mut providers: Vec<Arc<dyn ProviderAdapter>> = Vec::new();
        for provider in Provider::ALL {
            let settings = settings
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| ProviderSettings::defaults(provider));
            let adapter: Arc<dyn ProviderAdapter> = match provider {
                Provider::OpenRouter => {
                    Arc::new(ChatCompletionsAdapter::openrouter(client.clone(), settings))
                }
                Provider::OpenAi => {
                    Arc::new(ChatCompletionsAdapter::openai(client.clone(), settings))
                }
                Provider::Anthropic => Arc::new(AnthropicAdapter::new(client.clone(), settings)),
                Provider::Gemini => Arc::new(GeminiAdapter::new(client.clone(), settings)),
            };
            providers.push(adapter);
        }
        Self::new(providers)
    }

    fn adapter(&self, provider: Provider) -> Option<&dyn ProviderAdapter> {
        self.providers
            .iter()
            .find(|p| p.provider() == provider)
            .map(|p| p.as_ref())
    }

    /// Whether each provider has a configured key.
    pub fn provider_status(&self) -> BTreeMap<Provider, bool> {
        Provider::ALL
            .into_iter()
            .map(|provider| {
                let configured = self
                    .adapter(provider)
                    .is_some_and(|a| a.api_key().is_some());
                (provider, configured)
            })
            .collect()
    }
}

#[async_trait]
impl LlmGateway for ProviderGateway {
    async fn stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, GatewayError> {
        let target = ModelTarget::parse(&request.model);
        let invalid_key = || GatewayError::InvalidKey {
            provider: target.provider.as_str().to_string(),
            status: 401,
            body: format!("no API key configured for {}", target.provider),
        };
        let adapter = self.adapter(target.provider).ok_or_else(invalid_key)?;

        // A client-supplied key wins over configuration for this call only.
        let api_key = request
            .client_api_key
            .as_deref()
            .or(adapter.api_key())
            .ok_or_else(invalid_key)?;

        debug!(
            provider = %target.provider,
            model = %target.model,
            client_key = request.client_api_key.is_some(),
            "Routing chat request"
        );
        adapter
            .stream(&target.model, &request, api_key, cancel)
            .await
    }
}
