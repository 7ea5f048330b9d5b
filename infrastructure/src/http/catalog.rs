//! Aggregator model catalog with an in-memory TTL cache.

use crate::providers::ProviderSettings;
use crate::providers::transport::{error_body, send};
use async_trait::async_trait;
use roundtable_application::ports::llm_gateway::GatewayError;
use roundtable_domain::util::excerpt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(600);
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

/// One catalog entry. Fields beyond these pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelInfo {
    /// Vendor segment of an aggregator id (`anthropic` in `anthropic/claude-3`).
    pub fn vendor(&self) -> &str {
        self.id.split_once('/').map(|(v, _)| v).unwrap_or("")
    }
}

/// Where the catalog comes from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ModelInfo>, GatewayError>;
}

/// `GET {base}/models` on the aggregator.
pub struct OpenRouterCatalog {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl OpenRouterCatalog {
    pub fn new(client: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }
}

#[derive(Deserialize)]
struct CatalogResponse {
    data: Vec<ModelInfo>,
}

#[async_trait]
impl CatalogSource for OpenRouterCatalog {
    async fn fetch(&self) -> Result<Vec<ModelInfo>, GatewayError> {
        let cancel = CancellationToken::new();
        let mut request = self.client.get(self.settings.endpoint("models"));
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }
        let response = send(request, &cancel).await?;
        let status = response.status();
        if !status.is_success() {
            let body = error_body(response, &cancel).await?;
            return Err(GatewayError::from_status(
                "openrouter",
                status.as_u16(),
                excerpt(&body, 1_000),
            ));
        }
        let parsed: CatalogResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(format!("catalog body: {}", e)))?;
        Ok(parsed.data)
    }
}

/// Caches the source's list for `ttl`.
///
/// A failed refresh serves the stale list when there is one.
pub struct ModelCatalog {
    source: Arc<dyn CatalogSource>,
    ttl: Duration,
    cache: Mutex<Option<(Instant, Arc<Vec<ModelInfo>>)>>,
}

impl ModelCatalog {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub async fn models(&self) -> Result<Arc<Vec<ModelInfo>>, GatewayError> {
        let mut cache = self.cache.lock().await;
        if let Some((fetched_at, models)) = cache.as_ref()
            && fetched_at.elapsed() < self.ttl
        {
            return Ok(models.clone());
        }

        match self.source.fetch().await {
            Ok(models) => {
                debug!("Model catalog refreshed: {} entries", models.len());
                let models = Arc::new(models);
                *cache = Some((Instant::now(), models.clone()));
                Ok(models)
            }
            Err(e) => match cache.as_ref() {
                Some((_, stale)) => {
                    warn!("Model catalog refresh failed, serving stale list: {}", e);
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}

/// `GET /models/search` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub provider: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub data: Vec<ModelInfo>,
    /// Matches before paging.
    pub total: usize,
}

/// Filter by text and vendor, then page.
pub fn search_models(models: &[ModelInfo], query: &SearchQuery) -> SearchPage {
    let needle = query
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let vendor = query
        .provider
        .as_deref()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty());

    let matches: Vec<&ModelInfo> = models
        .iter()
        .filter(|m| {
            vendor
                .as_deref()
                .is_none_or(|v| m.vendor().to_lowercase() == v)
        })
        .filter(|m| {
            needle.as_deref().is_none_or(|n| {
                m.id.to_lowercase().contains(n)
                    || m.name.to_lowercase().contains(n)
                    || m.description.to_lowercase().contains(n)
            })
        })
        .collect();

    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    SearchPage {
        total: matches.len(),
        data: matches
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect(),
    }
}
