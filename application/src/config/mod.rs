//! Application-level configuration.
//!
//! - [`ModelRoles`]: which models answer, judge, synthesize and summarize
//! - [`DebateParams`]: round limits, concurrency, stall window, context budget
//! - [`OrchestratorConfig`]: both, as handed to the orchestrator

pub mod debate_params;
pub mod model_roles;

pub use debate_params::{DebateParams, MIN_STALL_TIMEOUT};
pub use model_roles::ModelRoles;

/// Configuration container for the turn orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    models: ModelRoles,
    params: DebateParams,
    client_api_key: Option<String>,
}

impl OrchestratorConfig {
    pub fn new(models: ModelRoles, params: DebateParams) -> Self {
        Self {
            models,
            params,
            client_api_key: None,
        }
    }

    /// Key forwarded with every request, overriding the gateway's own.
    pub fn with_client_api_key(mut self, key: Option<String>) -> Self {
        self.client_api_key = key;
        self
    }

    pub fn models(&self) -> &ModelRoles {
        &self.models
    }

    pub fn params(&self) -> &DebateParams {
        &self.params
    }

    pub fn client_api_key(&self) -> Option<&str> {
        self.client_api_key.as_deref()
    }
}
