//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! Conversion into application types happens in `to_*` methods that return
//! the converted value together with any [`ConfigIssue`]s.

mod debate;
mod models;
mod providers;
mod service;

pub use debate::{FileContextConfig, FileDebateConfig, FileStreamConfig};
pub use models::FileModelsConfig;
pub use providers::{FileProviderConfig, FileProvidersConfig};
pub use service::{DEFAULT_BIND, FileGatewayConfig, FileLoggingConfig, FileStorageConfig};

use super::issue::ConfigIssue;
use roundtable_application::OrchestratorConfig;
use serde::{Deserialize, Serialize};

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Role-based model selection
    pub models: FileModelsConfig,
    /// Round limits, mode, concurrency
    pub debate: FileDebateConfig,
    /// History budget
    pub context: FileContextConfig,
    /// Stall watchdog
    pub stream: FileStreamConfig,
    /// Vendor credentials and endpoints
    pub providers: FileProvidersConfig,
    pub gateway: FileGatewayConfig,
    pub storage: FileStorageConfig,
    pub logging: FileLoggingConfig,
}

impl FileConfig {
    /// Validate the entire configuration, returning all detected issues.
    ///
    /// Every issue has already been resolved by falling back to a default;
    /// callers only need to report them.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        issues.extend(self.models.to_model_roles().1);
        issues.extend(
            self.debate
                .to_debate_params(&self.context, &self.stream)
                .1,
        );
        issues.extend(self.providers.validate());
        issues.extend(self.gateway.bind_addr().1);
        issues
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        let (models, _) = self.models.to_model_roles();
        let (params, _) = self.debate.to_debate_params(&self.context, &self.stream);
        OrchestratorConfig::new(models, params)
    }
}
