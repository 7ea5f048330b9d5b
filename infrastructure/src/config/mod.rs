//! Configuration file loading for roundtable
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `ROUNDTABLE_*` environment variables (`ROUNDTABLE_DEBATE__MAX_ROUNDS=5`)
//! 2. `--config <path>` specified file
//! 3. Project root: `./roundtable.toml` or `./.roundtable.toml`
//! 4. Global: `$XDG_CONFIG_HOME/roundtable/config.toml`
//! 5. Default values

mod file_config;
mod issue;
mod loader;

pub use file_config::{
    DEFAULT_BIND, FileConfig, FileContextConfig, FileDebateConfig, FileGatewayConfig,
    FileLoggingConfig, FileModelsConfig, FileProviderConfig, FileProvidersConfig,
    FileStorageConfig, FileStreamConfig,
};
pub use issue::{ConfigIssue, ConfigIssueCode, Severity};
pub use loader::{ConfigError, ConfigLoader, ConfigSources, ENV_PREFIX};
