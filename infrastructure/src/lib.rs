//! Infrastructure layer for roundtable
//!
//! This crate contains adapters that implement the ports defined in the
//! application layer: vendor provider adapters, the gateway HTTP surface,
//! configuration file loading, the JSON conversation store and the JSONL
//! turn-event logger.

pub mod config;
pub mod http;
pub mod logging;
pub mod persistence;
pub mod providers;

// Re-export commonly used types
pub use config::{ConfigError, ConfigIssue, ConfigLoader, FileConfig};
pub use http::{GatewayState, HttpGatewayClient, ModelCatalog, OpenRouterCatalog};
pub use logging::JsonlTurnLogger;
pub use persistence::JsonConversationStore;
pub use providers::{ProviderGateway, ProviderSettings};
