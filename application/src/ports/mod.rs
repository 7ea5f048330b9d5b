//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that infrastructure adapters must implement.

pub mod conversation_store;
pub mod llm_gateway;
pub mod turn_events;
pub mod turn_logger;
