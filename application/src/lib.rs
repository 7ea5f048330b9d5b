//! Application layer for roundtable
//!
//! This crate contains the turn orchestrator, port definitions, and
//! application configuration. It depends only on the domain layer.

pub mod config;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use config::{DebateParams, MIN_STALL_TIMEOUT, ModelRoles, OrchestratorConfig};
pub use ports::{
    conversation_store::{
        ConversationStore, ConversationSummary, InMemoryConversationStore, StoreError,
    },
    llm_gateway::{ChatRequest, Completion, GatewayError, LlmGateway, StreamHandle},
    turn_events::TurnEvent,
    turn_logger::{NoTurnLogger, TurnLogger, spawn_turn_logger},
};
pub use use_cases::{
    Checkpoint, OrchestratorError, StreamFailure, StreamOutcome, TurnOrchestrator, TurnRequest,
    read_stream,
};
