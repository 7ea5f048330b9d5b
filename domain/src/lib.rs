//! Domain layer for roundtable
//!
//! This crate contains the core entities and decision logic. It has no
//! dependencies on network, storage or presentation concerns.
//!
//! # Core Concepts
//!
//! ## Conversation
//!
//! A [`Conversation`] is an ordered list of [`Turn`]s. Each turn runs in one
//! of three modes:
//!
//! - **Debate**: rounds of answers and rebuttals until the judge sees
//!   convergence or the round limit is hit, then a synthesis
//! - **Ensemble**: one round of independent answers, a judge vote, then a synthesis
//! - **Parallel**: one round of independent answers only
//!
//! ## Model targets
//!
//! An opaque model id resolves to a [`ModelTarget`] (provider + native model
//! name). Resolution is total: unknown ids go to the aggregator.
//!
//! ## Context
//!
//! Prior turns are projected into a bounded [`HistoryWindow`]; older turns
//! are folded into a running summary.

pub mod context;
pub mod conversation;
pub mod core;
pub mod prompt;
pub mod session;
pub mod util;
pub mod verdict;

// Re-export commonly used types
pub use context::{ContextBudget, HistoryWindow, build_history, turn_digest};
pub use conversation::{
    Attachment, Conversation, DebateMetadata, ModelStream, Round, Status, Synthesis,
    TerminationReason, Turn, TurnMode, WebSearchResult,
};
pub use core::{
    error::{DomainError, ErrorKind},
    model::{ModelTarget, Provider},
    usage::Usage,
};
pub use prompt::PromptTemplate;
pub use session::{
    entities::{Message, Role, flatten_system},
    reasoning::merge_reasoning,
    stream::StreamEvent,
};
pub use verdict::{
    ConvergenceCheck, EnsembleResult, EnsembleStatus, NEUTRAL_CONFIDENCE, Outlier, VoteAnalysis,
    parse_convergence_response, parse_title_response, parse_vote_analysis,
};
