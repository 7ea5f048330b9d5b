//! Bounded conversational context.
//!
//! - [`ContextBudget`] - estimated-token budget knobs
//! - [`build_history`] - project prior turns into a bounded message window
//! - [`turn_digest`] - compact assistant-side record of a turn, also fed to the summarizer

pub mod budget;
pub mod history;

pub use budget::ContextBudget;
pub use history::{HistoryWindow, build_history, turn_digest};
