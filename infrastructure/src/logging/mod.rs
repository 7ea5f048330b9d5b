//! Logging infrastructure: structured turn-event logging.
//!
//! Provides [`JsonlTurnLogger`], a JSONL file writer that implements
//! the [`TurnLogger`](roundtable_application::TurnLogger) port.

mod jsonl_logger;

pub use jsonl_logger::JsonlTurnLogger;
