//! Use cases
//!
//! - [`orchestrate`]: runs turns through debate, ensemble or parallel mode
//! - [`stream_reader`]: drains a gateway stream under a stall watchdog

pub mod orchestrate;
pub mod stream_reader;

pub use orchestrate::{Checkpoint, OrchestratorError, TurnOrchestrator, TurnRequest};
pub use stream_reader::{StreamFailure, StreamOutcome, read_stream};
