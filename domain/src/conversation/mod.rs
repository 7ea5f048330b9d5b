//! Conversation aggregate.
//!
//! ```text
//! Conversation
//! └── Turn (one per user prompt)
//!     ├── Round 1..N
//!     │   └── ModelStream (one per selected model, fixed length)
//!     ├── EnsembleResult (ensemble mode)
//!     ├── Synthesis
//!     └── DebateMetadata
//! ```

pub mod entities;
pub mod metadata;

pub use entities::{
    Attachment, Conversation, ModelStream, Round, Status, Synthesis, Turn, TurnMode,
    WebSearchResult,
};
pub use metadata::{DebateMetadata, TerminationReason};
