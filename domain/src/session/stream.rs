//! Normalized streaming events.
//!
//! Every provider adapter decodes its own wire framing into these four event
//! kinds, so everything downstream of the gateway is vendor-agnostic.

use crate::core::usage::Usage;

/// An event in a streaming model response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of answer text; always appended.
    Content(String),
    /// A chunk of "thinking" text. May be a delta or a cumulative snapshot,
    /// see [`merge_reasoning`](super::reasoning::merge_reasoning).
    Reasoning(String),
    /// Usage counters; the latest value wins.
    Usage(Usage),
    /// The vendor signalled a failure mid-stream.
    Error(String),
}

impl StreamEvent {
    /// Returns the text carried by content and reasoning events.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::Content(s) | StreamEvent::Reasoning(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if no further events should be read after this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_))
    }
}
