//! Turn event stream
//!
//! The orchestrator publishes an ordered sequence of state transitions on a
//! `tokio::sync::broadcast` channel. Renderers, progress bars and the JSONL
//! logger subscribe independently; none of them can block a turn.

use roundtable_domain::{
    ConvergenceCheck, DebateMetadata, EnsembleResult, ErrorKind, Status, TurnMode,
};
use serde::Serialize;

/// A state transition of the active turn.
///
/// Indices are 0-based positions into `turn.rounds` and `round.streams`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TurnStarted {
        conversation_id: String,
        turn_id: String,
        mode: TurnMode,
        models: Vec<String>,
    },
    RoundStarted {
        round_index: usize,
        round_number: u32,
        label: String,
    },
    StreamStarted {
        round_index: usize,
        stream_index: usize,
        model: String,
    },
    StreamDelta {
        round_index: usize,
        stream_index: usize,
        delta: String,
        /// Reasoning text rather than answer text
        reasoning: bool,
    },
    StreamFinished {
        round_index: usize,
        stream_index: usize,
        model: String,
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        carried_forward: bool,
    },
    RoundFinished {
        round_index: usize,
        status: Status,
        completed: usize,
        total: usize,
    },
    ConvergenceChecked {
        round_index: usize,
        check: ConvergenceCheck,
    },
    EnsembleAnalyzing {
        judge: String,
    },
    EnsembleAnalyzed {
        result: EnsembleResult,
    },
    SynthesisStarted {
        model: String,
    },
    SynthesisDelta {
        delta: String,
    },
    SynthesisFinished {
        status: Status,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    TurnFinished {
        turn_id: String,
        metadata: DebateMetadata,
    },
    TurnFailed {
        turn_id: String,
        kind: ErrorKind,
        message: String,
    },
    TitleUpdated {
        title: String,
        description: String,
    },
    SummaryUpdated {
        summarized_turn_count: usize,
    },
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            TurnEvent::TurnStarted { .. } => "turn_started",
            TurnEvent::RoundStarted { .. } => "round_started",
            TurnEvent::StreamStarted { .. } => "stream_started",
            TurnEvent::StreamDelta { .. } => "stream_delta",
            TurnEvent::StreamFinished { .. } => "stream_finished",
            TurnEvent::RoundFinished { .. } => "round_finished",
            TurnEvent::ConvergenceChecked { .. } => "convergence_checked",
            TurnEvent::EnsembleAnalyzing { .. } => "ensemble_analyzing",
            TurnEvent::EnsembleAnalyzed { .. } => "ensemble_analyzed",
            TurnEvent::SynthesisStarted { .. } => "synthesis_started",
            TurnEvent::SynthesisDelta { .. } => "synthesis_delta",
            TurnEvent::SynthesisFinished { .. } => "synthesis_finished",
            TurnEvent::TurnFinished { .. } => "turn_finished",
            TurnEvent::TurnFailed { .. } => "turn_failed",
            TurnEvent::TitleUpdated { .. } => "title_updated",
            TurnEvent::SummaryUpdated { .. } => "summary_updated",
        }
    }

    /// Streaming deltas are high-volume and usually excluded from durable logs.
    pub fn is_delta(&self) -> bool {
        matches!(
            self,
            TurnEvent::StreamDelta { .. } | TurnEvent::SynthesisDelta { .. }
        )
    }

    /// The turn will publish nothing further (title/summary updates may still follow).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TurnEvent::TurnFinished { .. } | TurnEvent::TurnFailed { .. }
        )
    }
}
