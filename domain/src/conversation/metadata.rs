//! Debate bookkeeping attached to every turn.

use serde::{Deserialize, Serialize};

/// Why a turn stopped issuing model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Converged,
    MaxRoundsReached,
    Cancelled,
    AllModelsFailed,
    ParallelOnly,
    EnsembleVote,
    /// Turn migrated from the flat pre-round storage shape.
    LegacySingleRound,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::Converged => "converged",
            TerminationReason::MaxRoundsReached => "max_rounds_reached",
            TerminationReason::Cancelled => "cancelled",
            TerminationReason::AllModelsFailed => "all_models_failed",
            TerminationReason::ParallelOnly => "parallel_only",
            TerminationReason::EnsembleVote => "ensemble_vote",
            TerminationReason::LegacySingleRound => "legacy_single_round",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebateMetadata {
    pub total_rounds: u32,
    pub converged: bool,
    /// `None` while the turn is still running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
}

impl DebateMetadata {
    pub fn terminated(total_rounds: u32, reason: TerminationReason) -> Self {
        Self {
            total_rounds,
            converged: reason == TerminationReason::Converged,
            termination_reason: Some(reason),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.termination_reason.is_some()
    }
}
