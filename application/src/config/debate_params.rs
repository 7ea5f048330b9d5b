//! Debate parameters: turn loop control.
//!
//! [`DebateParams`] groups the static knobs of
//! [`TurnOrchestrator`](crate::use_cases::orchestrate::TurnOrchestrator).

use roundtable_domain::{ContextBudget, TurnMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stall windows below this are raised to it.
pub const MIN_STALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Turn loop control parameters.
///
/// | Field | Default |
/// |-------|---------|
/// | `max_rounds` | 3 |
/// | `mode` | debate |
/// | `max_concurrency` | 4 |
/// | `generate_titles` | true |
/// | `stall_timeout` | 90 s |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateParams {
    /// Upper bound on debate rounds, including round 1.
    pub max_rounds: u32,
    /// Mode used when a request does not name one.
    pub mode: TurnMode,
    /// Concurrent model calls per round.
    pub max_concurrency: usize,
    /// Generate a title after the first turn.
    pub generate_titles: bool,
    /// Silence allowed on a stream before it is aborted.
    pub stall_timeout: Duration,
    /// History budget for new turns.
    pub context: ContextBudget,
}

impl Default for DebateParams {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            mode: TurnMode::Debate,
            max_concurrency: 4,
            generate_titles: true,
            stall_timeout: Duration::from_secs(90),
            context: ContextBudget::default(),
        }
    }
}

impl DebateParams {
    // ==================== Builder Methods ====================

    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    pub fn with_mode(mut self, mode: TurnMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_generate_titles(mut self, enabled: bool) -> Self {
        self.generate_titles = enabled;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_context(mut self, context: ContextBudget) -> Self {
        self.context = context;
        self
    }

    // ==================== Effective Values ====================

    pub fn effective_max_rounds(&self) -> u32 {
        self.max_rounds.max(1)
    }

    pub fn effective_max_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn effective_stall_timeout(&self) -> Duration {
        self.stall_timeout.max(MIN_STALL_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let params = DebateParams::default();
        assert_eq!(params.max_rounds, 3);
        assert_eq!(params.max_concurrency, 4);
        assert_eq!(params.mode, TurnMode::Debate);
        assert_eq!(params.stall_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_effective_values_clamp() {
        let params = DebateParams::default()
            .with_max_rounds(0)
            .with_max_concurrency(0)
            .with_stall_timeout(Duration::from_secs(2));

        assert_eq!(params.effective_max_rounds(), 1);
        assert_eq!(params.effective_max_concurrency(), 1);
        assert_eq!(params.effective_stall_timeout(), MIN_STALL_TIMEOUT);
    }
}
