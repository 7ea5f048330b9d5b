//! Turn loop configuration from TOML (`[debate]`, `[context]` and `[stream]` sections)

use crate::config::issue::{ConfigIssue, ConfigIssueCode, Severity};
use roundtable_application::{DebateParams, MIN_STALL_TIMEOUT};
use roundtable_domain::{ContextBudget, TurnMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// # Example
///
/// ```toml
/// [debate]
/// max_rounds = 3
/// mode = "debate"          # debate | ensemble | parallel
/// max_concurrency = 4
/// generate_titles = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDebateConfig {
    pub max_rounds: u32,
    pub mode: String,
    pub max_concurrency: usize,
    pub generate_titles: bool,
}

impl Default for FileDebateConfig {
    fn default() -> Self {
        let params = DebateParams::default();
        Self {
            max_rounds: params.max_rounds,
            mode: params.mode.as_str().to_string(),
            max_concurrency: params.max_concurrency,
            generate_titles: params.generate_titles,
        }
    }
}

/// Estimated-token history budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileContextConfig {
    pub threshold_tokens: usize,
    pub chars_per_token: usize,
    pub message_overhead_tokens: usize,
    pub position_excerpt_chars: usize,
}

impl Default for FileContextConfig {
    fn default() -> Self {
        let budget = ContextBudget::default();
        Self {
            threshold_tokens: budget.threshold_tokens(),
            chars_per_token: budget.chars_per_token(),
            message_overhead_tokens: budget.message_overhead_tokens(),
            position_excerpt_chars: budget.position_excerpt_chars(),
        }
    }
}

impl FileContextConfig {
    /// Convert to domain `ContextBudget`, falling back to the default when
    /// any value violates its constraint.
    pub fn to_context_budget(&self) -> (ContextBudget, Vec<ConfigIssue>) {
        let budget = ContextBudget::new(
            self.threshold_tokens,
            self.chars_per_token,
            self.message_overhead_tokens,
            self.position_excerpt_chars,
        );
        match budget.validate() {
            Ok(()) => (budget, vec![]),
            Err(e) => (
                ContextBudget::default(),
                vec![ConfigIssue::constraint("context", e.to_string())],
            ),
        }
    }
}

/// Upstream stream watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStreamConfig {
    pub stall_timeout_secs: u64,
}

impl Default for FileStreamConfig {
    fn default() -> Self {
        Self {
            stall_timeout_secs: DebateParams::default().stall_timeout.as_secs(),
        }
    }
}

impl FileDebateConfig {
    /// Build [`DebateParams`] from this section plus `[context]` and `[stream]`.
    pub fn to_debate_params(
        &self,
        context: &FileContextConfig,
        stream: &FileStreamConfig,
    ) -> (DebateParams, Vec<ConfigIssue>) {
        let defaults = DebateParams::default();
        let mut issues = Vec::new();

        let max_rounds = if self.max_rounds == 0 {
            issues.push(ConfigIssue::constraint(
                "debate.max_rounds",
                format!(
                    "debate.max_rounds must be at least 1, using {}",
                    defaults.max_rounds
                ),
            ));
            defaults.max_rounds
        } else {
            self.max_rounds
        };

        let max_concurrency = if self.max_concurrency == 0 {
            issues.push(ConfigIssue::constraint(
                "debate.max_concurrency",
                format!(
                    "debate.max_concurrency must be at least 1, using {}",
                    defaults.max_concurrency
                ),
            ));
            defaults.max_concurrency
        } else {
            self.max_concurrency
        };

        let mode = match self.mode.parse::<TurnMode>() {
            Ok(mode) => mode,
            Err(_) => {
                issues.push(ConfigIssue {
                    severity: Severity::Warning,
                    code: ConfigIssueCode::InvalidEnumValue {
                        field: "debate.mode".to_string(),
                        value: self.mode.clone(),
                        valid_values: vec![
                            "debate".to_string(),
                            "ensemble".to_string(),
                            "parallel".to_string(),
                        ],
                    },
                    message: format!(
                        "debate.mode: unknown value '{}', falling back to '{}'",
                        self.mode, defaults.mode
                    ),
                });
                defaults.mode
            }
        };

        let requested = Duration::from_secs(stream.stall_timeout_secs);
        let stall_timeout = if requested < MIN_STALL_TIMEOUT {
            issues.push(ConfigIssue::constraint(
                "stream.stall_timeout_secs",
                format!(
                    "stream.stall_timeout_secs: {} is below the {}s floor",
                    stream.stall_timeout_secs,
                    MIN_STALL_TIMEOUT.as_secs()
                ),
            ));
            MIN_STALL_TIMEOUT
        } else {
            requested
        };

        let (budget, budget_issues) = context.to_context_budget();
        issues.extend(budget_issues);

        let params = defaults
            .with_max_rounds(max_rounds)
            .with_mode(mode)
            .with_max_concurrency(max_concurrency)
            .with_generate_titles(self.generate_titles)
            .with_stall_timeout(stall_timeout)
            .with_context(budget);
        (params, issues)
    }
}
