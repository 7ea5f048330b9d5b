//! Role-based model selection.

use serde::{Deserialize, Serialize};

/// Which models play which role in a turn.
///
/// - **Participants**: answer and debate
/// - **Judge**: convergence checks and ensemble votes
/// - **Synthesizer**: writes the final answer
/// - **Title / Summary**: auxiliary calls, fall back to the judge when unset
///
/// Every entry is an opaque model id (`provider/model`, `provider:model` or bare).
///
/// # Example
///
/// ```
/// use roundtable_application::config::ModelRoles;
///
/// let roles = ModelRoles::default()
///     .with_participants(vec!["anthropic:claude-sonnet-4-5".to_string()])
///     .with_judge("openai:gpt-4o-mini");
///
/// assert_eq!(roles.title_model(), "openai:gpt-4o-mini");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRoles {
    pub participants: Vec<String>,
    pub judge: String,
    pub synthesizer: String,
    pub title: Option<String>,
    pub summary: Option<String>,
}

impl Default for ModelRoles {
    fn default() -> Self {
        Self {
            participants: vec![
                "anthropic/claude-sonnet-4.5".to_string(),
                "openai/gpt-5".to_string(),
                "google/gemini-2.5-pro".to_string(),
            ],
            judge: "anthropic/claude-sonnet-4.5".to_string(),
            synthesizer: "anthropic/claude-sonnet-4.5".to_string(),
            title: None,
            summary: None,
        }
    }
}

impl ModelRoles {
    // ==================== Builder Methods ====================

    pub fn with_participants(mut self, models: Vec<String>) -> Self {
        self.participants = models;
        self
    }

    pub fn with_judge(mut self, model: impl Into<String>) -> Self {
        self.judge = model.into();
        self
    }

    pub fn with_synthesizer(mut self, model: impl Into<String>) -> Self {
        self.synthesizer = model.into();
        self
    }

    // ==================== Accessors ====================

    pub fn title_model(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.judge)
    }

    pub fn summary_model(&self) -> &str {
        self.summary.as_deref().unwrap_or(&self.judge)
    }
}
