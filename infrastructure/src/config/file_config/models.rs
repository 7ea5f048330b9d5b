//! Role-based model configuration from TOML (`[models]` section)

use crate::config::issue::ConfigIssue;
use roundtable_application::ModelRoles;
use serde::{Deserialize, Serialize};

/// Role-based model configuration from TOML
///
/// # Example
///
/// ```toml
/// [models]
/// participants = ["anthropic:claude-sonnet-4-5", "openai:gpt-5", "google/gemini-2.5-pro"]
/// judge = "openai:gpt-4o-mini"       # convergence checks, ensemble votes
/// synthesizer = "anthropic:claude-sonnet-4-5"
/// title = "openai:gpt-4o-mini"       # falls back to the judge
/// summary = "openai:gpt-4o-mini"     # falls back to the judge
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileModelsConfig {
    pub participants: Option<Vec<String>>,
    pub judge: Option<String>,
    pub synthesizer: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

impl FileModelsConfig {
    fn parse_single(field: &str, value: Option<&String>) -> (Option<String>, Vec<ConfigIssue>) {
        match value {
            None => (None, vec![]),
            Some(s) if s.trim().is_empty() => {
                (None, vec![ConfigIssue::empty_model(&format!("models.{}", field))])
            }
            Some(s) => (Some(s.trim().to_string()), vec![]),
        }
    }

    /// Convert to [`ModelRoles`], skipping empty names.
    ///
    /// An empty participant list keeps the built-in participants.
    pub fn to_model_roles(&self) -> (ModelRoles, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let mut roles = ModelRoles::default();

        if let Some(list) = &self.participants {
            let mut participants = Vec::new();
            for name in list {
                if name.trim().is_empty() {
                    issues.push(ConfigIssue::empty_model("models.participants"));
                } else {
                    participants.push(name.trim().to_string());
                }
            }
            if participants.is_empty() {
                issues.push(ConfigIssue::constraint(
                    "models.participants",
                    "models.participants: no usable models, using the built-in set",
                ));
            } else {
                roles = roles.with_participants(participants);
            }
        }

        let (judge, judge_issues) = Self::parse_single("judge", self.judge.as_ref());
        issues.extend(judge_issues);
        if let Some(judge) = judge {
            roles = roles.with_judge(judge);
        }

        let (synthesizer, synth_issues) =
            Self::parse_single("synthesizer", self.synthesizer.as_ref());
        issues.extend(synth_issues);
        if let Some(synthesizer) = synthesizer {
            roles = roles.with_synthesizer(synthesizer);
        }

        let (title, title_issues) = Self::parse_single("title", self.title.as_ref());
        issues.extend(title_issues);
        roles.title = title;

        let (summary, summary_issues) = Self::parse_single("summary", self.summary.as_ref());
        issues.extend(summary_issues);
        roles.summary = summary;

        (roles, issues)
    }
}
