//! Conversation aggregate: turns, rounds and per-model streams.

use crate::conversation::metadata::{DebateMetadata, TerminationReason};
use crate::core::usage::Usage;
use crate::verdict::convergence::ConvergenceCheck;
use crate::verdict::ensemble::EnsembleResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle shared by streams, rounds and synthesis.
///
/// Moves `Pending → Streaming → {Complete, Error}`; only a retry resets to `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Streaming,
    Complete,
    Error,
}

impl Status {
    pub fn is_settled(&self) -> bool {
        matches!(self, Status::Complete | Status::Error)
    }
}

/// One model's single call within a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStream {
    pub model: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Content was carried from the previous round after this call failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub carried_forward: bool,
}

impl ModelStream {
    pub fn pending(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            status: Status::Pending,
            error: None,
            usage: None,
            duration_ms: None,
            reasoning: None,
            carried_forward: false,
        }
    }

    pub fn begin(&mut self) {
        self.status = Status::Streaming;
    }

    pub fn complete(
        &mut self,
        content: String,
        reasoning: Option<String>,
        usage: Option<Usage>,
        duration_ms: u64,
    ) {
        self.content = content;
        self.reasoning = reasoning.filter(|r| !r.is_empty());
        self.usage = usage;
        self.duration_ms = Some(duration_ms);
        self.error = None;
        self.status = Status::Complete;
    }

    /// Settle as failed, keeping whatever partial text arrived.
    pub fn fail(&mut self, error: impl Into<String>, partial: String, duration_ms: Option<u64>) {
        self.content = partial;
        self.error = Some(error.into());
        self.duration_ms = duration_ms;
        self.status = Status::Error;
    }

    pub fn reset(&mut self) {
        *self = Self::pending(std::mem::take(&mut self.model));
    }

    /// Replace a failed stream's content with the model's previous-round position.
    pub fn carry_forward(&mut self, previous: &ModelStream) {
        let reason = self.error.take().unwrap_or_else(|| "request failed".to_string());
        self.content = previous.content.clone();
        self.error = Some(format!(
            "{reason}; showing this model's position from the previous round"
        ));
        self.carried_forward = true;
    }

    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }

    /// Usable as this model's position: completed or carried-forward text.
    pub fn has_position(&self) -> bool {
        !self.content.trim().is_empty() && (self.is_complete() || self.carried_forward)
    }
}

/// One synchronized batch of per-model calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub round_number: u32,
    pub label: String,
    #[serde(default)]
    pub status: Status,
    /// Fixed length: one entry per selected model, order stable.
    pub streams: Vec<ModelStream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_check: Option<ConvergenceCheck>,
}

impl Round {
    pub fn new(round_number: u32, label: impl Into<String>, models: &[String]) -> Self {
        Self {
            round_number,
            label: label.into(),
            status: Status::Pending,
            streams: models.iter().map(ModelStream::pending).collect(),
            convergence_check: None,
        }
    }

    /// Streams that count as a model position, with their indices.
    pub fn positions(&self) -> impl Iterator<Item = (usize, &ModelStream)> {
        self.streams.iter().enumerate().filter(|(_, s)| s.has_position())
    }

    pub fn completed_count(&self) -> usize {
        self.streams.iter().filter(|s| s.is_complete()).count()
    }

    pub fn models(&self) -> Vec<String> {
        self.streams.iter().map(|s| s.model.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synthesis {
    pub model: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Synthesis {
    pub fn pending(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            status: Status::Pending,
            error: None,
            usage: None,
            duration_ms: None,
            completed_at: None,
        }
    }
}

/// How a turn is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnMode {
    #[default]
    Debate,
    #[serde(alias = "direct")]
    Ensemble,
    Parallel,
}

impl TurnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnMode::Debate => "debate",
            TurnMode::Ensemble => "ensemble",
            TurnMode::Parallel => "parallel",
        }
    }
}

impl std::fmt::Display for TurnMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TurnMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debate" => Ok(TurnMode::Debate),
            "ensemble" | "direct" => Ok(TurnMode::Ensemble),
            "parallel" => Ok(TurnMode::Parallel),
            other => Err(format!(
                "unknown mode '{other}' (expected debate, ensemble or parallel)"
            )),
        }
    }
}

/// Attachment whose text was extracted before reaching the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchResult {
    pub query: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub user_prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mode: TurnMode,
    #[serde(default)]
    pub rounds: Vec<Round>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Synthesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensemble_result: Option<EnsembleResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_search: Option<WebSearchResult>,
    #[serde(default)]
    pub debate_metadata: DebateMetadata,
    /// Round limit for this turn when it differs from the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(user_prompt: impl Into<String>, mode: TurnMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_prompt: user_prompt.into(),
            attachments: Vec::new(),
            mode,
            rounds: Vec::new(),
            synthesis: None,
            ensemble_result: None,
            web_search: None,
            debate_metadata: DebateMetadata::default(),
            max_rounds: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Last round that has at least one position.
    pub fn final_round(&self) -> Option<&Round> {
        self.rounds.iter().rev().find(|r| r.positions().next().is_some())
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.debate_metadata.termination_reason
    }

    /// Synthesis text when complete, otherwise `None`.
    pub fn answer(&self) -> Option<&str> {
        self.synthesis
            .as_ref()
            .filter(|s| s.status == Status::Complete)
            .map(|s| s.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub turns: Vec<Turn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_summary: Option<String>,
    /// Leading turns already folded into `running_summary`.
    #[serde(default)]
    pub summarized_turn_count: usize,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: String::new(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            running_summary: None,
            summarized_turn_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn active_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn active_turn_mut(&mut self) -> Option<&mut Turn> {
        self.turns.last_mut()
    }

    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
