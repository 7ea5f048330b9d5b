//! Ensemble vote: judge-weighted analysis over independent answers.

use crate::core::usage::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence substituted when the judge gives no usable answer.
pub const NEUTRAL_CONFIDENCE: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnsembleStatus {
    Analyzing,
    Complete,
    Error,
}

/// A model whose answer the judge flagged as diverging from the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub model: String,
    #[serde(default)]
    pub reason: String,
}

/// Parsed judge output, before it is attached to a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct VoteAnalysis {
    pub confidence: u8,
    pub outliers: Vec<Outlier>,
    pub agreement_areas: Vec<String>,
    pub disagreement_areas: Vec<String>,
    /// model → weight in [0, 1], only for models that answered.
    pub model_weights: BTreeMap<String, f64>,
}

impl VoteAnalysis {
    pub fn neutral() -> Self {
        Self {
            confidence: NEUTRAL_CONFIDENCE,
            outliers: Vec::new(),
            agreement_areas: Vec::new(),
            disagreement_areas: Vec::new(),
            model_weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub status: EnsembleStatus,
    pub confidence: u8,
    #[serde(default)]
    pub outliers: Vec<Outlier>,
    #[serde(default)]
    pub agreement_areas: Vec<String>,
    #[serde(default)]
    pub disagreement_areas: Vec<String>,
    #[serde(default)]
    pub model_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub raw_analysis: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnsembleResult {
    pub fn analyzing() -> Self {
        Self::from_analysis(
            EnsembleStatus::Analyzing,
            VoteAnalysis::neutral(),
            String::new(),
        )
    }

    pub fn from_analysis(status: EnsembleStatus, analysis: VoteAnalysis, raw: String) -> Self {
        Self {
            status,
            confidence: analysis.confidence,
            outliers: analysis.outliers,
            agreement_areas: analysis.agreement_areas,
            disagreement_areas: analysis.disagreement_areas,
            model_weights: analysis.model_weights,
            raw_analysis: raw,
            usage: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Judge call failed: neutral defaults, status `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        let mut result =
            Self::from_analysis(EnsembleStatus::Error, VoteAnalysis::neutral(), String::new());
        result.error = Some(error.into());
        result
    }

    pub fn with_timing(mut self, usage: Option<Usage>, duration_ms: u64) -> Self {
        self.usage = usage;
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn is_outlier(&self, model: &str) -> bool {
        self.outliers.iter().any(|o| o.model == model)
    }
}
