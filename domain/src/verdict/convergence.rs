//! Convergence check between debate rounds.

use serde::{Deserialize, Serialize};

/// Judge verdict on whether the debaters now agree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceCheck {
    /// `None` while the check is pending.
    pub converged: Option<bool>,
    /// 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub agreements: Vec<String>,
    #[serde(default)]
    pub disagreements: Vec<String>,
    #[serde(default)]
    pub raw_response: String,
}

impl ConvergenceCheck {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.converged.is_none()
    }

    pub fn has_converged(&self) -> bool {
        self.converged == Some(true)
    }

    /// Safe default used when the judge reply cannot be used.
    pub fn not_converged(reason: impl Into<String>, raw_response: impl Into<String>) -> Self {
        Self {
            converged: Some(false),
            confidence: None,
            reason: reason.into(),
            agreements: Vec::new(),
            disagreements: Vec::new(),
            raw_response: raw_response.into(),
        }
    }
}
