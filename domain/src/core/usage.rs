//! Token/cost counters reported by providers.

use serde::{Deserialize, Serialize};

/// Usage counters for a single model call. Every field is optional because
/// vendors report different subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Cost in USD when the provider reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    pub fn new(prompt_tokens: Option<u64>, completion_tokens: Option<u64>) -> Self {
        let total_tokens = match (prompt_tokens, completion_tokens) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: Option<f64>) -> Self {
        self.cost = cost;
        self
    }

    /// Overlay the fields present in `other` onto `self`.
    ///
    /// Vendors split usage across several events (input tokens at message
    /// start, output tokens at message end); fields missing from a later
    /// event keep their earlier value.
    pub fn merge(&mut self, other: &Usage) {
        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        } else if let (Some(p), Some(c)) = (self.prompt_tokens, self.completion_tokens) {
            self.total_tokens = Some(p + c);
        }
        if other.cost.is_some() {
            self.cost = other.cost;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.cost.is_none()
    }
}
