//! Estimated-token budget for prior-turn history.
//!
//! Accounting is approximate: characters ÷ `chars_per_token`, plus a fixed
//! overhead per message. Exact tokenizer counts vary by vendor and are not
//! worth the dependency.

use crate::core::error::DomainError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_THRESHOLD_TOKENS: usize = 60_000;
pub const DEFAULT_CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_MESSAGE_OVERHEAD_TOKENS: usize = 4;
pub const DEFAULT_POSITION_EXCERPT_CHARS: usize = 1_500;

/// Knobs controlling how much history a new turn carries.
///
/// - `threshold_tokens`: history above this is trimmed and folded into the summary
/// - `chars_per_token`: divisor for the length estimate
/// - `message_overhead_tokens`: fixed cost added per message
/// - `position_excerpt_chars`: per-model excerpt length inside a turn digest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    threshold_tokens: usize,
    chars_per_token: usize,
    message_overhead_tokens: usize,
    position_excerpt_chars: usize,
}

impl ContextBudget {
    pub fn new(
        threshold_tokens: usize,
        chars_per_token: usize,
        message_overhead_tokens: usize,
        position_excerpt_chars: usize,
    ) -> Self {
        Self {
            threshold_tokens,
            chars_per_token,
            message_overhead_tokens,
            position_excerpt_chars,
        }
    }

    pub fn threshold_tokens(&self) -> usize {
        self.threshold_tokens
    }

    pub fn chars_per_token(&self) -> usize {
        self.chars_per_token
    }

    pub fn message_overhead_tokens(&self) -> usize {
        self.message_overhead_tokens
    }

    pub fn position_excerpt_chars(&self) -> usize {
        self.position_excerpt_chars
    }

    pub fn with_threshold_tokens(mut self, threshold_tokens: usize) -> Self {
        self.threshold_tokens = threshold_tokens;
        self
    }

    pub fn with_position_excerpt_chars(mut self, chars: usize) -> Self {
        self.position_excerpt_chars = chars;
        self
    }

    /// Estimated tokens for one message carrying `text`.
    pub fn estimate_message(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token.max(1)) + self.message_overhead_tokens
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.threshold_tokens == 0 {
            return Err(DomainError::InvalidConfig(
                "context.threshold_tokens must be greater than 0".to_string(),
            ));
        }
        if self.chars_per_token == 0 {
            return Err(DomainError::InvalidConfig(
                "context.chars_per_token must be greater than 0".to_string(),
            ));
        }
        if self.position_excerpt_chars == 0 {
            return Err(DomainError::InvalidConfig(
                "context.position_excerpt_chars must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self::new(
            DEFAULT_THRESHOLD_TOKENS,
            DEFAULT_CHARS_PER_TOKEN,
            DEFAULT_MESSAGE_OVERHEAD_TOKENS,
            DEFAULT_POSITION_EXCERPT_CHARS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let budget = ContextBudget::default();
        assert_eq!(budget.threshold_tokens(), 60_000);
        assert_eq!(budget.chars_per_token(), 4);
        assert!(budget.validate().is_ok());
    }

    #[test]
    fn estimate_rounds_up_and_adds_overhead() {
        let budget = ContextBudget::default();
        assert_eq!(budget.estimate_message(""), 4);
        assert_eq!(budget.estimate_message("abcde"), 2 + 4);
        // counts characters, not bytes
        assert_eq!(budget.estimate_message("日本語です"), 2 + 4);
    }

    #[test]
    fn zero_values_are_rejected() {
        assert!(ContextBudget::new(0, 4, 4, 10).validate().is_err());
        assert!(ContextBudget::new(10, 0, 4, 10).validate().is_err());
        assert!(ContextBudget::default().with_position_excerpt_chars(0).validate().is_err());
    }
}
