//! Model target value object: which provider serves a model identifier.
//!
//! Model identifiers are opaque strings chosen by the user. Resolution never
//! fails: anything that is not an explicit direct-vendor reference goes to the
//! aggregator (OpenRouter).
//!
//! | Identifier | Provider | Native model |
//! |------------|----------|--------------|
//! | `openrouter/meta/x` | OpenRouter | `meta/x` |
//! | `anthropic:claude-3` | Anthropic | `claude-3` |
//! | `google:flash` | Gemini | `flash` |
//! | `meta-llama/llama-3` | OpenRouter | `meta-llama/llama-3` |

use serde::{Deserialize, Serialize};

/// Upstream vendor that can serve a chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Aggregator that proxies many vendors behind one OpenAI-style API.
    OpenRouter,
    Anthropic,
    OpenAi,
    Gemini,
}

impl Provider {
    /// Every provider, aggregator first.
    pub const ALL: [Provider; 4] = [
        Provider::OpenRouter,
        Provider::Anthropic,
        Provider::OpenAi,
        Provider::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenRouter => "openrouter",
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }

    /// Parse a direct-reference prefix (`anthropic:`, `google:`...).
    ///
    /// `gemini` and `google` are synonyms.
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "openrouter" => Some(Provider::OpenRouter),
            "anthropic" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            "gemini" | "google" => Some(Provider::Gemini),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A resolved model identifier (Value Object).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelTarget {
    pub provider: Provider,
    /// Model name in the provider's own namespace.
    pub model: String,
}

impl ModelTarget {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Resolve an opaque model identifier.
    ///
    /// Pure and total: unknown shapes degrade to the aggregator with the
    /// identifier passed through verbatim.
    pub fn parse(id: &str) -> Self {
        if let Some(rest) = id.strip_prefix("openrouter/") {
            return Self::new(Provider::OpenRouter, rest);
        }

        if let Some((prefix, rest)) = id.split_once(':')
            && let Some(provider) = Provider::from_prefix(prefix)
        {
            return Self::new(provider, rest);
        }

        Self::new(Provider::OpenRouter, id)
    }

    /// Whether the request goes straight to a vendor rather than the aggregator.
    pub fn is_direct(&self) -> bool {
        self.provider != Provider::OpenRouter
    }
}

impl std::str::FromStr for ModelTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl std::fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregator_prefix_is_stripped() {
        assert_eq!(
            ModelTarget::parse("openrouter/meta/x"),
            ModelTarget::new(Provider::OpenRouter, "meta/x")
        );
    }

    #[test]
    fn direct_vendor_prefixes() {
        assert_eq!(
            ModelTarget::parse("anthropic:claude-3"),
            ModelTarget::new(Provider::Anthropic, "claude-3")
        );
        assert_eq!(
            ModelTarget::parse("gemini:flash"),
            ModelTarget::new(Provider::Gemini, "flash")
        );
        assert_eq!(
            ModelTarget::parse("openai:gpt-4o"),
            ModelTarget::new(Provider::OpenAi, "gpt-4o")
        );
        assert_eq!(
            ModelTarget::parse("openrouter:auto"),
            ModelTarget::new(Provider::OpenRouter, "auto")
        );
    }

    #[test]
    fn google_is_a_gemini_synonym() {
        assert_eq!(ModelTarget::parse("google:pro").provider, Provider::Gemini);
    }

    #[test]
    fn bare_and_unknown_ids_go_to_aggregator() {
        assert_eq!(
            ModelTarget::parse("gpt-4"),
            ModelTarget::new(Provider::OpenRouter, "gpt-4")
        );
        assert_eq!(
            ModelTarget::parse("mistral:large"),
            ModelTarget::new(Provider::OpenRouter, "mistral:large")
        );
        assert_eq!(
            ModelTarget::parse("meta-llama/llama-3:free"),
            ModelTarget::new(Provider::OpenRouter, "meta-llama/llama-3:free")
        );
        assert_eq!(ModelTarget::parse(""), ModelTarget::new(Provider::OpenRouter, ""));
    }

    #[test]
    fn rest_is_kept_verbatim() {
        let target = ModelTarget::parse("anthropic:claude:with:colons");
        assert_eq!(target.model, "claude:with:colons");
        assert!(target.is_direct());
    }
}
