//! Provider configuration from TOML (`[providers.<name>]` sections)

use crate::config::issue::{ConfigIssue, ConfigIssueCode, Severity};
use crate::providers::{ProviderSettings, default_key_env};
use roundtable_domain::Provider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One vendor's credentials and endpoint.
///
/// Every field is optional; unset fields take the built-in value for the
/// provider.
///
/// # Example
///
/// ```toml
/// [providers.anthropic]
/// api_key_env = "MY_ANTHROPIC_KEY"
/// max_tokens = 4096
/// api_version = "2023-06-01"
///
/// [providers.openai]
/// base_url = "https://my-proxy.example.com/v1"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProviderConfig {
    /// Environment variable holding the key (defaults to e.g. `ANTHROPIC_API_KEY`).
    pub api_key_env: Option<String>,
    /// Direct API key (not recommended, use the env var instead).
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    /// Anthropic only.
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileProvidersConfig {
    pub openrouter: FileProviderConfig,
    pub anthropic: FileProviderConfig,
    pub openai: FileProviderConfig,
    pub gemini: FileProviderConfig,
}

impl FileProvidersConfig {
    pub fn get(&self, provider: Provider) -> &FileProviderConfig {
        match provider {
            Provider::OpenRouter => &self.openrouter,
            Provider::Anthropic => &self.anthropic,
            Provider::OpenAi => &self.openai,
            Provider::Gemini => &self.gemini,
        }
    }

    /// Resolve settings, reading keys from the process environment.
    pub fn settings(&self, provider: Provider) -> ProviderSettings {
        self.settings_with(provider, |name| std::env::var(name).ok())
    }

    /// Resolve settings with an explicit environment lookup.
    ///
    /// A key written in the file wins over the environment variable.
    pub fn settings_with(
        &self,
        provider: Provider,
        env: impl Fn(&str) -> Option<String>,
    ) -> ProviderSettings {
        let file = self.get(provider);
        let key_env = file
            .api_key_env
            .as_deref()
            .unwrap_or(default_key_env(provider));
        let key = file.api_key.clone().or_else(|| env(key_env));

        let mut settings = ProviderSettings::defaults(provider).with_api_key(key);
        if let Some(base_url) = &file.base_url {
            settings.base_url = base_url.clone();
        }
        if let Some(max_tokens) = file.max_tokens {
            settings.max_tokens = max_tokens;
        }
        if provider == Provider::Anthropic && file.api_version.is_some() {
            settings.api_version = file.api_version.clone();
        }
        settings
    }

    pub fn all_settings(&self) -> BTreeMap<Provider, ProviderSettings> {
        Provider::ALL
            .into_iter()
            .map(|p| (p, self.settings(p)))
            .collect()
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for provider in Provider::ALL {
            let file = self.get(provider);
            if file.api_key.is_some() {
                let field = format!("providers.{}.api_key", provider);
                issues.push(ConfigIssue {
                    severity: Severity::Warning,
                    message: format!(
                        "{}: plaintext key in config, prefer {}",
                        field,
                        default_key_env(provider)
                    ),
                    code: ConfigIssueCode::PlaintextSecret { field },
                });
            }
            if file.max_tokens == Some(0) {
                issues.push(ConfigIssue::constraint(
                    &format!("providers.{}.max_tokens", provider),
                    format!("providers.{}.max_tokens must be greater than 0", provider),
                ));
            }
            if provider != Provider::Anthropic && file.api_version.is_some() {
                issues.push(ConfigIssue::constraint(
                    &format!("providers.{}.api_version", provider),
                    format!("providers.{}.api_version is only used by anthropic", provider),
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "ANTHROPIC_API_KEY" => Some("env-ant".into()),
            "CUSTOM_KEY" => Some("custom".into()),
            _ => None,
        }
    }

    #[test]
    fn test_defaults_read_conventional_env() {
        let config = FileProvidersConfig::default();
        let settings = config.settings_with(Provider::Anthropic, env);
        assert_eq!(settings.api_key.as_deref(), Some("env-ant"));
        assert_eq!(settings.base_url, "https://api.anthropic.com/v1");
        assert_eq!(settings.api_version.as_deref(), Some("2023-06-01"));

        assert!(config.settings_with(Provider::OpenAi, env).api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let toml_str = r#"
[providers.openai]
api_key_env = "CUSTOM_KEY"
base_url = "http://localhost:9000/v1/"
max_tokens = 1024
"#;
        let config: super::super::FileConfig = toml::from_str(toml_str).unwrap();
        let settings = config.providers.settings_with(Provider::OpenAi, env);
        assert_eq!(settings.api_key.as_deref(), Some("custom"));
        assert_eq!(settings.max_tokens, 1024);
        assert_eq!(
            settings.endpoint("chat/completions"),
            "http://localhost:9000/v1/chat/completions"
        );
    }

    #[test]
    fn test_file_key_wins_and_is_flagged() {
        let config = FileProvidersConfig {
            anthropic: FileProviderConfig {
                api_key: Some("file-key".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(
            config
                .settings_with(Provider::Anthropic, env)
                .api_key
                .as_deref(),
            Some("file-key")
        );
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            issues[0].code,
            ConfigIssueCode::PlaintextSecret { .. }
        ));
    }

    #[test]
    fn test_misplaced_api_version() {
        let config = FileProvidersConfig {
            gemini: FileProviderConfig {
                api_version: Some("v2".into()),
                max_tokens: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(config.validate().len(), 2);
        assert!(
            config
                .settings_with(Provider::Gemini, env)
                .api_version
                .is_none()
        );
    }
}
