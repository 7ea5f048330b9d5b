//! Configuration file loader with multi-source merging

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_PREFIX: &str = "ROUNDTABLE_";
const PROJECT_FILES: [&str; 2] = ["roundtable.toml", ".roundtable.toml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error(transparent)]
    Parse(#[from] Box<figment::Error>),
}

/// Files that feed one load, lowest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub global: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub explicit: Option<PathBuf>,
}

impl ConfigSources {
    /// Locate the global and project files on disk.
    pub fn discover(explicit: Option<&Path>) -> Self {
        Self {
            global: ConfigLoader::global_config_path().filter(|p| p.exists()),
            project: ConfigLoader::project_config_path(),
            explicit: explicit.map(Path::to_path_buf),
        }
    }
}

/// Configuration loader that handles file discovery and merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from all sources with proper priority
    ///
    /// Priority (highest to lowest):
    /// 1. `ROUNDTABLE_*` environment variables (`__` separates sections)
    /// 2. Explicit config path (if provided)
    /// 3. Project root: `./roundtable.toml` or `./.roundtable.toml`
    /// 4. Global: `$XDG_CONFIG_HOME/roundtable/config.toml`
    /// 5. Default values
    pub fn load(config_path: Option<&Path>) -> Result<FileConfig, ConfigError> {
        Self::load_from(&ConfigSources::discover(config_path), Some(ENV_PREFIX))
    }

    /// Merge the given files, plus the environment when `env_prefix` is set.
    pub fn load_from(
        sources: &ConfigSources,
        env_prefix: Option<&str>,
    ) -> Result<FileConfig, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(FileConfig::default()));

        for path in [&sources.global, &sources.project].into_iter().flatten() {
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = &sources.explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.clone()));
            }
            figment = figment.merge(Toml::file(path));
        }

        if let Some(prefix) = env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }

        figment.extract().map_err(|e| ConfigError::Parse(Box::new(e)))
    }

    /// Load only default configuration (for --no-config)
    pub fn load_defaults() -> FileConfig {
        FileConfig::default()
    }

    /// `$XDG_CONFIG_HOME/roundtable/config.toml`, or the platform equivalent.
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("roundtable").join("config.toml"))
    }

    /// Get the project-level config file path (if it exists)
    pub fn project_config_path() -> Option<PathBuf> {
        PROJECT_FILES
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Describe the config file locations being used (for --show-config)
    pub fn describe_sources(explicit: Option<&Path>) -> Vec<String> {
        let sources = ConfigSources::discover(explicit);
        let mut lines = vec!["Configuration sources (in priority order):".to_string()];

        lines.push(format!("  [ENV  ] Environment: {}*", ENV_PREFIX));

        if let Some(path) = &sources.explicit {
            let mark = if path.exists() { "FOUND" } else { "MISS " };
            lines.push(format!("  [{}] Explicit: {}", mark, path.display()));
        }

        match &sources.project {
            Some(path) => lines.push(format!("  [FOUND] Project: {}", path.display())),
            None => lines.push("  [     ] Project: ./roundtable.toml or ./.roundtable.toml".to_string()),
        }

        if let Some(path) = Self::global_config_path() {
            let mark = if path.exists() { "FOUND" } else { "     " };
            lines.push(format!("  [{}] Global:  {}", mark, path.display()));
        }

        lines.push("  [     ] Default: built-in defaults".to_string());
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_defaults() {
        let config = ConfigLoader::load_defaults();
        assert_eq!(config, FileConfig::default());
        assert_eq!(config.debate.max_rounds, 3);
    }

    #[test]
    fn test_no_sources_yields_defaults() {
        let config = ConfigLoader::load_from(&ConfigSources::default(), None).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_later_files_override_earlier() {
        let global = toml_file("[debate]\nmax_rounds = 5\nmax_concurrency = 2\n");
        let project = toml_file("[debate]\nmax_rounds = 7\n");
        let explicit = toml_file("[models]\njudge = \"openai:gpt-4o-mini\"\n");

        let sources = ConfigSources {
            global: Some(global.path().to_path_buf()),
            project: Some(project.path().to_path_buf()),
            explicit: Some(explicit.path().to_path_buf()),
        };
        let config = ConfigLoader::load_from(&sources, None).unwrap();

        assert_eq!(config.debate.max_rounds, 7);
        assert_eq!(config.debate.max_concurrency, 2);
        assert_eq!(config.models.judge.as_deref(), Some("openai:gpt-4o-mini"));
        // untouched sections keep defaults
        assert_eq!(config.stream.stall_timeout_secs, 90);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let sources = ConfigSources {
            explicit: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        let err = ConfigLoader::load_from(&sources, None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_type_mismatch_is_a_parse_error() {
        let file = toml_file("[debate]\nmax_rounds = \"many\"\n");
        let sources = ConfigSources {
            explicit: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let err = ConfigLoader::load_from(&sources, None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_global_config_path_returns_some() {
        let path = ConfigLoader::global_config_path().unwrap();
        assert!(path.ends_with("roundtable/config.toml"));
    }
}
