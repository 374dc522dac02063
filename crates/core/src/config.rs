use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub project_id: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_host() -> String {
    "api.sanity.io".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_token_env() -> String {
    "VISION_TOKEN".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl ConsoleConfig {
    #[must_use]
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            api_host: default_api_host(),
            api_version: default_api_version(),
            datasets: Vec::new(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigError::Invalid("project_id must not be empty"));
        }
        if self.api_host.trim().is_empty() {
            return Err(ConfigError::Invalid("api_host must not be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be greater than 0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn api_base_url(&self) -> String {
        format!(
            "https://{}.{}/{}",
            self.project_id,
            self.api_host.trim_end_matches('/'),
            self.api_version.trim_matches('/')
        )
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        env::var(&self.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("VISION_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("vision"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{ConfigError, ConsoleConfig};

    #[test]
    fn minimal_config_fills_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "project_id = \"abc123\"\n").expect("failed to write config");

        let config = ConsoleConfig::load_from_path(&path).expect("config should load");
        assert_eq!(config, ConsoleConfig::new("abc123"));
        assert_eq!(config.api_base_url(), "https://abc123.api.sanity.io/v1");
        assert_eq!(config.request_timeout().as_secs(), 30);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
project_id = "abc123"
api_host = "api.example.test/"
api_version = "v2021-06-07"
datasets = ["production", "staging"]
"#,
        )
        .expect("failed to write config");

        let config = ConsoleConfig::load_from_path(&path).expect("config should load");
        assert_eq!(config.datasets, vec!["production", "staging"]);
        assert_eq!(
            config.api_base_url(),
            "https://abc123.api.example.test/v2021-06-07"
        );
    }

    #[test]
    fn empty_project_id_is_rejected() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "project_id = \" \"\n").expect("failed to write config");

        let error = ConsoleConfig::load_from_path(&path).expect_err("config should be invalid");
        assert!(matches!(error, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let error = ConsoleConfig::load_from_path(temp_dir.path().join("missing.toml"))
            .expect_err("missing file should fail");
        assert!(matches!(error, ConfigError::Read { .. }));
    }
}
