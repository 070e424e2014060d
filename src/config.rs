use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_CACHE_FILE;
use crate::error::ConfigError;
use crate::tenable::DEFAULT_BASE_URL;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub api_access_key: String,
    pub api_secret_key: String,
    #[serde(default = "default_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_cache_file")]
    pub cache_file: PathBuf,
    pub audit_logs: AuditLogConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AuditLogConfig {
    pub slack_webhook_url: String,
    #[serde(default)]
    pub enabled_event_types: Vec<String>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_cache_file() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_FILE)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::Read { path: path.to_path_buf(), source }
            }
        })?;

        let config: Config = serde_yaml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_access_key.trim().is_empty() || self.api_secret_key.trim().is_empty() {
            return Err(ConfigError::Invalid("api_access_key and api_secret_key must be set".to_string()));
        }
        if self.audit_logs.slack_webhook_url.trim().is_empty() {
            return Err(ConfigError::Invalid("audit_logs.slack_webhook_url must be set".to_string()));
        }
        Ok(())
    }

    /// The actions eligible for notification.
    pub fn allow_list(&self) -> HashSet<String> {
        self.audit_logs
            .enabled_event_types
            .iter()
            .map(|action| action.trim().to_string())
            .filter(|action| !action.is_empty())
            .collect()
    }
}
