use super::{default_session_state_path, ConfigError};
use crate::files::{HttpFileService, DEFAULT_FILE_API_BASE, FILE_API_BASE_ENV};
use crate::session::AutosavePolicy;
use crate::shared::logging::SessionLog;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TOKEN_ENV: &str = "TABSYNC_API_TOKEN";
pub const DEFAULT_AUTOSAVE_DELAY_MS: u64 = 1500;

fn default_base_url() -> String {
    DEFAULT_FILE_API_BASE.to_string()
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

fn default_true() -> bool {
    true
}

fn default_delay_ms() -> u64 {
    DEFAULT_AUTOSAVE_DELAY_MS
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub file_service: FileServiceConfig,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AutosaveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: DEFAULT_AUTOSAVE_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_true")]
    pub restore_tabs: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            restore_tabs: true,
            state_path: None,
        }
    }
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base_url = self.file_service.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::Settings(
                "`file_service.base_url` must be non-empty".to_string(),
            ));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::Settings(format!(
                "`file_service.base_url` must start with http:// or https://, got `{base_url}`"
            )));
        }
        if self.file_service.token_env.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`file_service.token_env` must be non-empty".to_string(),
            ));
        }
        if self.autosave.enabled && self.autosave.delay_ms == 0 {
            return Err(ConfigError::Settings(
                "`autosave.delay_ms` must be greater than zero when autosave is enabled"
                    .to_string(),
            ));
        }
        if let Some(path) = &self.logging.path {
            if !path.is_absolute() {
                return Err(ConfigError::Settings(
                    "`logging.path` must be an absolute path".to_string(),
                ));
            }
        }
        if let Some(path) = &self.session.state_path {
            if !path.is_absolute() {
                return Err(ConfigError::Settings(
                    "`session.state_path` must be an absolute path".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// `TABSYNC_FILE_API_BASE` wins over the configured base URL.
    pub fn resolved_base_url(&self) -> String {
        std::env::var(FILE_API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.file_service.base_url.trim().to_string())
    }

    pub fn api_token(&self) -> Option<String> {
        std::env::var(self.file_service.token_env.trim())
            .ok()
            .filter(|v| !v.trim().is_empty())
    }

    pub fn autosave_policy(&self) -> AutosavePolicy {
        AutosavePolicy {
            enabled: self.autosave.enabled,
            delay: Duration::from_millis(self.autosave.delay_ms),
        }
    }

    pub fn session_log(&self) -> SessionLog {
        match &self.logging.path {
            Some(path) => SessionLog::to_path(path),
            None => SessionLog::disabled(),
        }
    }

    pub fn session_state_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.session.state_path {
            Some(path) => Ok(path.clone()),
            None => default_session_state_path(),
        }
    }

    pub fn build_file_service(&self) -> HttpFileService {
        HttpFileService::new(&self.resolved_base_url(), self.api_token())
    }
}
