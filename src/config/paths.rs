use crate::config::ConfigError;
use std::path::PathBuf;

pub const GLOBAL_STATE_DIR: &str = ".tabsync";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";
pub const SESSION_STATE_FILE_NAME: &str = "session.json";

fn global_state_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home).join(GLOBAL_STATE_DIR))
}

pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    Ok(global_state_dir()?.join(GLOBAL_SETTINGS_FILE_NAME))
}

pub fn default_session_state_path() -> Result<PathBuf, ConfigError> {
    Ok(global_state_dir()?.join(SESSION_STATE_FILE_NAME))
}
