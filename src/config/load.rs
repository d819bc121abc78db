use super::{default_global_config_path, ConfigError, Settings};
use std::path::Path;

pub fn load_global_settings() -> Result<Settings, ConfigError> {
    let path = default_global_config_path()?;
    load_settings_or_default(&path)
}

pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let settings = Settings::from_path(path)?;
    settings.validate()?;
    Ok(settings)
}

/// Falls back to defaults when no settings file exists yet.
pub fn load_settings_or_default(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    load_settings(path)
}
