pub mod error;
pub mod load;
pub mod paths;
pub mod save;
pub mod settings;

pub use error::ConfigError;
pub use load::{load_global_settings, load_settings, load_settings_or_default};
pub use paths::{
    default_global_config_path, default_session_state_path, GLOBAL_SETTINGS_FILE_NAME,
    GLOBAL_STATE_DIR, SESSION_STATE_FILE_NAME,
};
pub use save::{save_settings, save_settings_to};
pub use settings::{
    AutosaveConfig, FileServiceConfig, LoggingConfig, SessionConfig, Settings,
    DEFAULT_AUTOSAVE_DELAY_MS, DEFAULT_TOKEN_ENV,
};
