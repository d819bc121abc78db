use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn append_session_log(path: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

/// Cheap handle passed to components that log. A handle without a path drops
/// every line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    path: Option<PathBuf>,
}

impl SessionLog {
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, event: &str, message: &str) {
        self.append("info", event, message);
    }

    pub fn warn(&self, event: &str, message: &str) {
        self.append("warn", event, message);
    }

    pub fn error(&self, event: &str, message: &str) {
        self.append("error", event, message);
    }

    fn append(&self, level: &str, event: &str, message: &str) {
        if let Some(path) = self.path.as_deref() {
            append_session_log(path, level, event, message);
        }
    }
}
