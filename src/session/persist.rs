use super::state::TabsState;
use super::store::TabStore;
use super::tab::FileInfo;
use crate::shared::fs_atomic::atomic_write_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("failed to read session state {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session state {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode session state {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write session state {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Open tab paths in order plus the active one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub open_paths: Vec<String>,
    #[serde(default)]
    pub active_path: Option<String>,
}

impl SessionSnapshot {
    pub fn capture(state: &TabsState) -> Self {
        Self {
            open_paths: state.paths().into_iter().map(str::to_string).collect(),
            active_path: state.active_tab().map(|tab| tab.file.path.clone()),
        }
    }
}

pub fn save_session_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<(), PersistError> {
    let body = serde_json::to_vec_pretty(snapshot).map_err(|source| PersistError::Encode {
        path: path.display().to_string(),
        source,
    })?;
    atomic_write_file(path, &body).map_err(|source| PersistError::Write {
        path: path.display().to_string(),
        source,
    })
}

/// Returns `None` when no snapshot has been written yet.
pub fn load_session_snapshot(path: &Path) -> Result<Option<SessionSnapshot>, PersistError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| PersistError::Parse {
            path: path.display().to_string(),
            source,
        })
}

/// Reopens the snapshot's tabs as unloaded placeholders and loads only the
/// active one. Returns the number of tabs added.
pub fn restore_session(store: &mut TabStore, snapshot: &SessionSnapshot) -> usize {
    let mut restored = 0;
    for path in &snapshot.open_paths {
        if store.state().find(path).is_some() {
            continue;
        }
        store.open_unloaded(FileInfo::from_path(path));
        restored += 1;
    }

    let target = snapshot
        .active_path
        .as_deref()
        .and_then(|path| store.state().find(path))
        .or(store.active_index());
    if let Some(index) = target {
        store.activate_and_load(index);
    }
    store
        .log()
        .info("session.restored", &format!("{restored} tabs"));
    restored
}
