use crate::files::path::{file_extension, file_name};
use crate::files::{Encoding, FileContent, WriteResult};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileInfo {
    pub path: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub modified: Option<i64>,
    #[serde(default)]
    pub read_only: bool,
}

impl FileInfo {
    pub fn from_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            name: file_name(path).to_string(),
            size: 0,
            extension: file_extension(path),
            modified: None,
            read_only: false,
        }
    }

    pub fn from_content(content: &FileContent) -> Self {
        let mut info = Self::from_path(&content.path);
        info.size = content.size;
        info.modified = content.modified;
        info
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Copies size/modified from a fresh read, keeping path and flags.
    pub(crate) fn with_content_meta(&self, content: &FileContent) -> Self {
        let mut info = self.clone();
        info.size = content.size;
        info.modified = content.modified;
        info
    }

    pub(crate) fn apply_write(&mut self, write: &WriteResult) {
        self.size = write.size;
        self.modified = write.modified;
    }

    pub(crate) fn rebind(&mut self, new_path: &str) {
        self.path = new_path.to_string();
        self.name = file_name(new_path).to_string();
        self.extension = file_extension(new_path);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    ContentChanged,
    PathNotFound,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentChanged => "content_changed",
            Self::PathNotFound => "path_not_found",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Save lifecycle of a tab. The conflict reason only exists in the
/// `Conflict` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveState {
    Clean,
    Dirty,
    Saving,
    Saved,
    Conflict(ConflictReason),
}

impl SaveState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Dirty => "dirty",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Conflict(_) => "conflict",
        }
    }

    pub fn conflict_reason(self) -> Option<ConflictReason> {
        match self {
            Self::Conflict(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_conflict(self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl std::fmt::Display for SaveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict(reason) => write!(f, "conflict ({reason})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Stable identity of an open tab; survives reorders and path rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

/// A network request issued for a tab, with the tab generation it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingRequest {
    pub(crate) request: RequestId,
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tab {
    pub(crate) id: TabId,
    pub file: FileInfo,
    pub content: String,
    pub encoding: Encoding,
    pub etag: Option<String>,
    pub unsaved_changes: bool,
    pub save_state: SaveState,
    pub(crate) generation: u64,
    pub(crate) pending_refresh: Option<PendingRequest>,
    pub(crate) pending_save: Option<PendingRequest>,
    pub(crate) save_queued: bool,
    pub(crate) overwrite_on_save: bool,
    pub(crate) last_edit: Option<Instant>,
}

impl Tab {
    pub(crate) fn new(
        id: TabId,
        file: FileInfo,
        content: String,
        encoding: Encoding,
        etag: Option<String>,
    ) -> Self {
        Self {
            id,
            file,
            content,
            encoding,
            etag,
            unsaved_changes: false,
            save_state: SaveState::Clean,
            generation: 0,
            pending_refresh: None,
            pending_save: None,
            save_queued: false,
            overwrite_on_save: false,
            last_edit: None,
        }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn path(&self) -> &str {
        &self.file.path
    }

    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        self.save_state.conflict_reason()
    }

    /// A tab is loaded once it holds a server version. Empty files count;
    /// placeholders and failed loads have no ETag.
    pub fn has_loaded_content(&self) -> bool {
        self.etag.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.pending_refresh.is_some()
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending_save.is_some()
    }

    pub fn is_save_queued(&self) -> bool {
        self.save_queued
    }

    pub fn overwrites_on_save(&self) -> bool {
        self.overwrite_on_save
    }

    pub fn last_edit(&self) -> Option<Instant> {
        self.last_edit
    }

    /// Points the tab at a new path. A refresh issued for the old path can no
    /// longer be applied.
    pub(crate) fn rebind(&mut self, new_path: &str) {
        self.file.rebind(new_path);
        self.pending_refresh = None;
    }

    /// Replaces content with a server version and marks the tab clean.
    pub(crate) fn adopt(&mut self, content: FileContent) {
        self.file = self.file.with_content_meta(&content);
        self.content = content.content;
        self.encoding = content.encoding;
        self.etag = Some(content.etag);
        self.unsaved_changes = false;
        self.save_state = SaveState::Clean;
        self.overwrite_on_save = false;
        self.generation += 1;
    }
}
