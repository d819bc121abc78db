//! Tab collection plus active pointer, mutated only through [`reduce`].
//!
//! Every action is applied as one step so the active index stays valid and
//! paths stay unique no matter which action ran.

use super::error::TabError;
use super::tab::{ConflictReason, FileInfo, PendingRequest, RequestId, SaveState, Tab, TabId};
use crate::files::path::{is_under, rebase};
use crate::files::{Encoding, FileContent, WriteResult};
use std::collections::HashSet;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshResult {
    Fetched(FileContent),
    NotFound,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveResult {
    Written(WriteResult),
    VersionMismatch,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TabAction {
    Open {
        file: FileInfo,
        content: String,
        encoding: Encoding,
        etag: Option<String>,
    },
    OpenUnloaded {
        file: FileInfo,
    },
    Activate(usize),
    Close(usize),
    CloseOthers(usize),
    CloseAll,
    Reorder {
        from: usize,
        to: usize,
    },
    Edit {
        index: usize,
        content: String,
        at: Instant,
    },
    UpdatePath {
        old_path: String,
        new_path: String,
    },
    UpdatePathsUnder {
        old_folder: String,
        new_folder: String,
    },
    CloseByPath {
        path: String,
        is_folder: bool,
    },
    RefreshStarted {
        index: usize,
        request: RequestId,
    },
    RefreshResolved {
        tab: TabId,
        request: RequestId,
        result: RefreshResult,
    },
    QueueSave(usize),
    CancelQueuedSave(usize),
    SaveStarted {
        index: usize,
        request: RequestId,
    },
    SaveResolved {
        tab: TabId,
        request: RequestId,
        result: SaveResult,
    },
    AcceptServer {
        index: usize,
        content: FileContent,
    },
    KeepLocal(usize),
    SavedAs {
        index: usize,
        new_path: String,
        write: WriteResult,
    },
    /// Another writer, such as an upload, replaced the file at `path`.
    ExternalWrite {
        path: String,
        content: String,
        encoding: Encoding,
        write: WriteResult,
    },
}

/// Why a completed request was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    TabClosed,
    Superseded,
    LocalEdits,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TabClosed => "tab_closed",
            Self::Superseded => "superseded",
            Self::LocalEdits => "local_edits",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabOutcome {
    Unchanged,
    Updated,
    Opened { index: usize, reused: bool },
    Closed(usize),
    PathsUpdated(usize),
    Adopted { index: usize },
    Conflict { index: usize, reason: ConflictReason },
    RefreshFailed { index: usize, message: String },
    Saved { index: usize, still_dirty: bool },
    SaveFailed { index: usize, message: String },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TabsState {
    tabs: Vec<Tab>,
    active: Option<usize>,
    next_tab_id: u64,
}

impl TabsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn len(&self) -> usize {
        self.tabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active.and_then(|index| self.tabs.get(index))
    }

    pub fn tab(&self, index: usize) -> Option<&Tab> {
        self.tabs.get(index)
    }

    pub fn find(&self, path: &str) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.file.path == path)
    }

    pub fn find_id(&self, id: TabId) -> Option<usize> {
        self.tabs.iter().position(|tab| tab.id == id)
    }

    pub fn paths(&self) -> Vec<&str> {
        self.tabs.iter().map(|tab| tab.file.path.as_str()).collect()
    }

    fn allocate_id(&mut self) -> TabId {
        self.next_tab_id += 1;
        TabId(self.next_tab_id)
    }

    fn check(&self, index: usize) -> Result<(), TabError> {
        if index < self.tabs.len() {
            return Ok(());
        }
        Err(TabError::IndexOutOfRange {
            index,
            len: self.tabs.len(),
        })
    }

    fn tab_mut(&mut self, index: usize) -> Result<&mut Tab, TabError> {
        self.check(index)?;
        Ok(&mut self.tabs[index])
    }

    fn conflicted_tab_mut(&mut self, index: usize) -> Result<&mut Tab, TabError> {
        let tab = self.tab_mut(index)?;
        if !tab.save_state.is_conflict() {
            return Err(TabError::NotInConflict {
                path: tab.file.path.clone(),
            });
        }
        Ok(tab)
    }

    fn close_at(&mut self, index: usize) {
        self.tabs.remove(index);
        self.active = match self.active {
            _ if self.tabs.is_empty() => None,
            Some(active) if active > index => Some(active - 1),
            Some(active) if active == index => Some(index.min(self.tabs.len() - 1)),
            other => other,
        };
    }

    fn close_ids(&mut self, ids: &[TabId]) {
        for id in ids {
            if let Some(index) = self.find_id(*id) {
                self.close_at(index);
            }
        }
    }
}

pub fn reduce(state: &mut TabsState, action: TabAction) -> Result<TabOutcome, TabError> {
    match action {
        TabAction::Open {
            file,
            content,
            encoding,
            etag,
        } => {
            let (index, reused) = open_tab(state, file, content, encoding, etag);
            Ok(TabOutcome::Opened { index, reused })
        }
        TabAction::OpenUnloaded { file } => {
            if let Some(index) = state.find(&file.path) {
                return Ok(TabOutcome::Opened {
                    index,
                    reused: true,
                });
            }
            let id = state.allocate_id();
            state
                .tabs
                .push(Tab::new(id, file, String::new(), Encoding::Utf8, None));
            let index = state.tabs.len() - 1;
            if state.active.is_none() {
                state.active = Some(index);
            }
            Ok(TabOutcome::Opened {
                index,
                reused: false,
            })
        }
        TabAction::Activate(index) => {
            state.check(index)?;
            if state.active == Some(index) {
                return Ok(TabOutcome::Unchanged);
            }
            state.active = Some(index);
            Ok(TabOutcome::Updated)
        }
        TabAction::Close(index) => {
            state.check(index)?;
            state.close_at(index);
            Ok(TabOutcome::Closed(1))
        }
        TabAction::CloseOthers(index) => {
            state.check(index)?;
            let closed = state.tabs.len() - 1;
            let kept = state.tabs.swap_remove(index);
            state.tabs = vec![kept];
            state.active = Some(0);
            Ok(TabOutcome::Closed(closed))
        }
        TabAction::CloseAll => {
            let closed = state.tabs.len();
            state.tabs.clear();
            state.active = None;
            Ok(TabOutcome::Closed(closed))
        }
        TabAction::Reorder { from, to } => {
            state.check(from)?;
            state.check(to)?;
            if from == to {
                return Ok(TabOutcome::Unchanged);
            }
            let tab = state.tabs.remove(from);
            state.tabs.insert(to, tab);
            state.active = state.active.map(|active| {
                if active == from {
                    to
                } else if from < active && active <= to {
                    active - 1
                } else if to <= active && active < from {
                    active + 1
                } else {
                    active
                }
            });
            Ok(TabOutcome::Updated)
        }
        TabAction::Edit { index, content, at } => {
            let tab = state.tab_mut(index)?;
            if tab.file.read_only {
                return Err(TabError::ReadOnly {
                    path: tab.file.path.clone(),
                });
            }
            if tab.content == content {
                return Ok(TabOutcome::Unchanged);
            }
            tab.content = content;
            tab.unsaved_changes = true;
            tab.generation += 1;
            tab.last_edit = Some(at);
            if matches!(tab.save_state, SaveState::Clean | SaveState::Saved) {
                tab.save_state = SaveState::Dirty;
            }
            Ok(TabOutcome::Updated)
        }
        TabAction::UpdatePath { old_path, new_path } => {
            if old_path == new_path || state.find(&old_path).is_none() {
                return Ok(TabOutcome::PathsUpdated(0));
            }
            if let Some(existing) = state.find(&new_path) {
                state.close_at(existing);
            }
            if let Some(index) = state.find(&old_path) {
                state.tabs[index].rebind(&new_path);
            }
            Ok(TabOutcome::PathsUpdated(1))
        }
        TabAction::UpdatePathsUnder {
            old_folder,
            new_folder,
        } => Ok(update_paths_under(state, &old_folder, &new_folder)),
        TabAction::CloseByPath { path, is_folder } => {
            let ids: Vec<TabId> = state
                .tabs
                .iter()
                .filter(|tab| {
                    if is_folder {
                        is_under(&tab.file.path, &path)
                    } else {
                        tab.file.path == path
                    }
                })
                .map(|tab| tab.id)
                .collect();
            state.close_ids(&ids);
            Ok(TabOutcome::Closed(ids.len()))
        }
        TabAction::RefreshStarted { index, request } => {
            let tab = state.tab_mut(index)?;
            tab.pending_refresh = Some(PendingRequest {
                request,
                generation: tab.generation,
            });
            Ok(TabOutcome::Updated)
        }
        TabAction::RefreshResolved {
            tab,
            request,
            result,
        } => Ok(apply_refresh(state, tab, request, result)),
        TabAction::QueueSave(index) => {
            state.tab_mut(index)?.save_queued = true;
            Ok(TabOutcome::Updated)
        }
        TabAction::CancelQueuedSave(index) => {
            state.tab_mut(index)?.save_queued = false;
            Ok(TabOutcome::Updated)
        }
        TabAction::SaveStarted { index, request } => {
            let tab = state.tab_mut(index)?;
            if let SaveState::Conflict(reason) = tab.save_state {
                return Err(TabError::SaveBlockedByConflict {
                    path: tab.file.path.clone(),
                    reason,
                });
            }
            if tab.file.read_only {
                return Err(TabError::ReadOnly {
                    path: tab.file.path.clone(),
                });
            }
            tab.save_state = SaveState::Saving;
            tab.save_queued = false;
            tab.pending_save = Some(PendingRequest {
                request,
                generation: tab.generation,
            });
            Ok(TabOutcome::Updated)
        }
        TabAction::SaveResolved {
            tab,
            request,
            result,
        } => Ok(apply_save(state, tab, request, result)),
        TabAction::AcceptServer { index, content } => {
            let tab = state.conflicted_tab_mut(index)?;
            tab.adopt(content);
            tab.save_queued = false;
            Ok(TabOutcome::Adopted { index })
        }
        TabAction::KeepLocal(index) => {
            let tab = state.conflicted_tab_mut(index)?;
            tab.save_state = if tab.unsaved_changes {
                SaveState::Dirty
            } else {
                SaveState::Clean
            };
            tab.overwrite_on_save = true;
            Ok(TabOutcome::Updated)
        }
        TabAction::SavedAs {
            index,
            new_path,
            write,
        } => {
            let id = state.conflicted_tab_mut(index)?.id;
            if let Some(existing) = state.find(&new_path) {
                let target = &state.tabs[existing];
                if target.id != id {
                    if target.unsaved_changes {
                        return Err(TabError::TargetHasUnsavedChanges { path: new_path });
                    }
                    state.close_at(existing);
                }
            }
            let Some(index) = state.find_id(id) else {
                return Ok(TabOutcome::Dropped(DropReason::TabClosed));
            };
            let tab = &mut state.tabs[index];
            tab.rebind(&new_path);
            tab.file.apply_write(&write);
            tab.etag = Some(write.etag);
            tab.unsaved_changes = false;
            tab.save_state = SaveState::Clean;
            tab.overwrite_on_save = false;
            tab.save_queued = false;
            tab.generation += 1;
            Ok(TabOutcome::Updated)
        }
        TabAction::ExternalWrite {
            path,
            content,
            encoding,
            write,
        } => {
            let Some(index) = state.find(&path) else {
                return Ok(TabOutcome::Unchanged);
            };
            let tab = &mut state.tabs[index];
            if tab.etag.as_deref() == Some(write.etag.as_str()) {
                return Ok(TabOutcome::Unchanged);
            }
            if tab.unsaved_changes || tab.pending_save.is_some() {
                let reason = ConflictReason::ContentChanged;
                tab.save_state = SaveState::Conflict(reason);
                tab.save_queued = false;
                return Ok(TabOutcome::Conflict { index, reason });
            }
            tab.file.apply_write(&write);
            tab.content = content;
            tab.encoding = encoding;
            tab.etag = Some(write.etag);
            tab.save_state = SaveState::Clean;
            tab.overwrite_on_save = false;
            tab.generation += 1;
            Ok(TabOutcome::Adopted { index })
        }
    }
}

/// Inserts or re-selects the tab for `file.path`; returns its index and
/// whether it already existed.
pub(crate) fn open_tab(
    state: &mut TabsState,
    file: FileInfo,
    content: String,
    encoding: Encoding,
    etag: Option<String>,
) -> (usize, bool) {
    if let Some(index) = state.find(&file.path) {
        let tab = &mut state.tabs[index];
        // Local edits win over a re-open; the background refresh decides
        // whether they conflict.
        if !tab.unsaved_changes && tab.pending_save.is_none() {
            tab.file = file;
            tab.content = content;
            tab.encoding = encoding;
            tab.etag = etag;
            tab.save_state = SaveState::Clean;
            tab.overwrite_on_save = false;
            tab.generation += 1;
        }
        state.active = Some(index);
        return (index, true);
    }

    let id = state.allocate_id();
    state
        .tabs
        .push(Tab::new(id, file, content, encoding, etag));
    let index = state.tabs.len() - 1;
    state.active = Some(index);
    (index, false)
}

fn update_paths_under(state: &mut TabsState, old_folder: &str, new_folder: &str) -> TabOutcome {
    if old_folder == new_folder {
        return TabOutcome::PathsUpdated(0);
    }
    let moves: Vec<(TabId, String)> = state
        .tabs
        .iter()
        .filter_map(|tab| rebase(&tab.file.path, old_folder, new_folder).map(|path| (tab.id, path)))
        .collect();
    if moves.is_empty() {
        return TabOutcome::PathsUpdated(0);
    }

    let moving: HashSet<TabId> = moves.iter().map(|(id, _)| *id).collect();
    let targets: HashSet<&str> = moves.iter().map(|(_, path)| path.as_str()).collect();
    let collisions: Vec<TabId> = state
        .tabs
        .iter()
        .filter(|tab| !moving.contains(&tab.id) && targets.contains(tab.file.path.as_str()))
        .map(|tab| tab.id)
        .collect();
    state.close_ids(&collisions);

    for (id, path) in &moves {
        if let Some(index) = state.find_id(*id) {
            state.tabs[index].rebind(path);
        }
    }
    TabOutcome::PathsUpdated(moves.len())
}

fn apply_refresh(
    state: &mut TabsState,
    id: TabId,
    request: RequestId,
    result: RefreshResult,
) -> TabOutcome {
    let Some(index) = state.find_id(id) else {
        return TabOutcome::Dropped(DropReason::TabClosed);
    };
    let tab = &mut state.tabs[index];
    let Some(pending) = tab.pending_refresh.filter(|pending| pending.request == request) else {
        return TabOutcome::Dropped(DropReason::Superseded);
    };
    tab.pending_refresh = None;
    if tab.generation != pending.generation {
        return TabOutcome::Dropped(DropReason::LocalEdits);
    }

    match result {
        RefreshResult::Fetched(content) => {
            if tab.etag.as_deref() == Some(content.etag.as_str()) {
                if tab.save_state == SaveState::Conflict(ConflictReason::PathNotFound) {
                    tab.save_state = if tab.unsaved_changes {
                        SaveState::Dirty
                    } else {
                        SaveState::Clean
                    };
                    return TabOutcome::Updated;
                }
                return TabOutcome::Unchanged;
            }
            if !tab.unsaved_changes {
                tab.adopt(content);
                return TabOutcome::Adopted { index };
            }
            let reason = ConflictReason::ContentChanged;
            tab.save_state = SaveState::Conflict(reason);
            TabOutcome::Conflict { index, reason }
        }
        RefreshResult::NotFound => {
            let reason = ConflictReason::PathNotFound;
            tab.save_state = SaveState::Conflict(reason);
            TabOutcome::Conflict { index, reason }
        }
        RefreshResult::Failed(message) => TabOutcome::RefreshFailed { index, message },
    }
}

fn apply_save(
    state: &mut TabsState,
    id: TabId,
    request: RequestId,
    result: SaveResult,
) -> TabOutcome {
    let Some(index) = state.find_id(id) else {
        return TabOutcome::Dropped(DropReason::TabClosed);
    };
    let tab = &mut state.tabs[index];
    let Some(pending) = tab.pending_save.filter(|pending| pending.request == request) else {
        return TabOutcome::Dropped(DropReason::Superseded);
    };
    tab.pending_save = None;

    match result {
        SaveResult::Written(write) => {
            tab.file.apply_write(&write);
            tab.etag = Some(write.etag);
            tab.overwrite_on_save = false;
            let still_dirty = tab.generation != pending.generation;
            if still_dirty {
                tab.save_state = SaveState::Dirty;
            } else {
                tab.unsaved_changes = false;
                tab.save_state = SaveState::Saved;
            }
            TabOutcome::Saved { index, still_dirty }
        }
        SaveResult::VersionMismatch => {
            let reason = ConflictReason::ContentChanged;
            tab.save_state = SaveState::Conflict(reason);
            TabOutcome::Conflict { index, reason }
        }
        SaveResult::Failed(message) => {
            tab.save_state = SaveState::Dirty;
            TabOutcome::SaveFailed { index, message }
        }
    }
}
