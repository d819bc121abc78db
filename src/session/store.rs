use super::error::TabError;
use super::state::{
    open_tab, reduce, RefreshResult, SaveResult, TabAction, TabOutcome, TabsState,
};
use super::tab::{ConflictReason, FileInfo, RequestId, SaveState, Tab, TabId};
use crate::files::path::{is_under, normalize_path};
use crate::files::{Encoding, FileService, FileServiceError, WriteResult};
use crate::notify::Notifier;
use crate::shared::logging::SessionLog;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(1500);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosavePolicy {
    pub enabled: bool,
    pub delay: Duration,
}

impl AutosavePolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            delay: DEFAULT_AUTOSAVE_DELAY,
        }
    }

    pub fn after(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
        }
    }
}

impl Default for AutosavePolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Discard local edits and reload the server version.
    AcceptServer,
    /// Keep local edits; the next save overwrites the server version.
    KeepLocal,
    /// Write local edits to another path and rebind the tab there.
    SaveAs { new_path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDispatch {
    Started,
    /// Waiting for another request on the same tab to resolve.
    Queued,
    NothingToSave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Refresh,
    Save,
}

#[derive(Debug)]
enum CompletionKind {
    Refresh(RefreshResult),
    Save(SaveResult),
}

#[derive(Debug)]
struct Completion {
    tab: TabId,
    request: RequestId,
    kind: CompletionKind,
}

/// Owns the open tabs and drives reads, writes and conflict detection
/// against a [`FileService`].
///
/// Network calls for background refreshes and saves run on worker threads.
/// Their results are applied only by [`TabStore::pump`] or
/// [`TabStore::settle`], on the thread that owns the store, so every state
/// change is a discrete step.
pub struct TabStore {
    state: TabsState,
    files: Arc<dyn FileService>,
    notifier: Arc<dyn Notifier>,
    log: SessionLog,
    autosave: AutosavePolicy,
    next_request: u64,
    in_flight: usize,
    completions_tx: Sender<Completion>,
    completions_rx: Receiver<Completion>,
}

impl TabStore {
    pub fn new(files: Arc<dyn FileService>, notifier: Arc<dyn Notifier>) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel();
        Self {
            state: TabsState::new(),
            files,
            notifier,
            log: SessionLog::disabled(),
            autosave: AutosavePolicy::disabled(),
            next_request: 0,
            in_flight: 0,
            completions_tx,
            completions_rx,
        }
    }

    pub fn with_log(mut self, log: SessionLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_autosave(mut self, autosave: AutosavePolicy) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn state(&self) -> &TabsState {
        &self.state
    }

    pub fn tabs(&self) -> &[Tab] {
        self.state.tabs()
    }

    pub fn tab(&self, index: usize) -> Option<&Tab> {
        self.state.tab(index)
    }

    pub fn active_index(&self) -> Option<usize> {
        self.state.active_index()
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.state.active_tab()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn file_service(&self) -> Arc<dyn FileService> {
        Arc::clone(&self.files)
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn autosave_policy(&self) -> AutosavePolicy {
        self.autosave
    }

    pub fn dispatch(&mut self, action: TabAction) -> Result<TabOutcome, TabError> {
        reduce(&mut self.state, action)
    }

    pub fn open_file_in_tab(
        &mut self,
        file: FileInfo,
        content: String,
        encoding: Encoding,
        etag: Option<String>,
    ) -> usize {
        let path = file.path.clone();
        let (index, reused) = open_tab(&mut self.state, file, content, encoding, etag);
        let event = if reused { "tab.reselected" } else { "tab.opened" };
        self.log.info(event, &path);
        index
    }

    /// File-tree entry point; same effect as [`TabStore::open_file_in_tab`].
    pub fn set_open_file(
        &mut self,
        file: FileInfo,
        content: String,
        encoding: Encoding,
        etag: Option<String>,
    ) -> usize {
        self.open_file_in_tab(file, content, encoding, etag)
    }

    pub fn open_path(&mut self, path: &str) -> Result<usize, TabError> {
        let path = normalize_path(path);
        match self.files.read_file(&path) {
            Ok(content) => {
                let file = FileInfo::from_content(&content);
                Ok(self.open_file_in_tab(
                    file,
                    content.content,
                    content.encoding,
                    Some(content.etag),
                ))
            }
            Err(err) => {
                self.log.warn("tab.open_failed", &format!("{path}: {err}"));
                self.notifier
                    .error(&format!("Failed to open {path}"), Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Adds a tab whose content is fetched the first time it is activated.
    pub fn open_unloaded(&mut self, file: FileInfo) -> usize {
        match self.dispatch(TabAction::OpenUnloaded { file }) {
            Ok(TabOutcome::Opened { index, .. }) => index,
            _ => self.state.len().saturating_sub(1),
        }
    }

    pub fn handle_tab_click(&mut self, index: usize) {
        if self.state.active_index() == Some(index) || index >= self.state.len() {
            return;
        }
        self.activate_and_load(index);
    }

    pub(crate) fn activate_and_load(&mut self, index: usize) {
        let Some(tab) = self.state.tab(index) else {
            return;
        };
        if tab.has_loaded_content() {
            // One network operation per tab at a time.
            if !tab.has_pending_refresh() && !tab.has_pending_save() {
                self.start_refresh(index);
            }
        } else {
            self.load_now(index);
        }
        let _ = self.dispatch(TabAction::Activate(index));
    }

    fn load_now(&mut self, index: usize) {
        let Some(tab) = self.state.tab(index) else {
            return;
        };
        let file = tab.file.clone();
        match self.files.read_file(&file.path) {
            Ok(content) => {
                let info = file.with_content_meta(&content);
                self.open_file_in_tab(info, content.content, content.encoding, Some(content.etag));
            }
            Err(err) => {
                self.log
                    .warn("tab.load_failed", &format!("{}: {err}", file.path));
                self.notifier
                    .error(&format!("Failed to open {}", file.path), Some(&err.to_string()));
            }
        }
    }

    fn ensure_active_loaded(&mut self) {
        let Some(index) = self.state.active_index() else {
            return;
        };
        let needs_load = self
            .state
            .tab(index)
            .is_some_and(|tab| tab.etag.is_none() && !tab.unsaved_changes);
        if needs_load {
            self.load_now(index);
        }
    }

    pub fn close_tab(&mut self, index: usize) -> Result<(), TabError> {
        self.dispatch(TabAction::Close(index))?;
        self.ensure_active_loaded();
        Ok(())
    }

    pub fn close_other_tabs(&mut self, index: usize) -> Result<usize, TabError> {
        let closed = match self.dispatch(TabAction::CloseOthers(index))? {
            TabOutcome::Closed(count) => count,
            _ => 0,
        };
        self.ensure_active_loaded();
        Ok(closed)
    }

    pub fn close_all_tabs(&mut self) -> usize {
        match self.dispatch(TabAction::CloseAll) {
            Ok(TabOutcome::Closed(count)) => count,
            _ => 0,
        }
    }

    pub fn reorder_tabs(&mut self, from: usize, to: usize) -> Result<(), TabError> {
        self.dispatch(TabAction::Reorder { from, to })?;
        Ok(())
    }

    pub fn edit_tab(&mut self, index: usize, content: impl Into<String>) -> Result<(), TabError> {
        self.edit_tab_at(index, content, Instant::now())
    }

    pub fn edit_tab_at(
        &mut self,
        index: usize,
        content: impl Into<String>,
        at: Instant,
    ) -> Result<(), TabError> {
        self.dispatch(TabAction::Edit {
            index,
            content: content.into(),
            at,
        })?;
        Ok(())
    }

    pub fn update_tab_path(&mut self, old_path: &str, new_path: &str) -> usize {
        let outcome = self.dispatch(TabAction::UpdatePath {
            old_path: normalize_path(old_path),
            new_path: normalize_path(new_path),
        });
        let updated = match outcome {
            Ok(TabOutcome::PathsUpdated(count)) => count,
            _ => 0,
        };
        if updated > 0 {
            self.log
                .info("tab.path_updated", &format!("{old_path} -> {new_path}"));
        }
        updated
    }

    /// Rewrites every tab below `old_folder` after a folder rename.
    pub fn update_tab_paths_under(&mut self, old_folder: &str, new_folder: &str) -> usize {
        let outcome = self.dispatch(TabAction::UpdatePathsUnder {
            old_folder: normalize_path(old_folder),
            new_folder: normalize_path(new_folder),
        });
        match outcome {
            Ok(TabOutcome::PathsUpdated(count)) => count,
            _ => 0,
        }
    }

    /// Waits for saves in flight on tabs at or below `path`, so a rename or
    /// delete cannot race a write to the old location.
    pub fn settle_saves_under(&mut self, path: &str) -> usize {
        let path = normalize_path(path);
        let busy = self
            .state
            .tabs()
            .iter()
            .any(|tab| tab.has_pending_save() && is_under(&tab.file.path, &path));
        if !busy {
            return 0;
        }
        self.log.info("save.awaited", &path);
        self.settle()
    }

    /// Syncs an open tab with content another writer just stored at `path`.
    /// Clean tabs adopt it; tabs with local edits go into conflict.
    pub fn apply_external_write(
        &mut self,
        path: &str,
        content: &str,
        encoding: Encoding,
        write: &WriteResult,
    ) {
        let outcome = self.dispatch(TabAction::ExternalWrite {
            path: normalize_path(path),
            content: content.to_string(),
            encoding,
            write: write.clone(),
        });
        self.report(Phase::Refresh, outcome);
    }

    pub fn close_tabs_by_path(&mut self, path: &str, is_folder: bool) -> usize {
        let outcome = self.dispatch(TabAction::CloseByPath {
            path: normalize_path(path),
            is_folder,
        });
        let closed = match outcome {
            Ok(TabOutcome::Closed(count)) => count,
            _ => 0,
        };
        if closed > 0 {
            self.log
                .info("tab.closed_by_path", &format!("{path}: {closed}"));
            self.ensure_active_loaded();
        }
        closed
    }

    pub fn save_tab(&mut self, index: usize) -> Result<SaveDispatch, TabError> {
        let tab = self.state.tab(index).ok_or(TabError::IndexOutOfRange {
            index,
            len: self.state.len(),
        })?;
        if let SaveState::Conflict(reason) = tab.save_state {
            self.log.warn(
                "save.blocked",
                &format!("{}: conflict {reason}", tab.file.path),
            );
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
        if !tab.unsaved_changes {
            return Ok(SaveDispatch::NothingToSave);
        }
        if tab.has_pending_refresh() || tab.has_pending_save() {
            self.dispatch(TabAction::QueueSave(index))?;
            return Ok(SaveDispatch::Queued);
        }
        self.start_save(index)?;
        Ok(SaveDispatch::Started)
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn start_refresh(&mut self, index: usize) {
        let request = self.next_request_id();
        if self
            .dispatch(TabAction::RefreshStarted { index, request })
            .is_err()
        {
            return;
        }
        let Some(tab) = self.state.tab(index) else {
            return;
        };
        let id = tab.id();
        let path = tab.file.path.clone();
        let files = Arc::clone(&self.files);
        let tx = self.completions_tx.clone();
        self.in_flight += 1;
        thread::spawn(move || {
            let result = match files.read_file(&path) {
                Ok(content) => RefreshResult::Fetched(content),
                Err(err) if err.is_not_found() => RefreshResult::NotFound,
                Err(err) => RefreshResult::Failed(err.to_string()),
            };
            let _ = tx.send(Completion {
                tab: id,
                request,
                kind: CompletionKind::Refresh(result),
            });
        });
    }

    fn start_save(&mut self, index: usize) -> Result<(), TabError> {
        let request = self.next_request_id();
        self.dispatch(TabAction::SaveStarted { index, request })?;
        let tab = &self.state.tabs()[index];
        let id = tab.id();
        let path = tab.file.path.clone();
        let content = tab.content.clone();
        let encoding = tab.encoding;
        let expected_etag = if tab.overwrites_on_save() {
            None
        } else {
            tab.etag.clone()
        };
        let files = Arc::clone(&self.files);
        let tx = self.completions_tx.clone();
        self.in_flight += 1;
        self.log.info("save.started", &path);
        thread::spawn(move || {
            let result =
                match files.write_file(&path, &content, encoding, expected_etag.as_deref()) {
                    Ok(write) => SaveResult::Written(write),
                    Err(FileServiceError::VersionMismatch { .. }) => SaveResult::VersionMismatch,
                    Err(err) => SaveResult::Failed(err.to_string()),
                };
            let _ = tx.send(Completion {
                tab: id,
                request,
                kind: CompletionKind::Save(result),
            });
        });
        Ok(())
    }

    /// Applies every response that has already arrived. Returns how many
    /// were processed.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            self.apply_completion(completion);
            applied += 1;
        }
        applied
    }

    /// Blocks until every in-flight request, including saves started from
    /// the queue while settling, has been applied.
    pub fn settle(&mut self) -> usize {
        let mut applied = 0;
        while self.in_flight > 0 {
            match self.completions_rx.recv_timeout(SETTLE_TIMEOUT) {
                Ok(completion) => {
                    self.apply_completion(completion);
                    applied += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.log.error(
                        "settle.timeout",
                        &format!("{} requests still in flight", self.in_flight),
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        applied
    }

    fn apply_completion(&mut self, completion: Completion) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let Completion { tab, request, kind } = completion;
        let (phase, outcome) = match kind {
            CompletionKind::Refresh(result) => (
                Phase::Refresh,
                self.dispatch(TabAction::RefreshResolved {
                    tab,
                    request,
                    result,
                }),
            ),
            CompletionKind::Save(result) => (
                Phase::Save,
                self.dispatch(TabAction::SaveResolved {
                    tab,
                    request,
                    result,
                }),
            ),
        };
        self.report(phase, outcome);
        self.start_queued_save(tab);
    }

    fn start_queued_save(&mut self, id: TabId) {
        let Some(index) = self.state.find_id(id) else {
            return;
        };
        let tab = &self.state.tabs()[index];
        if !tab.is_save_queued() || tab.has_pending_refresh() || tab.has_pending_save() {
            return;
        }
        if tab.save_state.is_conflict() || !tab.unsaved_changes {
            self.log.info("save.queued_dropped", &tab.file.path);
            let _ = self.dispatch(TabAction::CancelQueuedSave(index));
            return;
        }
        if let Err(err) = self.start_save(index) {
            self.log.warn("save.queued_failed", &err.to_string());
        }
    }

    fn report(&self, phase: Phase, outcome: Result<TabOutcome, TabError>) {
        let path_of = |index: usize| {
            self.state
                .tab(index)
                .map(|tab| tab.file.path.clone())
                .unwrap_or_default()
        };
        match outcome {
            Ok(TabOutcome::Adopted { index }) => {
                self.log.info("refresh.adopted", &path_of(index));
            }
            Ok(TabOutcome::Conflict { index, reason }) => {
                let path = path_of(index);
                self.log
                    .warn("tab.conflict", &format!("{path}: {reason}"));
                let message = match (phase, reason) {
                    (_, ConflictReason::PathNotFound) => {
                        format!("{path} no longer exists on the server")
                    }
                    (Phase::Refresh, ConflictReason::ContentChanged) => {
                        format!("{path} changed on the server while you were editing")
                    }
                    (Phase::Save, ConflictReason::ContentChanged) => {
                        format!("Save rejected: {path} changed on the server")
                    }
                };
                self.notifier
                    .info(&message, Some("resolve by keeping your changes or taking the server version"));
            }
            Ok(TabOutcome::RefreshFailed { index, message }) => {
                self.log
                    .warn("refresh.failed", &format!("{}: {message}", path_of(index)));
            }
            Ok(TabOutcome::Saved { index, still_dirty }) => {
                self.log.info(
                    "save.completed",
                    &format!("{} still_dirty={still_dirty}", path_of(index)),
                );
            }
            Ok(TabOutcome::SaveFailed { index, message }) => {
                let path = path_of(index);
                self.log
                    .error("save.failed", &format!("{path}: {message}"));
                self.notifier
                    .error(&format!("Failed to save {path}"), Some(&message));
            }
            Ok(TabOutcome::Dropped(reason)) => {
                self.log.info("response.dropped", reason.as_str());
            }
            Ok(_) => {}
            Err(err) => {
                self.log.error("tab.action_failed", &err.to_string());
            }
        }
    }

    pub fn resolve_conflict(&mut self, index: usize, action: ConflictAction) -> Result<(), TabError> {
        let tab = self.state.tab(index).ok_or(TabError::IndexOutOfRange {
            index,
            len: self.state.len(),
        })?;
        if !tab.save_state.is_conflict() {
            return Err(TabError::NotInConflict {
                path: tab.file.path.clone(),
            });
        }
        let path = tab.file.path.clone();

        match action {
            ConflictAction::AcceptServer => match self.files.read_file(&path) {
                Ok(content) => {
                    self.dispatch(TabAction::AcceptServer { index, content })?;
                    self.log.info("conflict.accept_server", &path);
                    Ok(())
                }
                Err(err) => {
                    let message = if err.is_not_found() {
                        format!("{path} no longer exists on the server")
                    } else {
                        format!("Failed to reload {path}")
                    };
                    self.notifier.error(&message, Some(&err.to_string()));
                    Err(err.into())
                }
            },
            ConflictAction::KeepLocal => {
                self.dispatch(TabAction::KeepLocal(index))?;
                self.log.info("conflict.keep_local", &path);
                Ok(())
            }
            ConflictAction::SaveAs { new_path } => {
                let new_path = normalize_path(&new_path);
                let content = tab.content.clone();
                let encoding = tab.encoding;
                let id = tab.id;
                if let Err(err) = self.check_save_as_target(id, &new_path) {
                    self.notifier
                        .error(&format!("Failed to save {new_path}"), Some(&err.to_string()));
                    return Err(err);
                }
                match self.files.write_file(&new_path, &content, encoding, None) {
                    Ok(write) => {
                        self.dispatch(TabAction::SavedAs {
                            index,
                            new_path: new_path.clone(),
                            write,
                        })?;
                        self.log
                            .info("conflict.save_as", &format!("{path} -> {new_path}"));
                        self.notifier
                            .success(&format!("Saved as {new_path}"), None);
                        Ok(())
                    }
                    Err(err) => {
                        self.notifier
                            .error(&format!("Failed to save {new_path}"), Some(&err.to_string()));
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Save-as never replaces an existing server file or another tab's
    /// unsaved edits.
    fn check_save_as_target(&self, id: TabId, new_path: &str) -> Result<(), TabError> {
        if let Some(target) = self.state.find(new_path).and_then(|index| self.state.tab(index)) {
            if target.id != id && target.unsaved_changes {
                return Err(TabError::TargetHasUnsavedChanges {
                    path: new_path.to_string(),
                });
            }
        }
        match self.files.read_file(new_path) {
            Ok(_) => Err(FileServiceError::AlreadyExists {
                path: new_path.to_string(),
            }
            .into()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Indices of dirty tabs whose last edit is older than the autosave
    /// delay.
    pub fn autosave_due(&self, now: Instant) -> Vec<usize> {
        if !self.autosave.enabled {
            return Vec::new();
        }
        self.state
            .tabs()
            .iter()
            .enumerate()
            .filter(|(_, tab)| {
                tab.save_state == SaveState::Dirty
                    && tab.unsaved_changes
                    && !tab.file.read_only
                    && !tab.has_pending_save()
                    && !tab.is_save_queued()
                    && tab
                        .last_edit()
                        .is_some_and(|at| now.saturating_duration_since(at) >= self.autosave.delay)
            })
            .map(|(index, _)| index)
            .collect()
    }

    pub fn run_autosave(&mut self, now: Instant) -> usize {
        let mut dispatched = 0;
        for index in self.autosave_due(now) {
            match self.save_tab(index) {
                Ok(SaveDispatch::Started | SaveDispatch::Queued) => dispatched += 1,
                Ok(SaveDispatch::NothingToSave) => {}
                Err(err) => self.log.warn("autosave.skipped", &err.to_string()),
            }
        }
        dispatched
    }
}
