use super::path::{is_under, parent_path, rebase};
use super::{DirEntry, Encoding, EntryKind, FileContent, FileService, FileServiceError, WriteResult};
use crate::shared::hash::content_etag;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    Read,
    Write,
    Rename,
    Delete,
}

#[derive(Debug, Clone)]
struct StoredFile {
    content: String,
    encoding: Encoding,
    etag: String,
    modified: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, StoredFile>,
    folders: BTreeSet<String>,
    clock: i64,
    failures: VecDeque<(MemoryOp, String, FileServiceError)>,
    calls: Vec<(MemoryOp, String)>,
}

impl MemoryState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn take_failure(&mut self, op: MemoryOp, path: &str) -> Option<FileServiceError> {
        let position = self
            .failures
            .iter()
            .position(|(failure_op, failure_path, _)| *failure_op == op && failure_path == path)?;
        self.failures.remove(position).map(|(_, _, err)| err)
    }

    fn add_parents(&mut self, path: &str) {
        let mut current = parent_path(path);
        while let Some(parent) = current {
            if parent == "/" || !self.folders.insert(parent.to_string()) {
                break;
            }
            current = parent_path(parent);
        }
    }

    fn store(&mut self, path: &str, content: &str, encoding: Encoding) -> WriteResult {
        let modified = self.tick();
        let etag = content_etag(&format!("{}:{content}", encoding.as_str()));
        self.files.insert(
            path.to_string(),
            StoredFile {
                content: content.to_string(),
                encoding,
                etag: etag.clone(),
                modified,
            },
        );
        self.add_parents(path);
        WriteResult {
            path: path.to_string(),
            size: content.len() as u64,
            modified: Some(modified),
            etag,
        }
    }
}

/// Thread-safe in-process [`FileService`]. ETags are content digests, so
/// writing identical content yields the same version.
#[derive(Debug, Default)]
pub struct MemoryFileService {
    inner: Mutex<MemoryState>,
}

impl MemoryFileService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, FileServiceError> {
        self.inner
            .lock()
            .map_err(|_| FileServiceError::Transport("memory file service lock poisoned".into()))
    }

    /// Stores `content` directly, as an out-of-band edit by another client
    /// would. Returns the new ETag.
    pub fn put_file(&self, path: &str, content: &str) -> String {
        match self.lock() {
            Ok(mut state) => state.store(path, content, Encoding::Utf8).etag,
            Err(_) => String::new(),
        }
    }

    pub fn remove_file(&self, path: &str) -> bool {
        self.lock()
            .map(|mut state| state.files.remove(path).is_some())
            .unwrap_or(false)
    }

    pub fn content_of(&self, path: &str) -> Option<String> {
        let state = self.lock().ok()?;
        state.files.get(path).map(|file| file.content.clone())
    }

    pub fn etag_of(&self, path: &str) -> Option<String> {
        let state = self.lock().ok()?;
        state.files.get(path).map(|file| file.etag.clone())
    }

    /// Queues a one-shot failure for the next `op` against `path`.
    pub fn inject_failure(&self, op: MemoryOp, path: &str, error: FileServiceError) {
        if let Ok(mut state) = self.lock() {
            state.failures.push_back((op, path.to_string(), error));
        }
    }

    pub fn calls(&self) -> Vec<(MemoryOp, String)> {
        self.lock().map(|state| state.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, op: MemoryOp) -> usize {
        self.calls().iter().filter(|(call, _)| *call == op).count()
    }
}

impl FileService for MemoryFileService {
    fn read_file(&self, path: &str) -> Result<FileContent, FileServiceError> {
        let mut state = self.lock()?;
        state.calls.push((MemoryOp::Read, path.to_string()));
        if let Some(err) = state.take_failure(MemoryOp::Read, path) {
            return Err(err);
        }
        let file = state
            .files
            .get(path)
            .ok_or_else(|| FileServiceError::NotFound {
                path: path.to_string(),
            })?;
        Ok(FileContent {
            path: path.to_string(),
            content: file.content.clone(),
            encoding: file.encoding,
            etag: file.etag.clone(),
            size: file.content.len() as u64,
            modified: Some(file.modified),
        })
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Encoding,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, FileServiceError> {
        let mut state = self.lock()?;
        state.calls.push((MemoryOp::Write, path.to_string()));
        if let Some(err) = state.take_failure(MemoryOp::Write, path) {
            return Err(err);
        }
        if let (Some(expected), Some(current)) = (expected_etag, state.files.get(path)) {
            if current.etag != expected {
                return Err(FileServiceError::VersionMismatch {
                    path: path.to_string(),
                });
            }
        }
        Ok(state.store(path, content, encoding))
    }

    fn rename_path(&self, old_path: &str, new_path: &str) -> Result<(), FileServiceError> {
        let mut state = self.lock()?;
        state.calls.push((MemoryOp::Rename, old_path.to_string()));
        if let Some(err) = state.take_failure(MemoryOp::Rename, old_path) {
            return Err(err);
        }
        if state.files.contains_key(new_path) || state.folders.contains(new_path) {
            return Err(FileServiceError::AlreadyExists {
                path: new_path.to_string(),
            });
        }

        if let Some(file) = state.files.remove(old_path) {
            state.files.insert(new_path.to_string(), file);
            state.add_parents(new_path);
            return Ok(());
        }
        if !state.folders.contains(old_path) {
            return Err(FileServiceError::NotFound {
                path: old_path.to_string(),
            });
        }

        let moved_files: Vec<String> = state
            .files
            .keys()
            .filter(|key| is_under(key.as_str(), old_path))
            .cloned()
            .collect();
        for key in moved_files {
            if let (Some(file), Some(target)) =
                (state.files.remove(&key), rebase(&key, old_path, new_path))
            {
                state.files.insert(target, file);
            }
        }
        let moved_folders: Vec<String> = state
            .folders
            .iter()
            .filter(|key| is_under(key.as_str(), old_path))
            .cloned()
            .collect();
        for key in moved_folders {
            state.folders.remove(&key);
            if let Some(target) = rebase(&key, old_path, new_path) {
                state.folders.insert(target);
            }
        }
        state.add_parents(new_path);
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<(), FileServiceError> {
        let mut state = self.lock()?;
        state.calls.push((MemoryOp::Delete, path.to_string()));
        if let Some(err) = state.take_failure(MemoryOp::Delete, path) {
            return Err(err);
        }
        if state.files.remove(path).is_some() {
            return Ok(());
        }
        if !state.folders.remove(path) {
            return Err(FileServiceError::NotFound {
                path: path.to_string(),
            });
        }
        state.files.retain(|key, _| !is_under(key, path));
        state.folders.retain(|key| !is_under(key, path));
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FileServiceError> {
        let state = self.lock()?;
        let is_child = |candidate: &str| parent_path(candidate) == Some(path);

        let mut entries: Vec<DirEntry> = state
            .folders
            .iter()
            .filter(|folder| is_child(folder.as_str()))
            .map(|folder| DirEntry {
                path: folder.clone(),
                kind: EntryKind::Folder,
                size: 0,
                modified: None,
            })
            .collect();
        entries.extend(
            state
                .files
                .iter()
                .filter(|(key, _)| is_child(key.as_str()))
                .map(|(key, file)| DirEntry {
                    path: key.clone(),
                    kind: EntryKind::File,
                    size: file.content.len() as u64,
                    modified: Some(file.modified),
                }),
        );
        Ok(entries)
    }
}
