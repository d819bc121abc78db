use super::{FileTree, TreeEntry, TreeError, UploadItem, UploadProgress};
use crate::files::path::normalize_path;
use crate::files::{DirEntry, Encoding, EntryKind, FileService, FileServiceError, WriteResult};
use crate::notify::Notifier;
use crate::session::{FileInfo, TabStore};
use std::sync::Arc;

fn written_entry(write: &WriteResult) -> DirEntry {
    DirEntry {
        path: write.path.clone(),
        kind: EntryKind::File,
        size: write.size,
        modified: write.modified,
    }
}

/// Runs file-tree mutations against the file service and keeps the open tabs
/// in step with them.
pub struct TreeOps<'a> {
    tree: &'a mut FileTree,
    tabs: &'a mut TabStore,
    files: Arc<dyn FileService>,
    notifier: Arc<dyn Notifier>,
}

impl<'a> TreeOps<'a> {
    pub fn new(tree: &'a mut FileTree, tabs: &'a mut TabStore) -> Self {
        let files = tabs.file_service();
        let notifier = tabs.notifier();
        Self {
            tree,
            tabs,
            files,
            notifier,
        }
    }

    pub fn refresh_folder(&mut self, folder: &str) -> Result<usize, TreeError> {
        let entries = self.files.list_dir(&normalize_path(folder))?;
        let count = entries.len();
        self.tree.load_listing(entries);
        Ok(count)
    }

    /// Creates an empty file and opens it in a tab. Returns the tab index.
    pub fn create_file(&mut self, path: &str) -> Result<usize, TreeError> {
        let path = normalize_path(path);
        let id = self.tree.begin_create(&path, EntryKind::File)?;
        // The tree only knows listed folders; ask the server before writing.
        let exists = match self.files.read_file(&path) {
            Ok(_) => Err(TreeError::AlreadyExists { path: path.clone() }),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        };
        if let Err(err) = exists {
            let _ = self.tree.rollback(id);
            self.notifier
                .error(&format!("Failed to create {path}"), Some(&err.to_string()));
            return Err(err);
        }
        match self.files.write_file(&path, "", Encoding::Utf8, None) {
            Ok(write) => {
                self.tree.confirm(id, &[written_entry(&write)])?;
                let index = self.tabs.set_open_file(
                    FileInfo::from_path(&path),
                    String::new(),
                    Encoding::Utf8,
                    Some(write.etag),
                );
                self.notifier.success(&format!("Created {path}"), None);
                Ok(index)
            }
            Err(err) => {
                let _ = self.tree.rollback(id);
                self.notifier
                    .error(&format!("Failed to create {path}"), Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Renames a file or folder. Returns how many open tabs were repointed.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<usize, TreeError> {
        let old_path = normalize_path(old_path);
        let new_path = normalize_path(new_path);
        let is_folder = self.tree.get(&old_path).map(TreeEntry::is_folder);
        self.tabs.settle_saves_under(&old_path);
        // Entries not listed yet are renamed on the server only.
        let mutation = match is_folder {
            Some(_) => Some(self.tree.begin_rename(&old_path, &new_path)?),
            None => None,
        };

        match self.files.rename_path(&old_path, &new_path) {
            Ok(()) => {
                if let Some(id) = mutation {
                    self.tree.confirm(id, &[])?;
                }
                let updated = match is_folder {
                    Some(false) => self.tabs.update_tab_path(&old_path, &new_path),
                    _ => self.tabs.update_tab_paths_under(&old_path, &new_path),
                };
                self.notifier
                    .success(&format!("Renamed {old_path} to {new_path}"), None);
                Ok(updated)
            }
            Err(err) => {
                if let Some(id) = mutation {
                    let _ = self.tree.rollback(id);
                }
                self.notifier
                    .error(&format!("Failed to rename {old_path}"), Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Deletes a file or folder. Returns how many open tabs were closed.
    pub fn delete(&mut self, path: &str) -> Result<usize, TreeError> {
        let path = normalize_path(path);
        let is_folder = self.tree.get(&path).map(TreeEntry::is_folder);
        self.tabs.settle_saves_under(&path);
        let mutation = match is_folder {
            Some(_) => Some(self.tree.begin_delete(&path)?),
            None => None,
        };

        match self.files.delete_path(&path) {
            Ok(()) | Err(FileServiceError::NotFound { .. }) => {
                if let Some(id) = mutation {
                    self.tree.confirm(id, &[])?;
                }
                let closed = self
                    .tabs
                    .close_tabs_by_path(&path, is_folder.unwrap_or(true));
                let details = (closed > 0).then(|| format!("closed {closed} open tab(s)"));
                self.notifier
                    .success(&format!("Deleted {path}"), details.as_deref());
                Ok(closed)
            }
            Err(err) => {
                if let Some(id) = mutation {
                    let _ = self.tree.rollback(id);
                }
                self.notifier
                    .error(&format!("Failed to delete {path}"), Some(&err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Uploads files one by one, reporting progress after every step.
    /// Failed files are rolled back individually.
    pub fn upload(
        &mut self,
        items: &[UploadItem],
        mut on_progress: impl FnMut(&UploadProgress),
    ) -> UploadProgress {
        let mut progress = UploadProgress::new(items);
        let pending: Vec<_> = items
            .iter()
            .map(|item| (self.tree.begin_upload(&item.path, item.size()), item))
            .collect();
        on_progress(&progress);

        for (id, item) in pending {
            progress.start_file(&item.path);
            on_progress(&progress);
            match self
                .files
                .write_file(&item.path, &item.content, item.encoding, None)
            {
                Ok(write) => {
                    let _ = self.tree.confirm(id, &[written_entry(&write)]);
                    self.tabs
                        .apply_external_write(&item.path, &item.content, item.encoding, &write);
                    progress.file_done(item.size());
                }
                Err(err) => {
                    let _ = self.tree.rollback(id);
                    self.tabs
                        .log()
                        .warn("upload.failed", &format!("{}: {err}", item.path));
                    progress.file_failed(&item.path, item.size());
                }
            }
            on_progress(&progress);
        }

        if progress.failed_files == 0 {
            self.notifier.success(
                &format!("Uploaded {} file(s)", progress.completed_files),
                None,
            );
        } else {
            self.notifier.error(
                &format!(
                    "Failed to upload {} of {} file(s)",
                    progress.failed_files, progress.total_files
                ),
                Some(&progress.failed_paths.join(", ")),
            );
        }
        progress
    }
}
