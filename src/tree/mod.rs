//! Client-side copy of the workspace tree with two-phase optimistic updates.
//!
//! A mutation is applied locally as soon as it starts, marked provisional,
//! and later either confirmed with the server's view of the entries or
//! rolled back to the snapshot taken when it began.

pub mod ops;
pub mod upload;

use crate::files::path::{is_under, parent_path, rebase};
use crate::files::{DirEntry, EntryKind, FileServiceError};
use std::collections::BTreeMap;

pub use ops::TreeOps;
pub use upload::{UploadItem, UploadProgress};

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("no tree entry at `{path}`")]
    UnknownEntry { path: String },
    #[error("tree entry `{path}` already exists")]
    AlreadyExists { path: String },
    #[error("unknown tree mutation {0}")]
    UnknownMutation(u64),
    #[error(transparent)]
    File(#[from] FileServiceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<i64>,
    pub provisional: bool,
}

impl TreeEntry {
    fn provisional(path: &str, kind: EntryKind, size: u64) -> Self {
        Self {
            path: path.to_string(),
            kind,
            size,
            modified: None,
            provisional: true,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

impl From<DirEntry> for TreeEntry {
    fn from(entry: DirEntry) -> Self {
        Self {
            path: entry.path,
            kind: entry.kind,
            size: entry.size,
            modified: entry.modified,
            provisional: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Create { path: String },
    Rename { from: String, to: String },
    Delete { path: String },
    Upload { path: String },
}

#[derive(Debug, Clone)]
struct PendingMutation {
    kind: MutationKind,
    /// Previous value of every key the mutation touched, in touch order.
    snapshot: Vec<(String, Option<TreeEntry>)>,
    provisional_paths: Vec<String>,
}

impl PendingMutation {
    fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            snapshot: Vec::new(),
            provisional_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileTree {
    entries: BTreeMap<String, TreeEntry>,
    pending: BTreeMap<MutationId, PendingMutation>,
    next_mutation: u64,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = DirEntry>) -> Self {
        let mut tree = Self::new();
        tree.load_listing(entries);
        tree
    }

    /// Merges a server listing; provisional entries are left alone.
    pub fn load_listing(&mut self, entries: impl IntoIterator<Item = DirEntry>) {
        for entry in entries {
            let is_provisional = self
                .entries
                .get(&entry.path)
                .is_some_and(|existing| existing.provisional);
            if !is_provisional {
                self.entries.insert(entry.path.clone(), entry.into());
            }
        }
    }

    pub fn get(&self, path: &str) -> Option<&TreeEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn children(&self, folder: &str) -> Vec<&TreeEntry> {
        self.entries
            .values()
            .filter(|entry| parent_path(&entry.path) == Some(folder))
            .collect()
    }

    pub fn pending_mutations(&self) -> usize {
        self.pending.len()
    }

    fn allocate(&mut self, kind: MutationKind) -> (MutationId, PendingMutation) {
        self.next_mutation += 1;
        (MutationId(self.next_mutation), PendingMutation::new(kind))
    }

    fn touch(&self, pending: &mut PendingMutation, path: &str) {
        if pending.snapshot.iter().any(|(key, _)| key == path) {
            return;
        }
        pending
            .snapshot
            .push((path.to_string(), self.entries.get(path).cloned()));
    }

    fn nested_paths(&self, root: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| is_under(key.as_str(), root))
            .cloned()
            .collect()
    }

    pub fn begin_create(&mut self, path: &str, kind: EntryKind) -> Result<MutationId, TreeError> {
        if self.entries.contains_key(path) {
            return Err(TreeError::AlreadyExists {
                path: path.to_string(),
            });
        }
        let (id, mut pending) = self.allocate(MutationKind::Create {
            path: path.to_string(),
        });
        self.touch(&mut pending, path);
        self.entries
            .insert(path.to_string(), TreeEntry::provisional(path, kind, 0));
        pending.provisional_paths.push(path.to_string());
        self.pending.insert(id, pending);
        Ok(id)
    }

    /// Moves `from` (and everything below it, for folders) to `to`.
    pub fn begin_rename(&mut self, from: &str, to: &str) -> Result<MutationId, TreeError> {
        if !self.entries.contains_key(from) {
            return Err(TreeError::UnknownEntry {
                path: from.to_string(),
            });
        }
        if self.entries.contains_key(to) {
            return Err(TreeError::AlreadyExists {
                path: to.to_string(),
            });
        }
        let (id, mut pending) = self.allocate(MutationKind::Rename {
            from: from.to_string(),
            to: to.to_string(),
        });

        for old_path in self.nested_paths(from) {
            let Some(new_path) = rebase(&old_path, from, to) else {
                continue;
            };
            self.touch(&mut pending, &old_path);
            self.touch(&mut pending, &new_path);
            if let Some(mut entry) = self.entries.remove(&old_path) {
                entry.path = new_path.clone();
                entry.provisional = true;
                self.entries.insert(new_path.clone(), entry);
                pending.provisional_paths.push(new_path);
            }
        }
        self.pending.insert(id, pending);
        Ok(id)
    }

    pub fn begin_delete(&mut self, path: &str) -> Result<MutationId, TreeError> {
        if !self.entries.contains_key(path) {
            return Err(TreeError::UnknownEntry {
                path: path.to_string(),
            });
        }
        let (id, mut pending) = self.allocate(MutationKind::Delete {
            path: path.to_string(),
        });
        for nested in self.nested_paths(path) {
            self.touch(&mut pending, &nested);
            self.entries.remove(&nested);
        }
        self.pending.insert(id, pending);
        Ok(id)
    }

    /// Adds or replaces a file entry for an upload in progress.
    pub fn begin_upload(&mut self, path: &str, size: u64) -> MutationId {
        let (id, mut pending) = self.allocate(MutationKind::Upload {
            path: path.to_string(),
        });
        self.touch(&mut pending, path);
        self.entries.insert(
            path.to_string(),
            TreeEntry::provisional(path, EntryKind::File, size),
        );
        pending.provisional_paths.push(path.to_string());
        self.pending.insert(id, pending);
        id
    }

    /// Settles a mutation. Provisional entries become regular ones, taking
    /// size and timestamps from `confirmed` where the server reported them.
    pub fn confirm(&mut self, id: MutationId, confirmed: &[DirEntry]) -> Result<(), TreeError> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or(TreeError::UnknownMutation(id.0))?;
        for path in &pending.provisional_paths {
            let Some(entry) = self.entries.get_mut(path) else {
                continue;
            };
            entry.provisional = false;
            if let Some(server) = confirmed.iter().find(|server| &server.path == path) {
                entry.kind = server.kind;
                entry.size = server.size;
                entry.modified = server.modified;
            }
        }
        Ok(())
    }

    /// Restores every entry the mutation touched to its prior value.
    pub fn rollback(&mut self, id: MutationId) -> Result<MutationKind, TreeError> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or(TreeError::UnknownMutation(id.0))?;
        for (path, previous) in pending.snapshot.into_iter().rev() {
            match previous {
                Some(entry) => {
                    self.entries.insert(path, entry);
                }
                None => {
                    self.entries.remove(&path);
                }
            }
        }
        Ok(pending.kind)
    }
}
