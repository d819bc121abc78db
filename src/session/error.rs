use super::tab::ConflictReason;
use crate::files::FileServiceError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TabError {
    #[error("tab index {index} is out of range for {len} open tabs")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("tab `{path}` is not in conflict")]
    NotInConflict { path: String },
    #[error("tab `{path}` cannot be saved until its conflict ({reason}) is resolved")]
    SaveBlockedByConflict {
        path: String,
        reason: ConflictReason,
    },
    #[error("tab `{path}` has unsaved changes")]
    TargetHasUnsavedChanges { path: String },
    #[error("file `{path}` is read-only")]
    ReadOnly { path: String },
    #[error(transparent)]
    File(#[from] FileServiceError),
}
