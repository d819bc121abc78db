pub mod http;
pub mod memory;
pub mod path;
pub mod types;

pub use crate::shared::errors::FileServiceError;
pub use http::{HttpFileService, DEFAULT_FILE_API_BASE, FILE_API_BASE_ENV};
pub use memory::{MemoryFileService, MemoryOp};
pub use types::{DirEntry, Encoding, EntryKind, FileContent, WriteResult};

/// Remote workspace file storage with ETag-based optimistic concurrency.
///
/// Implementations must be callable from worker threads; the tab store runs
/// background reads and writes off the owning thread.
pub trait FileService: Send + Sync {
    fn read_file(&self, path: &str) -> Result<FileContent, FileServiceError>;

    /// Writes `content`, creating parent folders as needed. When
    /// `expected_etag` is set and the stored version differs the write is
    /// rejected with [`FileServiceError::VersionMismatch`].
    fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Encoding,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, FileServiceError>;

    fn rename_path(&self, old_path: &str, new_path: &str) -> Result<(), FileServiceError>;

    fn delete_path(&self, path: &str) -> Result<(), FileServiceError>;

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FileServiceError>;
}
