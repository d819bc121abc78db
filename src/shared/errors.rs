#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileServiceError {
    #[error("file `{path}` was not found")]
    NotFound { path: String },
    #[error("file `{path}` changed on the server since it was last read")]
    VersionMismatch { path: String },
    #[error("path `{path}` already exists")]
    AlreadyExists { path: String },
    #[error("file service responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("file service request failed: {0}")]
    Transport(String),
    #[error("failed to decode file service response: {0}")]
    Decode(String),
}

impl FileServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
