use sha2::{Digest, Sha256};

/// Short hex digest of file content, used as an ETag by the in-memory file
/// service.
pub fn content_etag(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>()
}
