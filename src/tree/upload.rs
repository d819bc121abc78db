use crate::files::Encoding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub path: String,
    pub content: String,
    pub encoding: Encoding,
}

impl UploadItem {
    pub fn text(path: &str, content: &str) -> Self {
        Self {
            path: path.to_string(),
            content: content.to_string(),
            encoding: Encoding::Utf8,
        }
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Aggregate progress of a multi-file upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadProgress {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    pub completed_bytes: u64,
    pub current: Option<String>,
    pub failed_paths: Vec<String>,
}

impl UploadProgress {
    pub fn new(items: &[UploadItem]) -> Self {
        Self {
            total_files: items.len(),
            total_bytes: items.iter().map(UploadItem::size).sum(),
            ..Self::default()
        }
    }

    pub fn start_file(&mut self, path: &str) {
        self.current = Some(path.to_string());
    }

    pub fn file_done(&mut self, size: u64) {
        self.completed_files += 1;
        self.completed_bytes += size;
        self.current = None;
    }

    /// Failed bytes count as processed so the percentage still reaches 100.
    pub fn file_failed(&mut self, path: &str, size: u64) {
        self.failed_files += 1;
        self.completed_bytes += size;
        self.failed_paths.push(path.to_string());
        self.current = None;
    }

    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            if self.total_files == 0 || self.is_finished() {
                return 100;
            }
            let done = self.completed_files + self.failed_files;
            return ((done * 100) / self.total_files) as u8;
        }
        ((self.completed_bytes.min(self.total_bytes) * 100) / self.total_bytes) as u8
    }

    pub fn is_finished(&self) -> bool {
        self.completed_files + self.failed_files >= self.total_files
    }
}
