use super::{DirEntry, Encoding, FileContent, FileService, FileServiceError, WriteResult};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const FILE_API_BASE_ENV: &str = "TABSYNC_FILE_API_BASE";
pub const DEFAULT_FILE_API_BASE: &str = "http://127.0.0.1:8080/api";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Read,
    Write,
    Rename,
    Delete,
    List,
}

#[derive(Debug, Clone, Serialize)]
struct WriteRequest<'a> {
    path: &'a str,
    content: &'a str,
    encoding: Encoding,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_etag: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct ListResponse {
    #[serde(default)]
    entries: Vec<DirEntry>,
}

/// [`FileService`] over the console's REST file API.
#[derive(Debug, Clone)]
pub struct HttpFileService {
    api_base: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpFileService {
    pub fn new(api_base: &str, token: Option<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.filter(|v| !v.trim().is_empty()),
            agent: ureq::AgentBuilder::new().build(),
        }
    }

    /// Uses `TABSYNC_FILE_API_BASE` when set, otherwise `fallback_base` or the
    /// local default.
    pub fn from_env(fallback_base: Option<&str>, token: Option<String>) -> Self {
        let api_base = std::env::var(FILE_API_BASE_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| fallback_base.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_FILE_API_BASE.to_string());
        Self::new(&api_base, token)
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path)
    }

    fn endpoint_for_path(&self, endpoint: &str, path: &str) -> String {
        format!("{}?path={}", self.endpoint(endpoint), urlencoding::encode(path))
    }

    fn authorize(&self, request: ureq::Request) -> ureq::Request {
        let request = request.set("accept", "application/json");
        match self.token.as_deref() {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        }
    }
}

fn map_call_error(err: ureq::Error, op: Op, path: &str) -> FileServiceError {
    match err {
        ureq::Error::Status(404, _) => FileServiceError::NotFound {
            path: path.to_string(),
        },
        ureq::Error::Status(412, _) if op == Op::Write => FileServiceError::VersionMismatch {
            path: path.to_string(),
        },
        ureq::Error::Status(409, _) if op == Op::Write => FileServiceError::VersionMismatch {
            path: path.to_string(),
        },
        ureq::Error::Status(409, _) if op == Op::Rename => FileServiceError::AlreadyExists {
            path: path.to_string(),
        },
        ureq::Error::Status(status, response) => FileServiceError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => FileServiceError::Transport(transport.to_string()),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(response: ureq::Response) -> Result<T, FileServiceError> {
    response
        .into_json::<T>()
        .map_err(|e| FileServiceError::Decode(e.to_string()))
}

impl FileService for HttpFileService {
    fn read_file(&self, path: &str) -> Result<FileContent, FileServiceError> {
        let url = self.endpoint_for_path("files/content", path);
        let response = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(|e| map_call_error(e, Op::Read, path))?;
        decode(response)
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Encoding,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, FileServiceError> {
        let url = self.endpoint("files/content");
        let body = WriteRequest {
            path,
            content,
            encoding,
            expected_etag,
        };
        let response = self
            .authorize(self.agent.put(&url))
            .send_json(
                serde_json::to_value(&body).map_err(|e| FileServiceError::Decode(e.to_string()))?,
            )
            .map_err(|e| map_call_error(e, Op::Write, path))?;
        decode(response)
    }

    fn rename_path(&self, old_path: &str, new_path: &str) -> Result<(), FileServiceError> {
        let url = self.endpoint("files/rename");
        self.authorize(self.agent.post(&url))
            .send_json(json!({ "old_path": old_path, "new_path": new_path }))
            .map_err(|e| match map_call_error(e, Op::Rename, old_path) {
                FileServiceError::AlreadyExists { .. } => FileServiceError::AlreadyExists {
                    path: new_path.to_string(),
                },
                other => other,
            })?;
        Ok(())
    }

    fn delete_path(&self, path: &str) -> Result<(), FileServiceError> {
        let url = self.endpoint_for_path("files", path);
        self.authorize(self.agent.delete(&url))
            .call()
            .map_err(|e| map_call_error(e, Op::Delete, path))?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FileServiceError> {
        let url = self.endpoint_for_path("files/list", path);
        let response = self
            .authorize(self.agent.get(&url))
            .call()
            .map_err(|e| map_call_error(e, Op::List, path))?;
        let listing: ListResponse = decode(response)?;
        Ok(listing.entries)
    }
}
