use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use tabsync::files::{
    EntryKind, Encoding, FileService, FileServiceError, HttpFileService, FILE_API_BASE_ENV,
};
use tabsync::notify::RecordingNotifier;
use tabsync::session::{SaveDispatch, SaveState, TabStore};

static ENV_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: String,
    path: String,
    auth_header: String,
    body: String,
}

struct MockFileServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: Option<thread::JoinHandle<()>>,
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        409 => "Conflict",
        412 => "Precondition Failed",
        _ => "Internal Server Error",
    }
}

impl MockFileServer {
    fn start<F>(expected_requests: usize, responder: F) -> Self
    where
        F: Fn(&str, &str) -> (u16, String) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);
        let responder = Arc::new(responder);

        let handle = thread::spawn(move || {
            for _ in 0..expected_requests {
                let (mut stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

                let mut request_line = String::new();
                reader
                    .read_line(&mut request_line)
                    .expect("read request line");
                let mut parts = request_line.split_whitespace();
                let method = parts.next().unwrap_or("GET").to_string();
                let path = parts.next().unwrap_or("/").to_string();

                let mut auth_header = String::new();
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header");
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if lower.starts_with("authorization:") {
                        auth_header = line
                            .split_once(':')
                            .map(|(_, v)| v.trim().to_string())
                            .unwrap_or_default();
                    }
                    if lower.starts_with("content-length:") {
                        content_length = line
                            .split_once(':')
                            .map(|(_, v)| v.trim().parse::<usize>().unwrap_or(0))
                            .unwrap_or(0);
                    }
                }

                let mut body = vec![0_u8; content_length];
                if content_length > 0 {
                    reader.read_exact(&mut body).expect("read body");
                }
                let body = String::from_utf8_lossy(&body).to_string();

                requests_for_thread
                    .lock()
                    .expect("lock requests")
                    .push(RecordedRequest {
                        method: method.clone(),
                        path: path.clone(),
                        auth_header,
                        body,
                    });

                let (status, response_body) = responder(&method, &path);
                let response = format!(
                    "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    reason_phrase(status),
                    response_body.len(),
                    response_body
                );
                stream
                    .write_all(response.as_bytes())
                    .expect("write response");
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
            handle: Some(handle),
        }
    }

    fn finish(mut self) -> Vec<RecordedRequest> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("join mock server");
        }
        self.requests.lock().expect("lock requests").clone()
    }
}

fn json_body(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).expect("json body")
}

#[test]
fn read_file_sends_bearer_token_and_decodes_content() {
    let server = MockFileServer::start(1, |_, _| {
        (
            200,
            r#"{"path":"/flows/etl.py","content":"run()","encoding":"utf-8","etag":"v7","size":5,"modified":1700000000}"#
                .to_string(),
        )
    });
    let files = HttpFileService::new(&format!("{}/api/", server.base_url), Some("secret".into()));
    assert_eq!(files.api_base(), format!("{}/api", server.base_url));

    let content = files.read_file("/flows/etl.py").expect("read");
    assert_eq!(content.content, "run()");
    assert_eq!(content.etag, "v7");
    assert_eq!(content.encoding, Encoding::Utf8);
    assert_eq!(content.modified, Some(1_700_000_000));

    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(
        requests[0].path,
        "/api/files/content?path=%2Fflows%2Fetl.py"
    );
    assert_eq!(requests[0].auth_header, "Bearer secret");
}

#[test]
fn missing_file_maps_to_not_found() {
    let server = MockFileServer::start(1, |_, _| (404, r#"{"error":"missing"}"#.to_string()));
    let files = HttpFileService::new(&server.base_url, None);

    let err = files.read_file("/gone.py").expect_err("missing");
    assert_eq!(
        err,
        FileServiceError::NotFound {
            path: "/gone.py".to_string()
        }
    );
    let requests = server.finish();
    assert!(requests[0].auth_header.is_empty());
}

#[test]
fn write_sends_expected_version_and_decodes_result() {
    let server = MockFileServer::start(2, |_, _| {
        (
            200,
            r#"{"path":"/notes.md","size":5,"modified":12,"etag":"v2"}"#.to_string(),
        )
    });
    let files = HttpFileService::new(&server.base_url, Some("secret".into()));

    let write = files
        .write_file("/notes.md", "hello", Encoding::Utf8, Some("v1"))
        .expect("write");
    assert_eq!(write.etag, "v2");
    assert_eq!(write.size, 5);
    files
        .write_file("/notes.md", "aGk=", Encoding::Base64, None)
        .expect("overwrite");

    let requests = server.finish();
    assert_eq!(requests[0].method, "PUT");
    assert_eq!(requests[0].path, "/files/content");
    assert_eq!(
        json_body(&requests[0].body),
        serde_json::json!({
            "path": "/notes.md",
            "content": "hello",
            "encoding": "utf-8",
            "expected_etag": "v1"
        })
    );
    let overwrite = json_body(&requests[1].body);
    assert_eq!(overwrite["encoding"], "base64");
    assert!(overwrite.get("expected_etag").is_none());
}

#[test]
fn stale_version_statuses_map_to_version_mismatch() {
    let server = MockFileServer::start(2, |_, _| (412, String::new()));
    let files = HttpFileService::new(&server.base_url, None);

    for _ in 0..2 {
        let err = files
            .write_file("/a.py", "x", Encoding::Utf8, Some("old"))
            .expect_err("stale");
        assert_eq!(
            err,
            FileServiceError::VersionMismatch {
                path: "/a.py".to_string()
            }
        );
    }
    server.finish();

    let server = MockFileServer::start(1, |_, _| (409, String::new()));
    let files = HttpFileService::new(&server.base_url, None);
    assert!(matches!(
        files.write_file("/a.py", "x", Encoding::Utf8, Some("old")),
        Err(FileServiceError::VersionMismatch { .. })
    ));
    server.finish();
}

#[test]
fn rename_conflict_reports_target_path() {
    let server = MockFileServer::start(1, |_, _| (409, r#"{"error":"exists"}"#.to_string()));
    let files = HttpFileService::new(&server.base_url, None);

    let err = files
        .rename_path("/a.py", "/b.py")
        .expect_err("target exists");
    assert_eq!(
        err,
        FileServiceError::AlreadyExists {
            path: "/b.py".to_string()
        }
    );

    let requests = server.finish();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].path, "/files/rename");
    assert_eq!(
        json_body(&requests[0].body),
        serde_json::json!({"old_path": "/a.py", "new_path": "/b.py"})
    );
}

#[test]
fn delete_failure_keeps_status_and_body() {
    let server = MockFileServer::start(1, |_, _| (500, "disk on fire".to_string()));
    let files = HttpFileService::new(&server.base_url, None);

    let err = files.delete_path("/tmp dir").expect_err("server error");
    assert_eq!(
        err,
        FileServiceError::Status {
            status: 500,
            body: "disk on fire".to_string()
        }
    );
    let requests = server.finish();
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[0].path, "/files?path=%2Ftmp%20dir");
}

#[test]
fn list_dir_decodes_entries_and_rejects_bad_json() {
    let server = MockFileServer::start(2, |_, path| {
        if path.ends_with("%2Fflows") {
            (
                200,
                r#"{"entries":[{"path":"/flows/lib","kind":"folder"},{"path":"/flows/etl.py","kind":"file","size":42}]}"#
                    .to_string(),
            )
        } else {
            (200, "not json".to_string())
        }
    });
    let files = HttpFileService::new(&server.base_url, None);

    let entries = files.list_dir("/flows").expect("list");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].kind, EntryKind::Folder);
    assert_eq!(entries[1].size, 42);

    assert!(matches!(
        files.list_dir("/broken"),
        Err(FileServiceError::Decode(_))
    ));
    server.finish();
}

#[test]
fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let files = HttpFileService::new(&format!("http://{addr}"), None);
    assert!(matches!(
        files.read_file("/a.py"),
        Err(FileServiceError::Transport(_))
    ));
}

#[test]
fn env_base_url_overrides_fallback() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner());
    std::env::set_var(FILE_API_BASE_ENV, "http://files.internal:9000/api/");
    let files = HttpFileService::from_env(Some("http://fallback"), None);
    assert_eq!(files.api_base(), "http://files.internal:9000/api");

    std::env::remove_var(FILE_API_BASE_ENV);
    let files = HttpFileService::from_env(Some("http://fallback"), None);
    assert_eq!(files.api_base(), "http://fallback");
}

#[test]
fn tab_store_saves_through_http_service() {
    let server = MockFileServer::start(2, |method, _| match method {
        "GET" => (
            200,
            r#"{"path":"/job.py","content":"v = 1","encoding":"utf-8","etag":"e1","size":5}"#
                .to_string(),
        ),
        _ => (
            200,
            r#"{"path":"/job.py","size":5,"modified":99,"etag":"e2"}"#.to_string(),
        ),
    });
    let files: Arc<dyn FileService> =
        Arc::new(HttpFileService::new(&server.base_url, Some("tok".into())));
    let notifier = RecordingNotifier::new();
    let mut store = TabStore::new(files, Arc::new(notifier.clone()));

    store.open_path("/job.py").expect("open");
    store.edit_tab(0, "v = 2").expect("edit");
    assert_eq!(store.save_tab(0).expect("save"), SaveDispatch::Started);
    store.settle();

    let tab = store.tab(0).expect("tab");
    assert_eq!(tab.save_state, SaveState::Saved);
    assert_eq!(tab.etag.as_deref(), Some("e2"));
    assert_eq!(tab.file.modified, Some(99));
    assert!(notifier.entries().is_empty());

    let requests = server.finish();
    assert_eq!(requests[1].method, "PUT");
    assert_eq!(json_body(&requests[1].body)["expected_etag"], "e1");
    assert!(requests
        .iter()
        .all(|request| request.auth_header == "Bearer tok"));
}
