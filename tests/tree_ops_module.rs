use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;
use tabsync::files::{
    DirEntry, Encoding, FileContent, FileService, FileServiceError, MemoryFileService, MemoryOp,
    WriteResult,
};
use tabsync::notify::{NotificationLevel, RecordingNotifier};
use tabsync::session::{ConflictReason, SaveDispatch, SaveState, TabError, TabStore};
use tabsync::tree::{FileTree, TreeError, TreeOps, UploadItem};

struct Workspace {
    files: Arc<MemoryFileService>,
    notifier: RecordingNotifier,
    store: TabStore,
    tree: FileTree,
}

fn workspace() -> Workspace {
    let files = Arc::new(MemoryFileService::new());
    files.put_file("/flows/etl.py", "extract()");
    files.put_file("/flows/lib/util.py", "def helper(): pass");
    files.put_file("/readme.md", "# readme");
    let notifier = RecordingNotifier::new();
    let service: Arc<dyn FileService> = files.clone();
    let store = TabStore::new(service, Arc::new(notifier.clone()));
    let mut ws = Workspace {
        files,
        notifier,
        store,
        tree: FileTree::new(),
    };
    let mut ops = TreeOps::new(&mut ws.tree, &mut ws.store);
    ops.refresh_folder("/").expect("list root");
    ops.refresh_folder("/flows").expect("list flows");
    ws
}

#[test]
fn refresh_folder_merges_direct_children() {
    let ws = workspace();
    let root: Vec<&str> = ws
        .tree
        .children("/")
        .into_iter()
        .map(|entry| entry.path.as_str())
        .collect();
    assert_eq!(root, vec!["/flows", "/readme.md"]);
    assert!(ws.tree.get("/flows").expect("folder").is_folder());
    assert!(ws.tree.contains("/flows/lib"));
    assert!(!ws.tree.contains("/flows/lib/util.py"));
}

#[test]
fn create_file_confirms_entry_and_opens_tab() {
    let mut ws = workspace();
    let index = TreeOps::new(&mut ws.tree, &mut ws.store)
        .create_file("/flows/new.py")
        .expect("create");

    let entry = ws.tree.get("/flows/new.py").expect("entry");
    assert!(!entry.provisional);
    assert_eq!(ws.tree.pending_mutations(), 0);
    let tab = ws.store.tab(index).expect("tab");
    assert_eq!(tab.path(), "/flows/new.py");
    assert_eq!(tab.etag, ws.files.etag_of("/flows/new.py"));
    assert_eq!(ws.store.active_index(), Some(index));
    assert_eq!(ws.files.content_of("/flows/new.py").as_deref(), Some(""));
    assert_eq!(ws.notifier.count(NotificationLevel::Success), 1);
}

#[test]
fn failed_create_rolls_back_provisional_entry() {
    let mut ws = workspace();
    ws.files.inject_failure(
        MemoryOp::Write,
        "/flows/new.py",
        FileServiceError::Transport("offline".to_string()),
    );

    let err = TreeOps::new(&mut ws.tree, &mut ws.store)
        .create_file("/flows/new.py")
        .expect_err("offline");
    assert!(matches!(err, TreeError::File(FileServiceError::Transport(_))));
    assert!(!ws.tree.contains("/flows/new.py"));
    assert_eq!(ws.tree.pending_mutations(), 0);
    assert!(ws.store.tabs().is_empty());
    assert_eq!(ws.notifier.count(NotificationLevel::Error), 1);
}

#[test]
fn create_over_known_entry_is_rejected_before_writing() {
    let mut ws = workspace();
    let err = TreeOps::new(&mut ws.tree, &mut ws.store)
        .create_file("/readme.md")
        .expect_err("exists");
    assert!(matches!(err, TreeError::AlreadyExists { .. }));
    assert_eq!(ws.files.call_count(MemoryOp::Write), 0);
}

#[test]
fn create_over_unlisted_server_file_keeps_its_content() {
    let mut ws = workspace();
    ws.files.put_file("/flows/new.py", "important()");

    let err = TreeOps::new(&mut ws.tree, &mut ws.store)
        .create_file("/flows/new.py")
        .expect_err("exists on server");

    assert!(matches!(err, TreeError::AlreadyExists { .. }));
    assert_eq!(
        ws.files.content_of("/flows/new.py").as_deref(),
        Some("important()")
    );
    assert_eq!(ws.files.call_count(MemoryOp::Write), 0);
    assert!(!ws.tree.contains("/flows/new.py"));
    assert_eq!(ws.tree.pending_mutations(), 0);
    assert!(ws.store.tabs().is_empty());
    assert_eq!(ws.notifier.count(NotificationLevel::Error), 1);
}

#[test]
fn file_rename_repoints_tab_without_reload() {
    let mut ws = workspace();
    ws.store.open_path("/flows/etl.py").expect("open");
    ws.store.edit_tab(0, "extract(fast=True)").expect("edit");
    let reads = ws.files.call_count(MemoryOp::Read);

    let updated = TreeOps::new(&mut ws.tree, &mut ws.store)
        .rename("/flows/etl.py", "/flows/extract.py")
        .expect("rename");

    assert_eq!(updated, 1);
    let tab = ws.store.tab(0).expect("tab");
    assert_eq!(tab.path(), "/flows/extract.py");
    assert_eq!(tab.content, "extract(fast=True)");
    assert!(tab.unsaved_changes);
    assert_eq!(ws.files.call_count(MemoryOp::Read), reads);
    assert!(ws.tree.contains("/flows/extract.py"));
    assert!(!ws.tree.contains("/flows/etl.py"));
    assert_eq!(
        ws.files.content_of("/flows/extract.py").as_deref(),
        Some("extract()")
    );
}

#[test]
fn folder_rename_repoints_every_nested_tab() {
    let mut ws = workspace();
    for path in ["/flows/etl.py", "/flows/lib/util.py", "/readme.md"] {
        ws.store.open_path(path).expect("open");
    }

    let updated = TreeOps::new(&mut ws.tree, &mut ws.store)
        .rename("/flows", "/jobs")
        .expect("rename");

    assert_eq!(updated, 2);
    assert_eq!(
        ws.store.state().paths(),
        vec!["/jobs/etl.py", "/jobs/lib/util.py", "/readme.md"]
    );
    assert!(ws.tree.contains("/jobs/lib"));
    assert!(ws.tree.contains("/jobs/etl.py"));
    assert!(!ws.tree.contains("/flows"));
    assert!(ws.files.content_of("/jobs/lib/util.py").is_some());
}

#[test]
fn failed_rename_restores_tree_and_tabs() {
    let mut ws = workspace();
    ws.store.open_path("/flows/etl.py").expect("open");
    ws.files.inject_failure(
        MemoryOp::Rename,
        "/flows",
        FileServiceError::Status {
            status: 503,
            body: "busy".to_string(),
        },
    );

    TreeOps::new(&mut ws.tree, &mut ws.store)
        .rename("/flows", "/jobs")
        .expect_err("busy");

    assert!(ws.tree.contains("/flows/etl.py"));
    assert!(!ws.tree.get("/flows/etl.py").expect("entry").provisional);
    assert!(!ws.tree.contains("/jobs"));
    assert_eq!(ws.store.tab(0).expect("tab").path(), "/flows/etl.py");
    let error = ws.notifier.last().expect("notification");
    assert_eq!(error.level, NotificationLevel::Error);
    assert!(error.details.unwrap_or_default().contains("busy"));
}

#[test]
fn folder_delete_closes_nested_tabs_and_reports_count() {
    let mut ws = workspace();
    for path in ["/flows/etl.py", "/flows/lib/util.py", "/readme.md"] {
        ws.store.open_path(path).expect("open");
    }

    let closed = TreeOps::new(&mut ws.tree, &mut ws.store)
        .delete("/flows")
        .expect("delete");

    assert_eq!(closed, 2);
    assert_eq!(ws.store.state().paths(), vec!["/readme.md"]);
    assert!(!ws.tree.contains("/flows/lib"));
    let success = ws.notifier.last().expect("notification");
    assert_eq!(success.level, NotificationLevel::Success);
    assert_eq!(success.details.as_deref(), Some("closed 2 open tab(s)"));
}

#[test]
fn deleting_file_already_gone_on_server_still_closes_tab() {
    let mut ws = workspace();
    ws.store.open_path("/readme.md").expect("open");
    ws.files.remove_file("/readme.md");

    let closed = TreeOps::new(&mut ws.tree, &mut ws.store)
        .delete("/readme.md")
        .expect("delete");

    assert_eq!(closed, 1);
    assert!(ws.store.tabs().is_empty());
    assert!(!ws.tree.contains("/readme.md"));
}

#[test]
fn failed_delete_restores_entries_and_keeps_tabs() {
    let mut ws = workspace();
    ws.store.open_path("/flows/etl.py").expect("open");
    ws.files.inject_failure(
        MemoryOp::Delete,
        "/flows",
        FileServiceError::Transport("reset".to_string()),
    );

    TreeOps::new(&mut ws.tree, &mut ws.store)
        .delete("/flows")
        .expect_err("reset");

    assert!(ws.tree.contains("/flows/lib"));
    assert!(ws.tree.contains("/flows/etl.py"));
    assert_eq!(ws.store.tabs().len(), 1);
}

#[test]
fn upload_reports_progress_and_rolls_back_failed_files() {
    let mut ws = workspace();
    ws.files.inject_failure(
        MemoryOp::Write,
        "/data/b.csv",
        FileServiceError::Status {
            status: 413,
            body: "too large".to_string(),
        },
    );
    let items = vec![
        UploadItem::text("/data/a.csv", "id\n1\n"),
        UploadItem::text("/data/b.csv", "id\n2\n3\n"),
    ];
    let mut seen = Vec::new();

    let progress = TreeOps::new(&mut ws.tree, &mut ws.store)
        .upload(&items, |progress| seen.push(progress.percent()));

    assert_eq!(progress.completed_files, 1);
    assert_eq!(progress.failed_files, 1);
    assert_eq!(progress.failed_paths, vec!["/data/b.csv".to_string()]);
    assert_eq!(progress.percent(), 100);
    assert!(progress.is_finished());
    assert_eq!(seen.len(), 5);
    assert_eq!(seen.first(), Some(&0));
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));

    assert!(ws.tree.contains("/data/a.csv"));
    assert!(!ws.tree.get("/data/a.csv").expect("entry").provisional);
    assert!(!ws.tree.contains("/data/b.csv"));
    assert_eq!(ws.tree.pending_mutations(), 0);
    let error = ws.notifier.last().expect("notification");
    assert_eq!(error.level, NotificationLevel::Error);
    assert_eq!(error.details.as_deref(), Some("/data/b.csv"));
}

#[test]
fn successful_upload_notifies_once() {
    let mut ws = workspace();
    let items = vec![UploadItem::text("/readme.md", "# new readme")];

    let progress = TreeOps::new(&mut ws.tree, &mut ws.store).upload(&items, |_| {});

    assert_eq!(progress.completed_files, 1);
    assert_eq!(ws.tree.get("/readme.md").expect("entry").size, 12);
    assert_eq!(
        ws.files.content_of("/readme.md").as_deref(),
        Some("# new readme")
    );
    assert_eq!(ws.notifier.count(NotificationLevel::Success), 1);
}

#[test]
fn upload_refreshes_clean_open_tab() {
    let mut ws = workspace();
    ws.store.open_path("/readme.md").expect("open");
    let items = vec![UploadItem::text("/readme.md", "# new readme")];

    TreeOps::new(&mut ws.tree, &mut ws.store).upload(&items, |_| {});

    let tab = ws.store.tab(0).expect("tab");
    assert_eq!(tab.content, "# new readme");
    assert_eq!(tab.etag, ws.files.etag_of("/readme.md"));
    assert_eq!(tab.save_state, SaveState::Clean);
    assert_eq!(ws.notifier.count(NotificationLevel::Info), 0);
}

#[test]
fn upload_over_edited_tab_raises_conflict() {
    let mut ws = workspace();
    ws.store.open_path("/readme.md").expect("open");
    ws.store.edit_tab(0, "# my notes").expect("edit");
    let items = vec![UploadItem::text("/readme.md", "# new readme")];

    TreeOps::new(&mut ws.tree, &mut ws.store).upload(&items, |_| {});

    let tab = ws.store.tab(0).expect("tab");
    assert_eq!(
        tab.save_state,
        SaveState::Conflict(ConflictReason::ContentChanged)
    );
    assert_eq!(tab.content, "# my notes");
    assert_ne!(tab.etag, ws.files.etag_of("/readme.md"));
    assert_eq!(ws.notifier.count(NotificationLevel::Info), 1);
    assert!(matches!(
        ws.store.save_tab(0),
        Err(TabError::SaveBlockedByConflict { .. })
    ));
}

/// Holds every write until `release` is called; other calls pass through.
struct HeldWrites {
    inner: Arc<MemoryFileService>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl HeldWrites {
    fn new(inner: Arc<MemoryFileService>) -> Self {
        Self {
            inner,
            gate: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    fn release_later(&self) -> thread::JoinHandle<()> {
        let gate = self.gate.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let (open, ready) = &*gate;
            *open.lock().expect("lock") = true;
            ready.notify_all();
        })
    }
}

impl FileService for HeldWrites {
    fn read_file(&self, path: &str) -> Result<FileContent, FileServiceError> {
        self.inner.read_file(path)
    }

    fn write_file(
        &self,
        path: &str,
        content: &str,
        encoding: Encoding,
        expected_etag: Option<&str>,
    ) -> Result<WriteResult, FileServiceError> {
        let (open, ready) = &*self.gate;
        let mut released = open.lock().expect("lock");
        while !*released {
            released = ready.wait(released).expect("wait");
        }
        drop(released);
        self.inner.write_file(path, content, encoding, expected_etag)
    }

    fn rename_path(&self, old_path: &str, new_path: &str) -> Result<(), FileServiceError> {
        self.inner.rename_path(old_path, new_path)
    }

    fn delete_path(&self, path: &str) -> Result<(), FileServiceError> {
        self.inner.delete_path(path)
    }

    fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, FileServiceError> {
        self.inner.list_dir(path)
    }
}

/// Opens `/a.py`, edits it and leaves the save blocked in flight.
fn saving_tab(files: &Arc<MemoryFileService>) -> (Arc<HeldWrites>, TabStore, FileTree) {
    files.put_file("/a.py", "v1");
    let held = Arc::new(HeldWrites::new(files.clone()));
    let service: Arc<dyn FileService> = held.clone();
    let mut store = TabStore::new(service, Arc::new(RecordingNotifier::new()));
    let mut tree = FileTree::new();
    TreeOps::new(&mut tree, &mut store)
        .refresh_folder("/")
        .expect("list root");

    store.open_path("/a.py").expect("open");
    store.edit_tab(0, "v2").expect("edit");
    assert_eq!(store.save_tab(0).expect("save"), SaveDispatch::Started);
    assert!(store.tab(0).expect("tab").has_pending_save());
    (held, store, tree)
}

#[test]
fn rename_waits_for_in_flight_save() {
    let files = Arc::new(MemoryFileService::new());
    let (held, mut store, mut tree) = saving_tab(&files);
    let release = held.release_later();

    let updated = TreeOps::new(&mut tree, &mut store)
        .rename("/a.py", "/b.py")
        .expect("rename");
    release.join().expect("release thread");

    assert_eq!(updated, 1);
    let tab = store.tab(0).expect("tab");
    assert_eq!(tab.path(), "/b.py");
    assert_eq!(tab.save_state, SaveState::Saved);
    assert!(!tab.unsaved_changes);
    assert_eq!(files.content_of("/b.py").as_deref(), Some("v2"));
    assert!(files.content_of("/a.py").is_none());
    assert_eq!(store.in_flight(), 0);
}

#[test]
fn delete_waits_for_in_flight_save() {
    let files = Arc::new(MemoryFileService::new());
    let (held, mut store, mut tree) = saving_tab(&files);
    let release = held.release_later();

    let closed = TreeOps::new(&mut tree, &mut store)
        .delete("/a.py")
        .expect("delete");
    release.join().expect("release thread");

    assert_eq!(closed, 1);
    assert!(store.tabs().is_empty());
    assert!(files.content_of("/a.py").is_none());
    assert!(!tree.contains("/a.py"));
    assert_eq!(store.in_flight(), 0);
}
