use crate::files::path::normalize_path;
use crate::session::{
    load_session_snapshot, restore_session, save_session_snapshot, ConflictAction, SaveDispatch,
    SessionSnapshot, Tab, TabStore,
};
use crate::tree::{FileTree, TreeOps, UploadItem};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Open(String),
    Click(usize),
    Edit { index: usize, content: String },
    Save(usize),
    Close(usize),
    CloseOthers(usize),
    CloseAll,
    Move { from: usize, to: usize },
    Resolve { index: usize, action: ConflictAction },
    List(String),
    New(String),
    Rename { old_path: String, new_path: String },
    Delete(String),
    Upload { path: String, content: String },
    Tabs,
    Pump,
    Settle,
    Help,
    Exit,
}

fn parse_index(raw: Option<&str>, usage: &str) -> Result<usize, String> {
    let raw = raw.ok_or_else(|| format!("usage: {usage}"))?;
    raw.parse::<usize>()
        .map_err(|_| format!("invalid tab index `{raw}`; usage: {usage}"))
}

fn required<'a>(raw: Option<&'a str>, usage: &str) -> Result<&'a str, String> {
    raw.filter(|v| !v.is_empty())
        .ok_or_else(|| format!("usage: {usage}"))
}

fn unescape(text: &str) -> String {
    text.replace("\\n", "\n").replace("\\t", "\t")
}

/// Parses one line. Blank lines and `#` comments yield `None`.
pub fn parse_session_command(line: &str) -> Result<Option<SessionCommand>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    let command = match verb {
        "open" => SessionCommand::Open(required(args.next(), "open PATH")?.to_string()),
        "click" => SessionCommand::Click(parse_index(args.next(), "click N")?),
        "edit" => {
            let usage = "edit N TEXT";
            let (index, content) = match rest.split_once(char::is_whitespace) {
                Some((index, content)) => (index, content),
                None => (rest, ""),
            };
            SessionCommand::Edit {
                index: parse_index(Some(index).filter(|v| !v.is_empty()), usage)?,
                content: unescape(content),
            }
        }
        "save" => SessionCommand::Save(parse_index(args.next(), "save N")?),
        "close" => SessionCommand::Close(parse_index(args.next(), "close N")?),
        "close-others" => SessionCommand::CloseOthers(parse_index(args.next(), "close-others N")?),
        "close-all" => SessionCommand::CloseAll,
        "move" => {
            let usage = "move FROM TO";
            SessionCommand::Move {
                from: parse_index(args.next(), usage)?,
                to: parse_index(args.next(), usage)?,
            }
        }
        "resolve" => {
            let usage = "resolve N server|local|save-as PATH";
            let index = parse_index(args.next(), usage)?;
            let action = match args.next() {
                Some("server") => ConflictAction::AcceptServer,
                Some("local") => ConflictAction::KeepLocal,
                Some("save-as") => ConflictAction::SaveAs {
                    new_path: required(args.next(), usage)?.to_string(),
                },
                _ => return Err(format!("usage: {usage}")),
            };
            SessionCommand::Resolve { index, action }
        }
        "ls" => SessionCommand::List(args.next().unwrap_or("/").to_string()),
        "new" => SessionCommand::New(required(args.next(), "new PATH")?.to_string()),
        "rename" => {
            let usage = "rename OLD NEW";
            SessionCommand::Rename {
                old_path: required(args.next(), usage)?.to_string(),
                new_path: required(args.next(), usage)?.to_string(),
            }
        }
        "delete" => SessionCommand::Delete(required(args.next(), "delete PATH")?.to_string()),
        "upload" => {
            let usage = "upload PATH TEXT";
            let (path, content) = match rest.split_once(char::is_whitespace) {
                Some((path, content)) => (path, content),
                None => (rest, ""),
            };
            SessionCommand::Upload {
                path: required(Some(path), usage)?.to_string(),
                content: unescape(content),
            }
        }
        "tabs" => SessionCommand::Tabs,
        "pump" => SessionCommand::Pump,
        "settle" => SessionCommand::Settle,
        "help" => SessionCommand::Help,
        "exit" | "quit" => SessionCommand::Exit,
        other => return Err(format!("unknown session command `{other}`")),
    };
    Ok(Some(command))
}

/// Tab store plus file tree driven by typed session commands.
pub struct SessionShell {
    store: TabStore,
    tree: FileTree,
    snapshot_path: Option<PathBuf>,
}

impl SessionShell {
    pub fn new(store: TabStore) -> Self {
        Self {
            store,
            tree: FileTree::new(),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot_path(mut self, path: PathBuf) -> Self {
        self.snapshot_path = Some(path);
        self
    }

    pub fn store(&self) -> &TabStore {
        &self.store
    }

    pub fn tree(&self) -> &FileTree {
        &self.tree
    }

    pub fn snapshot_path(&self) -> Option<&std::path::Path> {
        self.snapshot_path.as_deref()
    }

    /// Reopens the tabs of the previous run, if a snapshot exists.
    pub fn restore(&mut self) -> Result<usize, String> {
        let Some(path) = &self.snapshot_path else {
            return Ok(0);
        };
        match load_session_snapshot(path).map_err(|e| e.to_string())? {
            Some(snapshot) => Ok(restore_session(&mut self.store, &snapshot)),
            None => Ok(0),
        }
    }

    /// Waits for pending requests, warns about edits that were never saved
    /// and writes the session snapshot.
    pub fn finish(&mut self) -> Result<String, String> {
        self.store.settle();
        let unsaved: Vec<&str> = self
            .store
            .tabs()
            .iter()
            .filter(|tab| tab.unsaved_changes)
            .map(Tab::path)
            .collect();
        if !unsaved.is_empty() {
            let paths = unsaved.join(", ");
            self.store.log().warn("session.unsaved", &paths);
            self.store.notifier().info(
                &format!("{} tab(s) closed with unsaved changes", unsaved.len()),
                Some(&paths),
            );
        }
        if let Some(path) = &self.snapshot_path {
            let snapshot = SessionSnapshot::capture(self.store.state());
            save_session_snapshot(path, &snapshot).map_err(|e| e.to_string())?;
        }
        Ok(format!("session ended\nopen_tabs={}", self.store.tabs().len()))
    }

    fn tab_lines(&self) -> String {
        if self.store.tabs().is_empty() {
            return "no open tabs".to_string();
        }
        let active = self.store.active_index();
        self.store
            .tabs()
            .iter()
            .enumerate()
            .map(|(index, tab)| {
                let marker = if active == Some(index) { '*' } else { ' ' };
                format!("{marker} {index} {} {}", tab.file.path, tab.save_state)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn execute(&mut self, command: SessionCommand) -> Result<String, String> {
        let output = match command {
            SessionCommand::Open(path) => {
                let index = self.store.open_path(&path).map_err(|e| e.to_string())?;
                format!("opened {index}")
            }
            SessionCommand::Click(index) => {
                self.store.handle_tab_click(index);
                format!("active={}", display_index(self.store.active_index()))
            }
            SessionCommand::Edit { index, content } => {
                self.store
                    .edit_tab(index, content)
                    .map_err(|e| e.to_string())?;
                "edited".to_string()
            }
            SessionCommand::Save(index) => {
                match self.store.save_tab(index).map_err(|e| e.to_string())? {
                    SaveDispatch::Started => "saving".to_string(),
                    SaveDispatch::Queued => "save queued".to_string(),
                    SaveDispatch::NothingToSave => "nothing to save".to_string(),
                }
            }
            SessionCommand::Close(index) => {
                self.store.close_tab(index).map_err(|e| e.to_string())?;
                "closed 1".to_string()
            }
            SessionCommand::CloseOthers(index) => {
                let closed = self
                    .store
                    .close_other_tabs(index)
                    .map_err(|e| e.to_string())?;
                format!("closed {closed}")
            }
            SessionCommand::CloseAll => format!("closed {}", self.store.close_all_tabs()),
            SessionCommand::Move { from, to } => {
                self.store
                    .reorder_tabs(from, to)
                    .map_err(|e| e.to_string())?;
                self.tab_lines()
            }
            SessionCommand::Resolve { index, action } => {
                self.store
                    .resolve_conflict(index, action)
                    .map_err(|e| e.to_string())?;
                "resolved".to_string()
            }
            SessionCommand::List(folder) => {
                let folder = normalize_path(&folder);
                let mut ops = TreeOps::new(&mut self.tree, &mut self.store);
                ops.refresh_folder(&folder).map_err(|e| e.to_string())?;
                let lines: Vec<String> = self
                    .tree
                    .children(&folder)
                    .into_iter()
                    .map(|entry| {
                        if entry.is_folder() {
                            format!("{}/", entry.path)
                        } else {
                            format!("{} {}", entry.path, entry.size)
                        }
                    })
                    .collect();
                if lines.is_empty() {
                    "empty".to_string()
                } else {
                    lines.join("\n")
                }
            }
            SessionCommand::New(path) => {
                let index = TreeOps::new(&mut self.tree, &mut self.store)
                    .create_file(&path)
                    .map_err(|e| e.to_string())?;
                format!("opened {index}")
            }
            SessionCommand::Rename { old_path, new_path } => {
                let updated = TreeOps::new(&mut self.tree, &mut self.store)
                    .rename(&old_path, &new_path)
                    .map_err(|e| e.to_string())?;
                format!("renamed\ntabs_updated={updated}")
            }
            SessionCommand::Delete(path) => {
                let closed = TreeOps::new(&mut self.tree, &mut self.store)
                    .delete(&path)
                    .map_err(|e| e.to_string())?;
                format!("deleted\ntabs_closed={closed}")
            }
            SessionCommand::Upload { path, content } => {
                let items = [UploadItem::text(&path, &content)];
                let progress = TreeOps::new(&mut self.tree, &mut self.store).upload(&items, |_| {});
                format!(
                    "uploaded {}/{} ({}%)",
                    progress.completed_files,
                    progress.total_files,
                    progress.percent()
                )
            }
            SessionCommand::Tabs => self.tab_lines(),
            SessionCommand::Pump => format!("applied {}", self.store.pump()),
            SessionCommand::Settle => format!("applied {}", self.store.settle()),
            SessionCommand::Help => crate::app::cli::session_help_lines().join("\n"),
            SessionCommand::Exit => return self.finish(),
        };
        Ok(output)
    }

    /// Background bookkeeping run between commands.
    fn tick(&mut self) {
        self.store.pump();
        self.store.run_autosave(Instant::now());
    }
}

fn display_index(index: Option<usize>) -> String {
    index.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string())
}

/// Feeds every line of `input` to the shell and writes replies to `output`.
/// Ends at `exit` or end of input; either way pending work is finished.
/// Returns the number of commands executed.
pub fn run_session_commands<R: BufRead, W: Write>(
    shell: &mut SessionShell,
    input: R,
    output: &mut W,
) -> Result<usize, String> {
    let mut executed = 0;
    let mut exited = false;
    for line in input.lines() {
        let line = line.map_err(|e| format!("failed to read command: {e}"))?;
        let command = match parse_session_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                writeln!(output, "error: {err}").map_err(|e| e.to_string())?;
                continue;
            }
        };
        let is_exit = command == SessionCommand::Exit;
        let reply = shell.execute(command);
        executed += 1;
        let written = match reply {
            Ok(text) => writeln!(output, "{text}"),
            Err(err) => writeln!(output, "error: {err}"),
        };
        written.map_err(|e| e.to_string())?;
        if is_exit {
            exited = true;
            break;
        }
        shell.tick();
    }
    if !exited {
        let summary = shell.finish()?;
        writeln!(output, "{summary}").map_err(|e| e.to_string())?;
    }
    Ok(executed)
}
