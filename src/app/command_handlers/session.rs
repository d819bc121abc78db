use crate::app::session_repl::{run_session_commands, SessionShell};
use crate::config::{load_global_settings, load_settings, ConfigError, Settings};
use crate::files::{FileService, MemoryFileService};
use crate::notify::ConsoleNotifier;
use crate::session::TabStore;
use std::path::PathBuf;
use std::sync::Arc;

const USAGE: &str = "usage: session [--config PATH] [--memory]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    pub config_path: Option<PathBuf>,
    /// Run against an empty in-process file service.
    pub memory: bool,
}

pub fn parse_session_options(args: &[String]) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or_else(|| USAGE.to_string())?;
                options.config_path = Some(PathBuf::from(path));
            }
            "--memory" => options.memory = true,
            other => return Err(format!("unexpected argument `{other}`; {USAGE}")),
        }
    }
    Ok(options)
}

fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

/// Wires settings into a ready-to-run shell. Snapshots are only kept for
/// sessions against the real file service.
pub fn build_session_shell(
    settings: &Settings,
    options: &SessionOptions,
) -> Result<SessionShell, String> {
    let log = settings.session_log();
    let files: Arc<dyn FileService> = if options.memory {
        Arc::new(MemoryFileService::new())
    } else {
        Arc::new(settings.build_file_service())
    };
    let notifier = Arc::new(ConsoleNotifier::new(log.clone()));
    let store = TabStore::new(files, notifier)
        .with_log(log)
        .with_autosave(settings.autosave_policy());

    let mut shell = SessionShell::new(store);
    if settings.session.restore_tabs && !options.memory {
        let path = settings.session_state_path().map_err(map_config_err)?;
        shell = shell.with_snapshot_path(path);
    }
    Ok(shell)
}

pub fn cmd_session(args: &[String]) -> Result<String, String> {
    let options = parse_session_options(args)?;
    let settings = match &options.config_path {
        Some(path) => load_settings(path),
        None => load_global_settings(),
    }
    .map_err(map_config_err)?;

    let mut shell = build_session_shell(&settings, &options)?;
    let restored = shell.restore()?;
    shell.store().log().info(
        "session.started",
        &format!(
            "base_url={} restored={restored} memory={}",
            settings.resolved_base_url(),
            options.memory
        ),
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let executed = run_session_commands(&mut shell, stdin.lock(), &mut stdout)?;
    Ok(format!("commands={executed}"))
}
