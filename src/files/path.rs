//! Helpers for the slash-separated workspace paths used by the file service.

pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() > 1 {
        let stripped = trimmed.trim_end_matches('/');
        if stripped.is_empty() {
            return "/".to_string();
        }
        return stripped.to_string();
    }
    trimmed.to_string()
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

pub fn file_extension(path: &str) -> Option<String> {
    let name = file_name(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// True when `path` is `folder` itself or nested anywhere below it.
pub fn is_under(path: &str, folder: &str) -> bool {
    if path == folder {
        return true;
    }
    let folder = folder.trim_end_matches('/');
    path.strip_prefix(folder)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Moves `path` from below `old_folder` to below `new_folder`. Returns `None`
/// when `path` is not under `old_folder`.
pub fn rebase(path: &str, old_folder: &str, new_folder: &str) -> Option<String> {
    if path == old_folder {
        return Some(new_folder.to_string());
    }
    if !is_under(path, old_folder) {
        return None;
    }
    let rest = &path[old_folder.trim_end_matches('/').len()..];
    Some(format!("{}{rest}", new_folder.trim_end_matches('/')))
}

pub fn parent_path(path: &str) -> Option<&str> {
    let (parent, _) = path.rsplit_once('/')?;
    if parent.is_empty() {
        if path.len() > 1 {
            return Some("/");
        }
        return None;
    }
    Some(parent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_prefix_requires_separator_boundary() {
        assert!(is_under("a/b", "a/b"));
        assert!(is_under("a/b/c.txt", "a/b"));
        assert!(is_under("a/b/x/y.txt", "a/b/"));
        assert!(!is_under("a/bc.txt", "a/b"));
        assert!(!is_under("a", "a/b"));
    }

    #[test]
    fn rebase_moves_nested_paths() {
        assert_eq!(
            rebase("/src/lib/util.py", "/src", "/app").as_deref(),
            Some("/app/lib/util.py")
        );
        assert_eq!(rebase("/src", "/src", "/app").as_deref(), Some("/app"));
        assert_eq!(rebase("/srcs/x.py", "/src", "/app"), None);
    }

    #[test]
    fn names_and_extensions() {
        assert_eq!(file_name("/flows/etl/main.py"), "main.py");
        assert_eq!(file_extension("/flows/etl/Main.PY").as_deref(), Some("py"));
        assert_eq!(file_extension("/.env"), None);
        assert_eq!(file_extension("/Makefile"), None);
        assert_eq!(normalize_path(" /flows/etl/ "), "/flows/etl");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(parent_path("/flows/etl/main.py"), Some("/flows/etl"));
        assert_eq!(parent_path("/main.py"), Some("/"));
        assert_eq!(parent_path("main.py"), None);
    }
}
