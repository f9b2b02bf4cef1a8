//! Default locations and path helpers shared by config and CLI.

use std::env;
use std::path::{Component, Path, PathBuf};

/// `$HOME`, or `/tmp` with a warning when it is unset.
pub fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[NBR-CONFIG] WARNING: HOME not set, falling back to /tmp");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

/// `~/.config/nbr/config.toml`
pub fn default_config_file() -> PathBuf {
    home_dir().join(".config").join("nbr").join("config.toml")
}

/// `~/.local/share/nbr/activity.jsonl`
pub fn default_activity_log() -> PathBuf {
    home_dir()
        .join(".local")
        .join("share")
        .join("nbr")
        .join("activity.jsonl")
}

/// Place a configured artifact path under `base` unless it is already absolute.
pub fn resolve_in(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(dir) if !path.is_absolute() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

/// Absolute form of `path` for logs and reports. Existing paths are
/// canonicalized; others are joined to the CWD and cleaned syntactically.
pub fn display_root(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    std::fs::canonicalize(&absolute)
        .unwrap_or_else(|_| clean(&absolute))
        .display()
        .to_string()
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    out
}
