use std::path::PathBuf;

pub fn state_dir() -> Option<PathBuf> {
    if let Ok(state_dir) = std::env::var("XDG_STATE_HOME") {
        if !state_dir.is_empty() {
            return Some(PathBuf::from(state_dir));
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home).join(".local").join("state"));
        }
    }

    None
}

/// Default directory for rolled log files.
pub fn log_dir() -> Option<PathBuf> {
    state_dir().map(|dir| dir.join("intersect").join("logs"))
}
