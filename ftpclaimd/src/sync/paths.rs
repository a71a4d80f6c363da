use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("entry name is empty")]
    Empty,
    #[error("entry name {0:?} is not a single path component")]
    UnsupportedComponent(String),
}

/// Last path segment of a listing entry; `.`/`..` and blanks yield `None`.
pub fn entry_name(entry: &str) -> Option<&str> {
    let name = entry.trim_end_matches('/').rsplit('/').next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name),
    }
}

/// Absolute remote path of `name` under `base`.
pub fn remote_join(base: &str, name: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let base = base.strip_prefix('/').unwrap_or(base);
    if base.is_empty() {
        format!("/{name}")
    } else {
        format!("/{base}/{name}")
    }
}

/// Absolute form of the configured base path.
pub fn remote_root(base: &str) -> String {
    let trimmed = base.trim().trim_matches('/');
    format!("/{trimmed}")
}

/// Maps a single remote entry name under `local_root`.
pub fn local_child(local_root: &Path, name: &str) -> Result<PathBuf, PathError> {
    if name.is_empty() {
        return Err(PathError::Empty);
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(local_root.join(part)),
        _ => Err(PathError::UnsupportedComponent(name.to_string())),
    }
}
