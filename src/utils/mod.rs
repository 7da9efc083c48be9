//! Path helpers.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path, dropping `.` and folding `..` into its parent.
///
/// Does not touch the filesystem, so symlinks are not resolved. `..` never climbs
/// above the root of an absolute path.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match components.last() {
                Some(Component::Normal(_)) => {
                    components.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => components.push(component),
            },
            c => components.push(c),
        }
    }

    components.iter().collect()
}

/// Makes `path` absolute against the current directory, then normalizes it.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("Failed to resolve path {}", path.display()))?;
    Ok(normalize_path(&absolute))
}
