//! Path helpers for plugin identity derivation.
//!
//! Identity strings must be stable across platforms, so relative forms are
//! always rendered with forward slashes regardless of the OS separator.

use std::path::{Component, Path, PathBuf};

/// Resolves `path` against `base` when relative, then normalizes lexically.
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexically normalizes a path: drops `.` components and folds `..` into
/// their parent. Does not touch the filesystem, so symlinks survive as-is.
pub fn normalize(path: &Path) -> PathBuf {
    let mut components = path.components().peekable();
    let mut out = if let Some(c @ Component::Prefix(..)) = components.peek().copied() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!("prefix only appears first"),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(c) => out.push(c),
        }
    }

    out
}

/// Renders `path` relative to `base` with forward-slash separators.
///
/// Returns `None` when `path` does not live under `base`.
pub fn relative_slash(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
