//! Small filesystem and path helpers shared across the crate.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};

/// Read a file to a string with a useful error message.
pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .context(format!("Unable to read file '{}'", path.display()))
}

/// Write a file, creating parent directories first.
pub fn write_file<P: AsRef<Path>>(path: P, data: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .context(format!("Unable to create directory '{}'", parent.display()))?;
    }
    std::fs::write(path, data).context(format!("Unable to write file '{}'", path.display()))
}

/// Normalize line endings so byte comparison is stable across platforms.
pub fn normalize_newlines(data: &str) -> String {
    data.replace("\r\n", "\n")
}

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Join and normalize a possibly relative path against a base directory.
pub fn absolute_from(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        normalize_path(candidate)
    } else {
        normalize_path(&base.join(candidate))
    }
}

/// Express `path` relative to `base`, falling back to the absolute form
/// when the two share no common prefix. Both inputs must be absolute.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path = normalize_path(path);
    let base = normalize_path(base);
    let mut path_components = path.components().collect::<Vec<_>>();
    let mut base_components = base.components().collect::<Vec<_>>();

    let common = path_components
        .iter()
        .zip(base_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return path;
    }
    path_components.drain(..common);
    base_components.drain(..common);

    let mut out = PathBuf::new();
    for _ in base_components {
        out.push("..");
    }
    for component in path_components {
        out.push(component);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Like [`relative_to`] but rendered with forward slashes, the portable
/// form used in every emitted artefact.
pub fn portable_relative_to(path: &Path, base: &Path) -> String {
    path_to_portable(&relative_to(path, base))
}

/// Render a path with forward slashes.
pub fn path_to_portable(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        let part = match component {
            Component::RootDir => {
                out.push('/');
                continue;
            }
            Component::CurDir => ".".to_string(),
            Component::ParentDir => "..".to_string(),
            Component::Normal(s) => s.to_string_lossy().to_string(),
            Component::Prefix(p) => p.as_os_str().to_string_lossy().to_string(),
        };
        if !out.is_empty() && !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(&part);
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_to(Path::new("/a/b/c/file.c"), Path::new("/a/b/out")),
            PathBuf::from("../c/file.c")
        );
        assert_eq!(
            relative_to(Path::new("/a/b"), Path::new("/a/b")),
            PathBuf::from(".")
        );
    }

    #[test]
    fn portable_rendering() {
        assert_eq!(
            portable_relative_to(Path::new("/a/b/c.h"), Path::new("/a/x")),
            "../b/c.h"
        );
    }

    #[test]
    fn newline_normalization() {
        assert_eq!(normalize_newlines("a\r\nb\nc"), "a\nb\nc");
    }
}
