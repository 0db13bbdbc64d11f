#![cfg(test)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

mod convert_flow;

pub fn test_projects_dir() -> PathBuf {
    let mut p = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    p.pop();
    p.join("projects")
}

/// Copy a fixture project to a temporary directory so the test can
/// generate files without polluting the repository.
pub fn copy_project_to_temp_dir(project: &str) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    copy_most_dirs_to_temp_dir(&test_projects_dir().join(project), temp_dir.path());
    temp_dir
}

fn copy_most_dirs_to_temp_dir(from: &Path, to: &Path) {
    for entry in walk(from) {
        let relative = entry.strip_prefix(from).unwrap();
        let target = to.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::copy(&entry, &target).unwrap();
        }
    }
}

fn walk(dir: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).unwrap().filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            out.push(path);
        }
    }
    out
}
