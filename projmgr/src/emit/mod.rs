//! Deterministic YAML artefact emission.
//!
//! Every artefact is first composed as a `serde_yaml` tree in insertion
//! order, rendered, and byte-compared (after newline normalisation)
//! against the file on disk. Unchanged files are left untouched; the
//! caller learns whether a rewrite happened for rebuild-flag tracking.

mod cbuild;
mod gen;
mod idx;
mod pack;
mod run;
mod set;

pub use cbuild::emit_cbuild;
pub use gen::{emit_cbuild_gen_idx, emit_cbuild_gens};
pub use idx::{emit_cbuild_idx, IdxInputs};
pub use pack::{emit_cbuild_pack, entries_from_node, PackLockEntry};
pub use run::emit_cbuild_run;
pub use set::emit_cbuild_set;

use crate::common::{normalize_newlines, write_file};
use anyhow::Result;
use log::info;
use serde_yaml::{Mapping, Value};
use std::path::Path;

/// The `generated-by:` stamp shared by every artefact.
pub fn generated_by() -> String {
    format!("csolution version {}", env!("CARGO_PKG_VERSION"))
}

/// Render a tree with a document marker and trailing newline.
pub fn render(value: &Value) -> Result<String> {
    let body = serde_yaml::to_string(value)?;
    Ok(body)
}

/// Write the artefact unless the on-disk content is byte-equivalent.
/// Returns true when the file was (re)written.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
    if let Ok(existing) = std::fs::read_to_string(path) {
        if normalize_newlines(&existing) == normalize_newlines(content) {
            return Ok(false);
        }
    }
    write_file(path, content)?;
    info!("file generated successfully: '{}'", path.display());
    Ok(true)
}

/// Insert a string value.
pub(crate) fn put(map: &mut Mapping, key: &str, value: impl Into<Value>) {
    map.insert(Value::from(key), value.into());
}

/// Insert a string value unless it is empty.
pub(crate) fn put_nonempty(map: &mut Mapping, key: &str, value: &str) {
    if !value.is_empty() {
        map.insert(Value::from(key), Value::from(value));
    }
}

/// Insert a string sequence unless it is empty.
pub(crate) fn put_seq(map: &mut Mapping, key: &str, values: &[String]) {
    if !values.is_empty() {
        let seq: Vec<Value> = values.iter().map(|v| Value::from(v.as_str())).collect();
        map.insert(Value::from(key), Value::from(seq));
    }
}

/// Insert a sub-mapping unless it is empty.
pub(crate) fn put_map(map: &mut Mapping, key: &str, value: Mapping) {
    if !value.is_empty() {
        map.insert(Value::from(key), Value::from(value));
    }
}

/// Insert a sequence of values unless it is empty.
pub(crate) fn put_values(map: &mut Mapping, key: &str, values: Vec<Value>) {
    if !values.is_empty() {
        map.insert(Value::from(key), Value::from(values));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_if_changed_is_idempotent() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("out.yml");
        assert!(write_if_changed(&path, "a: 1\n").unwrap());
        assert!(!write_if_changed(&path, "a: 1\n").unwrap());
        // Line-ending differences do not count as changes.
        assert!(!write_if_changed(&path, "a: 1\r\n").unwrap());
        assert!(write_if_changed(&path, "a: 2\n").unwrap());
    }

    #[test]
    fn mapping_helpers_preserve_insertion_order() {
        let mut map = Mapping::new();
        put(&mut map, "zeta", "1");
        put_nonempty(&mut map, "alpha", "2");
        put_nonempty(&mut map, "skipped", "");
        put_seq(&mut map, "list", &["x".to_string()]);
        let rendered = render(&Value::from(map)).unwrap();
        let zeta = rendered.find("zeta").unwrap();
        let alpha = rendered.find("alpha").unwrap();
        assert!(zeta < alpha, "{rendered}");
        assert!(!rendered.contains("skipped"));
    }
}
