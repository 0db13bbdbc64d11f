//! The resolved pack lockfile (`<solution>.cbuild-pack.yml`).

use super::{put, put_seq, put_values, render, write_if_changed};
use crate::parser::{CbuildPackNode, ResolvedPackNode};
use anyhow::Result;
use rtemodel::{compare_versions, parse_lenient};
use semver::Version;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One entry to be recorded in the lockfile.
#[derive(Debug, Clone, Default)]
pub struct PackLockEntry {
    pub resolved_pack: String,
    pub selected_by_pack: Vec<String>,
    pub selected_by: Vec<String>,
}

/// Sort key `(vendor, name, version)` of a pack id string.
fn sort_key(id: &str) -> (String, String, Version) {
    let (vendor, rest) = id.split_once("::").unwrap_or(("", id));
    let (name, version) = rest.split_once('@').unwrap_or((rest, "0.0.0"));
    (
        vendor.to_string(),
        name.to_string(),
        parse_lenient(version).unwrap_or_else(|_| Version::new(0, 0, 0)),
    )
}

/// Merge new entries over the seed (the on-disk lockfile, unless a
/// refresh drops it) and emit the result sorted ascending by
/// `(vendor, name, version)`.
pub fn emit_cbuild_pack(
    output_dir: &Path,
    solution_name: &str,
    seed: Option<&CbuildPackNode>,
    entries: &[PackLockEntry],
) -> Result<PathBuf> {
    let path = output_dir.join(format!("{solution_name}.cbuild-pack.yml"));

    let mut merged: BTreeMap<String, PackLockEntry> = BTreeMap::new();
    if let Some(seed) = seed {
        for entry in &seed.resolved_packs {
            merged.insert(
                entry.resolved_pack.clone(),
                PackLockEntry {
                    resolved_pack: entry.resolved_pack.clone(),
                    selected_by_pack: entry.selected_by_pack.clone(),
                    selected_by: entry.selected_by.clone(),
                },
            );
        }
    }
    for entry in entries {
        let slot = merged
            .entry(entry.resolved_pack.clone())
            .or_insert_with(|| PackLockEntry {
                resolved_pack: entry.resolved_pack.clone(),
                ..Default::default()
            });
        for expression in &entry.selected_by_pack {
            if !slot.selected_by_pack.contains(expression) {
                slot.selected_by_pack.push(expression.clone());
            }
        }
        for expression in &entry.selected_by {
            if !slot.selected_by.contains(expression) {
                slot.selected_by.push(expression.clone());
            }
        }
    }

    let mut ordered: Vec<&PackLockEntry> = merged.values().collect();
    ordered.sort_by(|a, b| {
        let (vendor_a, name_a, version_a) = sort_key(&a.resolved_pack);
        let (vendor_b, name_b, version_b) = sort_key(&b.resolved_pack);
        (vendor_a, name_a)
            .cmp(&(vendor_b, name_b))
            .then_with(|| compare_versions(&version_a, &version_b))
    });

    let mut resolved = Vec::new();
    for entry in ordered {
        let mut node = Mapping::new();
        put(&mut node, "resolved-pack", entry.resolved_pack.as_str());
        let mut selected_by_pack = entry.selected_by_pack.clone();
        selected_by_pack.sort();
        put_seq(&mut node, "selected-by-pack", &selected_by_pack);
        let mut selected_by = entry.selected_by.clone();
        selected_by.sort();
        put_seq(&mut node, "selected-by", &selected_by);
        resolved.push(Value::from(node));
    }
    let mut body = Mapping::new();
    put_values(&mut body, "resolved-packs", resolved);
    let mut root = Mapping::new();
    put(&mut root, "cbuild-pack", Value::from(body));
    let content = render(&Value::from(root))?;
    write_if_changed(&path, &content)?;
    Ok(path)
}

/// Convert a parsed lockfile back into lock entries, for round-trips.
pub fn entries_from_node(node: &CbuildPackNode) -> Vec<PackLockEntry> {
    node.resolved_packs
        .iter()
        .map(|entry: &ResolvedPackNode| PackLockEntry {
            resolved_pack: entry.resolved_pack.clone(),
            selected_by_pack: entry.selected_by_pack.clone(),
            selected_by: entry.selected_by.clone(),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sorted_by_vendor_name_version() {
        let tempdir = TempDir::new().unwrap();
        let entries = vec![
            PackLockEntry {
                resolved_pack: "Keil::LPC1700_DFP@2.7.1".to_string(),
                selected_by_pack: vec!["Keil::LPC1700_DFP".to_string()],
                ..Default::default()
            },
            PackLockEntry {
                resolved_pack: "ARM::CMSIS@6.0.0".to_string(),
                selected_by_pack: vec!["ARM::CMSIS@>=5.5.0".to_string()],
                ..Default::default()
            },
            PackLockEntry {
                resolved_pack: "ARM::CMSIS-Driver@2.7.2".to_string(),
                selected_by: vec!["ARM::CMSIS-Driver:USART".to_string()],
                ..Default::default()
            },
        ];
        let path = emit_cbuild_pack(tempdir.path(), "Sln", None, &entries).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let cmsis = content.find("ARM::CMSIS@6.0.0").unwrap();
        let driver = content.find("ARM::CMSIS-Driver@2.7.2").unwrap();
        let keil = content.find("Keil::LPC1700_DFP@2.7.1").unwrap();
        assert!(cmsis < driver && driver < keil, "{content}");
        assert!(content.contains("selected-by-pack:"));
        assert!(content.contains("ARM::CMSIS@>=5.5.0"));
    }

    #[test]
    fn seed_entries_are_preserved_and_merged() {
        let tempdir = TempDir::new().unwrap();
        let seed = CbuildPackNode {
            resolved_packs: vec![ResolvedPackNode {
                resolved_pack: "ARM::CMSIS@6.0.0".to_string(),
                selected_by_pack: vec!["ARM::CMSIS".to_string()],
                ..Default::default()
            }],
        };
        let entries = vec![PackLockEntry {
            resolved_pack: "ARM::CMSIS@6.0.0".to_string(),
            selected_by_pack: vec!["ARM::CMSIS@>=5.5.0".to_string()],
            ..Default::default()
        }];
        let path =
            emit_cbuild_pack(tempdir.path(), "Sln", Some(&seed), &entries).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        // Both user expressions attach to the single resolved id.
        assert_eq!(content.matches("resolved-pack:").count(), 1);
        assert!(content.contains("- ARM::CMSIS"));
        assert!(content.contains("- ARM::CMSIS@>=5.5.0"));
    }

    #[test]
    fn emission_is_idempotent() {
        let tempdir = TempDir::new().unwrap();
        let entries = vec![PackLockEntry {
            resolved_pack: "ARM::CMSIS@6.0.0".to_string(),
            selected_by_pack: vec!["ARM::CMSIS".to_string()],
            ..Default::default()
        }];
        let path = emit_cbuild_pack(tempdir.path(), "Sln", None, &entries).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        emit_cbuild_pack(tempdir.path(), "Sln", None, &entries).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }
}
