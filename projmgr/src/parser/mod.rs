//! Loading of the YAML input formats.
//!
//! The parser owns every loaded document for the lifetime of an
//! invocation: the solution, its cprojects, referenced and generic layers,
//! the cdefault, the persisted context set and the debug adapter
//! catalogue. Loading performs three steps per file: structural key check
//! (unless disabled), portable-path enforcement, and deserialization into
//! the plain-data types.

mod schema;
pub mod types;

pub use types::*;

use crate::common::{normalize_newlines, read_to_string};
use anyhow::{bail, ensure, Context, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Keys whose values must stay portable: no backslashes, no absolute
/// paths.
const PORTABLE_KEYS: &[&str] = &[
    "path", "file", "script", "regions", "add-path", "del-path", "license", "image", "dbgconf",
];

#[derive(Debug, Default)]
pub struct Parser {
    pub cdefault: Option<CdefaultItem>,
    pub csolution: Option<CsolutionItem>,
    pub cprojects: BTreeMap<String, CprojectItem>,
    pub clayers: BTreeMap<String, ClayerItem>,
    pub generic_clayers: BTreeMap<String, ClayerItem>,
    pub cbuild_set: Option<CbuildSetNode>,
    pub debug_adapters: Vec<DebugAdapterNode>,
    /// Whether the solution enables cdefault injection.
    pub enable_cdefault: bool,
    check_schema: bool,
}

impl Parser {
    pub fn new(check_schema: bool) -> Self {
        Self {
            check_schema,
            ..Default::default()
        }
    }

    /// Load a YAML file into `T` after the structural and portability
    /// checks.
    fn load_file<T: DeserializeOwned>(&self, path: &Path) -> Result<(T, Value)> {
        let data = read_to_string(path)?;
        let data = normalize_newlines(&data);
        let raw: Value = serde_yaml::from_str(&data)
            .context(format!("Unable to parse YAML file '{}'", path.display()))?;
        if self.check_schema {
            let findings = schema::check_unknown_keys(&raw);
            ensure!(
                findings.is_empty(),
                "Schema check failed for '{}': unknown keys [{}]",
                path.display(),
                findings.join(", ")
            );
        }
        check_portable_paths(&raw, path)?;
        let value: T = serde_yaml::from_str(&data)
            .context(format!("Unable to load file '{}'", path.display()))?;
        debug!("Loaded '{}'", path.display());
        Ok((value, raw))
    }

    /// Parse a csolution file; the stem before `.csolution.yml` names the
    /// solution.
    pub fn parse_csolution(&mut self, input: &Path) -> Result<()> {
        let path = canonical(input)?;
        let (file, raw): (CsolutionFile, Value) = self.load_file(&path)?;
        let name = double_stem(&path, "csolution");
        ensure!(
            !name.is_empty(),
            "Invalid solution file name '{}', expected '<name>.csolution.yml'",
            path.display()
        );
        self.enable_cdefault = raw
            .get("solution")
            .and_then(|s| s.as_mapping())
            .is_some_and(|m| m.contains_key(&Value::from("cdefault")));
        let directory = parent_dir(&path)?;
        self.csolution = Some(CsolutionItem {
            name,
            path,
            directory,
            solution: file.solution,
        });
        Ok(())
    }

    pub fn parse_cproject(&mut self, input: &Path) -> Result<String> {
        let path = canonical(input)?;
        let (file, _): (CprojectFile, Value) = self.load_file(&path)?;
        let name = double_stem(&path, "cproject");
        ensure!(
            !name.is_empty(),
            "Invalid project file name '{}', expected '<name>.cproject.yml'",
            path.display()
        );
        let directory = parent_dir(&path)?;
        self.cprojects.insert(
            name.clone(),
            CprojectItem {
                name: name.clone(),
                path,
                directory,
                project: file.project,
            },
        );
        Ok(name)
    }

    pub fn parse_clayer(&mut self, input: &Path) -> Result<String> {
        let path = canonical(input)?;
        let key = path.to_string_lossy().to_string();
        if self.clayers.contains_key(&key) {
            return Ok(key);
        }
        let (file, _): (ClayerFile, Value) = self.load_file(&path)?;
        let item = ClayerItem {
            name: double_stem(&path, "clayer"),
            directory: parent_dir(&path)?,
            path,
            layer: file.layer,
        };
        self.clayers.insert(key.clone(), item);
        Ok(key)
    }

    /// Parse a candidate layer found by discovery rather than by project
    /// reference.
    pub fn parse_generic_clayer(&mut self, input: &Path) -> Result<String> {
        let path = canonical(input)?;
        let key = path.to_string_lossy().to_string();
        if self.generic_clayers.contains_key(&key) {
            return Ok(key);
        }
        let (file, _): (ClayerFile, Value) = self.load_file(&path)?;
        let item = ClayerItem {
            name: double_stem(&path, "clayer"),
            directory: parent_dir(&path)?,
            path,
            layer: file.layer,
        };
        self.generic_clayers.insert(key.clone(), item);
        Ok(key)
    }

    pub fn parse_cdefault(&mut self, input: &Path) -> Result<()> {
        let path = canonical(input)?;
        let (file, _): (CdefaultFile, Value) = self.load_file(&path)?;
        self.cdefault = Some(CdefaultItem {
            path,
            default: file.default,
        });
        Ok(())
    }

    pub fn parse_cbuild_set(&mut self, input: &Path) -> Result<()> {
        let path = canonical(input)?;
        let (file, _): (CbuildSetFile, Value) = self.load_file(&path)?;
        self.cbuild_set = Some(file.cbuild_set);
        Ok(())
    }

    pub fn parse_debug_adapters(&mut self, input: &Path) -> Result<()> {
        let path = canonical(input)?;
        let (file, _): (DebugAdaptersFile, Value) = self.load_file(&path)?;
        self.debug_adapters = file.debug_adapters;
        Ok(())
    }

    /// Parse a cbuild-pack file next to the solution, when present.
    pub fn parse_cbuild_pack(&self, path: &Path) -> Result<Option<CbuildPackNode>> {
        if !path.is_file() {
            return Ok(None);
        }
        let (file, _): (CbuildPackFile, Value) = self.load_file(path)?;
        Ok(Some(file.cbuild_pack))
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .context(format!("Unable to locate file '{}'", path.display()))
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    Ok(path
        .parent()
        .context(format!(
            "Unable to find the parent directory of '{}'",
            path.display()
        ))?
        .to_path_buf())
}

/// The stem before `.<kind>.yml` / `.<kind>.yaml`, empty when the name
/// does not follow the convention.
fn double_stem(path: &Path, kind: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    for extension in [format!(".{kind}.yml"), format!(".{kind}.yaml")] {
        if let Some(stem) = file_name.strip_suffix(&extension) {
            return stem.to_string();
        }
    }
    String::new()
}

/// Enforce portable path values below the known path-carrying keys.
fn check_portable_paths(root: &Value, file: &Path) -> Result<()> {
    fn check_value(key: &str, value: &Value, file: &Path) -> Result<()> {
        match value {
            Value::String(s) => {
                if s.contains('\\') {
                    bail!(
                        "Backslash in '{key}: {s}' in '{}'; portable paths use forward slashes",
                        file.display()
                    );
                }
                let windows_drive = s.len() > 1
                    && s.as_bytes()[1] == b':'
                    && s.as_bytes()[0].is_ascii_alphabetic();
                if s.starts_with('/') || windows_drive {
                    bail!(
                        "Absolute path in '{key}: {s}' in '{}'; paths must be relative",
                        file.display()
                    );
                }
                Ok(())
            }
            Value::Sequence(seq) => {
                for child in seq {
                    check_value(key, child, file)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn walk(value: &Value, file: &Path) -> Result<()> {
        match value {
            Value::Mapping(map) => {
                for (key, child) in map {
                    if let Some(key) = key.as_str() {
                        if PORTABLE_KEYS.contains(&key) {
                            check_value(key, child, file)?;
                            continue;
                        }
                    }
                    walk(child, file)?;
                }
                Ok(())
            }
            Value::Sequence(seq) => {
                for child in seq {
                    walk(child, file)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    walk(root, file)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, data: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn parses_solution_and_project() {
        let tempdir = TempDir::new().unwrap();
        let solution = write(
            tempdir.path(),
            "Hello.csolution.yml",
            r#"
solution:
  cdefault:
  target-types:
    - type: A
      device: ARMCM3
  build-types:
    - type: Debug
  projects:
    - project: ./Hello.cproject.yml
"#,
        );
        write(
            tempdir.path(),
            "Hello.cproject.yml",
            r#"
project:
  groups:
    - group: Source
      files:
        - file: ./main.c
"#,
        );

        let mut parser = Parser::new(true);
        parser.parse_csolution(&solution).unwrap();
        assert!(parser.enable_cdefault);
        let item = parser.csolution.as_ref().unwrap();
        assert_eq!(item.name, "Hello");

        let project = item.directory.join("Hello.cproject.yml");
        let name = parser.parse_cproject(&project).unwrap();
        assert_eq!(name, "Hello");
        assert_eq!(parser.cprojects["Hello"].project.groups.len(), 1);
    }

    #[test]
    fn schema_check_rejects_unknown_keys() {
        let tempdir = TempDir::new().unwrap();
        let solution = write(
            tempdir.path(),
            "Bad.csolution.yml",
            "solution:\n  target-typs:\n    - type: A\n",
        );
        let mut strict = Parser::new(true);
        let err = strict.parse_csolution(&solution).unwrap_err();
        assert!(err.to_string().contains("Schema check failed"), "{err}");

        let mut permissive = Parser::new(false);
        permissive.parse_csolution(&solution).unwrap();
    }

    #[test]
    fn portable_path_enforcement() {
        let tempdir = TempDir::new().unwrap();
        let backslash = write(
            tempdir.path(),
            "A.cproject.yml",
            "project:\n  groups:\n    - group: S\n      files:\n        - file: .\\main.c\n",
        );
        let mut parser = Parser::new(true);
        let err = parser.parse_cproject(&backslash).unwrap_err();
        assert!(err.to_string().contains("Backslash"), "{err}");

        let absolute = write(
            tempdir.path(),
            "B.cproject.yml",
            "project:\n  groups:\n    - group: S\n      files:\n        - file: /abs/main.c\n",
        );
        let err = parser.parse_cproject(&absolute).unwrap_err();
        assert!(err.to_string().contains("Absolute path"), "{err}");
    }

    #[test]
    fn file_name_convention_is_enforced() {
        let tempdir = TempDir::new().unwrap();
        let wrong = write(tempdir.path(), "Hello.yml", "solution:\n  projects: []\n");
        let mut parser = Parser::new(true);
        assert!(parser.parse_csolution(&wrong).is_err());
    }
}
