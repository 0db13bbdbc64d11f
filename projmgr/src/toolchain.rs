//! Toolchain registration and selection.
//!
//! Toolchains register through environment variables of the form
//! `<NAME>_TOOLCHAIN_<MAJOR>_<MINOR>_<PATCH>=<root>`. Each registered
//! toolchain pairs with a cmake configuration file `<name>.<x.y.z>.cmake`
//! found under the compiler root; the highest configuration version not
//! above the toolchain version wins.

use crate::context::ToolchainItem;
use anyhow::{bail, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rtemodel::{compare_versions, parse_lenient, VersionRange};
use semver::Version;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref TOOLCHAIN_VAR_RE: Regex =
        Regex::new(r"^(?P<name>[A-Za-z][A-Za-z0-9]*)_TOOLCHAIN_(?P<major>\d+)_(?P<minor>\d+)_(?P<patch>\d+)$")
            .unwrap();
    static ref CONFIG_FILE_RE: Regex =
        Regex::new(r"^(?P<name>.+)\.(?P<version>\d+\.\d+\.\d+)\.cmake$").unwrap();
}

/// One toolchain registered through the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredToolchain {
    pub name: String,
    pub version: Version,
    pub root: String,
}

/// A compiler selection `name[@version|@>=version]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompilerSpec {
    pub name: String,
    pub required: String,
    pub range: VersionRange,
}

impl CompilerSpec {
    pub fn parse(value: &str) -> Result<Self> {
        let (name, required) = match value.split_once('@') {
            None => (value.to_string(), String::new()),
            Some((name, required)) => (name.to_string(), required.to_string()),
        };
        let range = match required.strip_prefix(">=") {
            Some(min) => VersionRange::from_min(parse_lenient(min)?),
            None if required.is_empty() => VersionRange::any(),
            None => VersionRange::exact(parse_lenient(&required)?),
        };
        Ok(Self {
            name,
            required,
            range,
        })
    }

    /// The short `name[@required]` rendering used in emitted artefacts.
    pub fn display(&self) -> String {
        if self.required.is_empty() || self.required == ">=0.0.0" {
            self.name.clone()
        } else {
            format!("{}@{}", self.name, self.required)
        }
    }
}

/// The registered toolchains plus the configuration file directory.
#[derive(Debug, Default)]
pub struct ToolchainRegistry {
    toolchains: Vec<RegisteredToolchain>,
    compiler_root: PathBuf,
}

impl ToolchainRegistry {
    /// Discover registrations from an environment snapshot.
    pub fn discover<I>(environment: I, compiler_root: PathBuf) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut toolchains = Vec::new();
        for (key, root) in environment {
            let Some(captures) = TOOLCHAIN_VAR_RE.captures(&key) else {
                continue;
            };
            let version = Version::new(
                captures["major"].parse().unwrap_or(0),
                captures["minor"].parse().unwrap_or(0),
                captures["patch"].parse().unwrap_or(0),
            );
            toolchains.push(RegisteredToolchain {
                name: captures["name"].to_string(),
                version,
                root,
            });
        }
        toolchains.sort_by(|a, b| {
            (a.name.as_str(), &a.version)
                .cmp(&(b.name.as_str(), &b.version))
        });
        Self {
            toolchains,
            compiler_root,
        }
    }

    pub fn registered(&self) -> &[RegisteredToolchain] {
        &self.toolchains
    }

    pub fn compiler_root(&self) -> &Path {
        &self.compiler_root
    }

    /// Resolve a compiler selection to a registered toolchain and its
    /// configuration file.
    pub fn resolve(&self, compiler: &str) -> Result<ToolchainItem> {
        let spec = CompilerSpec::parse(compiler)?;
        let best = self
            .toolchains
            .iter()
            .filter(|t| t.name == spec.name)
            .filter(|t| spec.range.contains(&t.version))
            .max_by(|a, b| compare_versions(&a.version, &b.version));
        let Some(toolchain) = best else {
            if self.toolchains.iter().any(|t| t.name == spec.name) {
                bail!(
                    "No '{}' toolchain is registered for the required version '{}'",
                    spec.name,
                    spec.required
                );
            }
            bail!(
                "Compiler '{}' is not registered, set the \
                 {}_TOOLCHAIN_<major>_<minor>_<patch> environment variable",
                spec.name,
                spec.name.to_uppercase()
            );
        };
        let (config, _config_version) = self.config_for(&spec.name, &toolchain.version)?;
        Ok(ToolchainItem {
            name: spec.name.clone(),
            version: toolchain.version.to_string(),
            required: spec.required.clone(),
            root: toolchain.root.clone(),
            config: config.to_string_lossy().to_string(),
        })
    }

    /// The highest configuration file version not above the toolchain
    /// version.
    fn config_for(&self, name: &str, version: &Version) -> Result<(PathBuf, Version)> {
        let mut best: Option<(PathBuf, Version)> = None;
        let entries = std::fs::read_dir(&self.compiler_root).ok().into_iter().flatten();
        for entry in entries.filter_map(|e| e.ok()) {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(captures) = CONFIG_FILE_RE.captures(&file_name) else {
                continue;
            };
            if &captures["name"] != name {
                continue;
            }
            let Ok(config_version) = Version::parse(&captures["version"]) else {
                continue;
            };
            if compare_versions(&config_version, version) == Ordering::Greater {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, existing)) => {
                    compare_versions(&config_version, existing) == Ordering::Greater
                }
            };
            if better {
                best = Some((entry.path(), config_version));
            }
        }
        match best {
            Some(best) => Ok(best),
            None => bail!(
                "No cmake configuration file for toolchain '{name}' version '{version}' \
                 was found in '{}'",
                self.compiler_root.display()
            ),
        }
    }

    /// All registered toolchains that have a usable configuration file.
    pub fn list(&self) -> Vec<ToolchainItem> {
        let mut out = Vec::new();
        for toolchain in &self.toolchains {
            if let Ok((config, _)) = self.config_for(&toolchain.name, &toolchain.version) {
                out.push(ToolchainItem {
                    name: toolchain.name.clone(),
                    version: toolchain.version.to_string(),
                    required: String::new(),
                    root: toolchain.root.clone(),
                    config: config.to_string_lossy().to_string(),
                });
            }
        }
        out
    }
}

/// Output file suffixes and name affixes per toolchain.
pub fn output_affixes(toolchain_name: &str) -> OutputAffixes {
    match toolchain_name {
        "AC6" => OutputAffixes {
            elf: ".axf",
            lib_prefix: "",
            lib: ".lib",
            map: ".map",
        },
        "IAR" => OutputAffixes {
            elf: ".out",
            lib_prefix: "",
            lib: ".a",
            map: ".map",
        },
        _ => OutputAffixes {
            elf: ".elf",
            lib_prefix: "lib",
            lib: ".a",
            map: ".map",
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputAffixes {
    pub elf: &'static str,
    pub lib_prefix: &'static str,
    pub lib: &'static str,
    pub map: &'static str,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn environment() -> Vec<(String, String)> {
        vec![
            ("AC6_TOOLCHAIN_6_16_0".to_string(), "/opt/ac6.16".to_string()),
            ("AC6_TOOLCHAIN_6_19_0".to_string(), "/opt/ac6.19".to_string()),
            ("GCC_TOOLCHAIN_12_2_0".to_string(), "/opt/gcc".to_string()),
            ("UNRELATED_VAR".to_string(), "x".to_string()),
        ]
    }

    fn registry() -> (TempDir, ToolchainRegistry) {
        let tempdir = TempDir::new().unwrap();
        for name in ["AC6.6.16.2.cmake", "AC6.6.18.0.cmake", "GCC.12.2.0.cmake"] {
            fs::write(tempdir.path().join(name), "").unwrap();
        }
        let registry =
            ToolchainRegistry::discover(environment(), tempdir.path().to_path_buf());
        (tempdir, registry)
    }

    #[test]
    fn discovers_from_environment() {
        let (_tempdir, registry) = registry();
        let names: Vec<String> = registry
            .registered()
            .iter()
            .map(|t| format!("{}@{}", t.name, t.version))
            .collect();
        assert_eq!(names, vec!["AC6@6.16.0", "AC6@6.19.0", "GCC@12.2.0"]);
    }

    #[test]
    fn resolves_latest_in_range_with_config() {
        let (_tempdir, registry) = registry();
        let toolchain = registry.resolve("AC6").unwrap();
        assert_eq!(toolchain.version, "6.19.0");
        assert_eq!(toolchain.root, "/opt/ac6.19");
        // The highest config not above 6.19.0 is 6.18.0.
        assert!(toolchain.config.ends_with("AC6.6.18.0.cmake"));

        let toolchain = registry.resolve("GCC@>=12.0.0").unwrap();
        assert_eq!(toolchain.version, "12.2.0");
        assert!(toolchain.config.ends_with("GCC.12.2.0.cmake"));

        // Every configuration file for AC6 is above 6.16.0, so an exact
        // 6.16.0 selection has no usable configuration.
        let err = registry.resolve("AC6@6.16.0").unwrap_err();
        assert!(err.to_string().contains("No cmake configuration"), "{err}");
    }

    #[test]
    fn unregistered_compiler_is_an_error() {
        let (_tempdir, registry) = registry();
        let err = registry.resolve("IAR").unwrap_err();
        assert!(err.to_string().contains("IAR_TOOLCHAIN"), "{err}");

        let err = registry.resolve("AC6@>=7.0.0").unwrap_err();
        assert!(err.to_string().contains("required version"), "{err}");
    }

    #[test]
    fn compiler_spec_forms() {
        let any = CompilerSpec::parse("AC6").unwrap();
        assert!(any.range.is_any());
        assert_eq!(any.display(), "AC6");

        let exact = CompilerSpec::parse("AC6@6.18.0").unwrap();
        assert!(exact.range.is_exact());
        assert_eq!(exact.display(), "AC6@6.18.0");

        let open = CompilerSpec::parse("GCC@>=12.0.0").unwrap();
        assert!(open.range.contains(&Version::new(13, 0, 0)));
        assert_eq!(open.display(), "GCC@>=12.0.0");
    }

    #[test]
    fn affixes_per_toolchain() {
        assert_eq!(output_affixes("AC6").elf, ".axf");
        assert_eq!(output_affixes("GCC").lib_prefix, "lib");
        assert_eq!(output_affixes("IAR").elf, ".out");
        assert_eq!(output_affixes("CLANG").elf, ".elf");
    }
}
