//! Discovery and loading of installed packs.
//!
//! Installed packs live under `<pack root>/<Vendor>/<Name>/<Version>/` with
//! the description file `<Vendor>.<Name>.pdsc` at the top of each version
//! directory. A local repository index at `.Local/local_repository.pidx`
//! contributes descriptions that live outside the pack root.

use crate::error;
use crate::pack::{Pack, PackId};
use crate::pdsc::{read_pdsc, read_pidx};
use crate::version::{compare_versions, parse_lenient, VersionRange};
use log::{debug, warn};
use semver::Version;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

type Result<T> = crate::Result<T>;

const LOCAL_REPO_INDEX: &str = ".Local/local_repository.pidx";

/// How the loader selects packs beyond the explicitly required ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPacksPolicy {
    /// Load required packs; the latest of every installed pack when no
    /// requirements are given.
    #[default]
    Default,
    /// Load the latest version of every installed pack, plus required ones.
    Latest,
    /// Load every installed pack version.
    All,
    /// Load only the required packs; requirements must be present.
    Required,
}

impl std::str::FromStr for LoadPacksPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "default" => Ok(Self::Default),
            "latest" => Ok(Self::Latest),
            "all" => Ok(Self::All),
            "required" => Ok(Self::Required),
            _ => Err(format!(
                "unknown load policy '{value}', expected one of [default|latest|all|required]"
            )),
        }
    }
}

/// A pack requirement: vendor, name (may hold `*`/`?` wildcards) and a
/// version range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackSpec {
    pub vendor: String,
    pub name: String,
    pub version_range: VersionRange,
}

impl Display for PackSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.vendor, self.name)?;
        if !self.version_range.is_any() {
            write!(f, "@{}", self.version_range)?;
        }
        Ok(())
    }
}

impl PackSpec {
    pub fn matches_name(&self, vendor: &str, name: &str) -> bool {
        self.vendor == vendor && wildcard_match(&self.name, name)
    }

    pub fn has_wildcard(&self) -> bool {
        self.name.contains(['*', '?'])
    }
}

/// Case-sensitive glob match supporting `*` and `?`.
pub(crate) fn wildcard_match(pattern: &str, value: &str) -> bool {
    fn inner(p: &[char], v: &[char]) -> bool {
        match (p.first(), v.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                inner(&p[1..], v) || (!v.is_empty() && inner(p, &v[1..]))
            }
            (Some('?'), Some(_)) => inner(&p[1..], &v[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &v[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    inner(&p, &v)
}

/// One installed description file found under the pack root or through the
/// local repository index.
#[derive(Debug, Clone)]
pub struct InstalledPdsc {
    pub vendor: String,
    pub name: String,
    pub version: Version,
    pub path: PathBuf,
    pub local_repo: bool,
}

impl InstalledPdsc {
    pub fn id(&self) -> PackId {
        PackId {
            vendor: self.vendor.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// The result of resolving one pack requirement.
#[derive(Debug, Clone)]
pub struct EffectivePdsc {
    pub path: PathBuf,
    pub id: PackId,
}

/// The registry of installed packs. Owned by the caller for the process
/// lifetime; all lookups are read-only.
#[derive(Debug)]
pub struct PackRegistry {
    pack_root: PathBuf,
}

impl PackRegistry {
    pub fn new<P: Into<PathBuf>>(pack_root: P) -> Self {
        Self {
            pack_root: pack_root.into(),
        }
    }

    pub fn pack_root(&self) -> &Path {
        &self.pack_root
    }

    /// Enumerate every installed description file.
    ///
    /// The pack root is walked exactly three levels deep
    /// (`vendor/name/version`); entries whose version directory does not
    /// parse as a version are skipped with a debug note.
    pub fn installed_pdsc_files(&self) -> Result<Vec<InstalledPdsc>> {
        if !self.pack_root.is_dir() {
            return Err(error::PackRootMissingSnafu {
                path: self.pack_root.clone(),
            }
            .build()
            .into());
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(&self.pack_root)
            .min_depth(3)
            .max_depth(3)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
        {
            let version_dir = entry.path();
            let mut components = version_dir
                .strip_prefix(&self.pack_root)
                .unwrap_or(version_dir)
                .iter()
                .map(|c| c.to_string_lossy().to_string());
            let (vendor, name, version) = match (
                components.next(),
                components.next(),
                components.next(),
            ) {
                (Some(vendor), Some(name), Some(version)) => (vendor, name, version),
                _ => continue,
            };
            if vendor.starts_with('.') {
                continue;
            }
            let pdsc = version_dir.join(format!("{vendor}.{name}.pdsc"));
            if !pdsc.is_file() {
                debug!("No description file in '{}'", version_dir.display());
                continue;
            }
            let version = match parse_lenient(&version) {
                Ok(version) => version,
                Err(e) => {
                    debug!("Skipping '{}': {}", version_dir.display(), e);
                    continue;
                }
            };
            found.push(InstalledPdsc {
                vendor,
                name,
                version,
                path: pdsc,
                local_repo: false,
            });
        }
        found.extend(self.local_repository_pdsc_files()?);
        Ok(found)
    }

    /// Entries contributed by the local repository index, if present.
    fn local_repository_pdsc_files(&self) -> Result<Vec<InstalledPdsc>> {
        let index = self.pack_root.join(LOCAL_REPO_INDEX);
        if !index.is_file() {
            return Ok(Vec::new());
        }
        let mut found = Vec::new();
        for entry in read_pidx(&index)? {
            let dir = PathBuf::from(entry.url.trim_start_matches("file://"));
            let pdsc = dir.join(format!("{}.{}.pdsc", entry.vendor, entry.name));
            if !pdsc.is_file() {
                warn!(
                    "Local repository index entry '{}::{}' points to '{}' which has no \
                     description file",
                    entry.vendor,
                    entry.name,
                    dir.display()
                );
                continue;
            }
            let version = match parse_lenient(&entry.version) {
                Ok(version) => version,
                Err(e) => {
                    warn!("Skipping local repository entry '{}': {}", entry.name, e);
                    continue;
                }
            };
            found.push(InstalledPdsc {
                vendor: entry.vendor,
                name: entry.name,
                version,
                path: pdsc,
                local_repo: true,
            });
        }
        Ok(found)
    }

    /// Expand a wildcard requirement into concrete specs, one per matching
    /// installed pack name.
    pub fn expand_wildcard(&self, spec: &PackSpec) -> Result<Vec<PackSpec>> {
        if !spec.has_wildcard() {
            return Ok(vec![spec.clone()]);
        }
        let mut names: Vec<(String, String)> = self
            .installed_pdsc_files()?
            .into_iter()
            .filter(|p| spec.matches_name(&p.vendor, &p.name))
            .map(|p| (p.vendor, p.name))
            .collect();
        names.sort();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|(vendor, name)| PackSpec {
                vendor,
                name,
                version_range: spec.version_range.clone(),
            })
            .collect())
    }

    /// Resolve one requirement to the best matching installed description.
    ///
    /// The best match is the highest version inside the range; build
    /// metadata does not participate in the ordering but a metadata
    /// difference between requirement and pick is reported by the caller.
    pub fn effective_pdsc(&self, spec: &PackSpec) -> Result<EffectivePdsc> {
        let installed = self.installed_pdsc_files()?;
        let mut matching: Vec<&InstalledPdsc> = installed
            .iter()
            .filter(|p| spec.matches_name(&p.vendor, &p.name))
            .collect();
        if matching.is_empty() {
            return Err(error::PackNotFoundSnafu {
                spec: spec.to_string(),
            }
            .build()
            .into());
        }
        if spec.has_wildcard() && spec.version_range.is_any() {
            let mut names: Vec<String> =
                matching.iter().map(|p| p.id().common_id()).collect();
            names.sort();
            names.dedup();
            if names.len() > 1 {
                return Err(error::MultiplePacksAmbiguousSnafu {
                    spec: spec.to_string(),
                    candidates: names,
                }
                .build()
                .into());
            }
        }
        matching.retain(|p| spec.version_range.contains(&p.version));
        matching.sort_by(|a, b| match compare_versions(&a.version, &b.version) {
            // Prefer pack-root installs over local repository entries when
            // the version is the same.
            Ordering::Equal => a.local_repo.cmp(&b.local_repo),
            other => other,
        });
        match matching.last() {
            Some(best) => Ok(EffectivePdsc {
                path: best.path.clone(),
                id: best.id(),
            }),
            None => Err(error::PackNotFoundSnafu {
                spec: spec.to_string(),
            }
            .build()
            .into()),
        }
    }

    /// Load a project-local pack from a directory containing its
    /// description file.
    pub fn load_local(&self, path: &Path) -> Result<Pack> {
        if !path.is_dir() {
            return Err(error::LocalPackPathMissingSnafu { path }.build().into());
        }
        let pdsc = std::fs::read_dir(path)
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .find(|p| p.extension().is_some_and(|e| e == "pdsc"));
        match pdsc {
            Some(pdsc) => {
                let mut pack = read_pdsc(&pdsc)?;
                pack.local = true;
                Ok(pack)
            }
            None => Err(error::LocalPackPathMissingSnafu { path }.build().into()),
        }
    }

    /// Load packs according to the policy.
    ///
    /// `required` holds the requirements collected from the solution; it may
    /// be empty for the `Default`, `Latest` and `All` policies.
    pub fn load(&self, policy: LoadPacksPolicy, required: &[PackSpec]) -> Result<Vec<Pack>> {
        if policy == LoadPacksPolicy::Required && required.is_empty() {
            return Err(error::RequiredPacksUndefinedSnafu {}.build().into());
        }

        let mut selected: BTreeMap<PathBuf, PackId> = BTreeMap::new();
        let load_all_installed = match policy {
            LoadPacksPolicy::Required => false,
            LoadPacksPolicy::All | LoadPacksPolicy::Latest => true,
            LoadPacksPolicy::Default => required.is_empty(),
        };

        for spec in required {
            for spec in self.expand_wildcard(spec)? {
                let effective = self.effective_pdsc(&spec)?;
                selected.insert(effective.path, effective.id);
            }
        }

        if load_all_installed {
            let installed = self.installed_pdsc_files()?;
            let latest_only = policy != LoadPacksPolicy::All;
            for pdsc in &installed {
                if latest_only {
                    let is_latest = installed
                        .iter()
                        .filter(|other| {
                            other.vendor == pdsc.vendor && other.name == pdsc.name
                        })
                        .all(|other| {
                            compare_versions(&other.version, &pdsc.version)
                                != Ordering::Greater
                        });
                    if !is_latest {
                        continue;
                    }
                }
                selected.insert(pdsc.path.clone(), pdsc.id());
            }
        }

        let mut packs = Vec::new();
        for (path, id) in selected {
            let pack = read_pdsc(&path)?;
            if pack.id != id {
                warn!(
                    "Description file '{}' declares '{}' but is installed as '{}'",
                    path.display(),
                    pack.id,
                    id
                );
            }
            debug!("Loaded pack '{}'", pack.id);
            packs.push(pack);
        }
        Ok(packs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pack(root: &Path, vendor: &str, name: &str, version: &str) {
        let dir = root.join(vendor).join(name).join(version);
        fs::create_dir_all(&dir).unwrap();
        let pdsc = format!(
            "<package><vendor>{vendor}</vendor><name>{name}</name>\
             <releases><release version=\"{version}\"/></releases></package>"
        );
        fs::write(dir.join(format!("{vendor}.{name}.pdsc")), pdsc).unwrap();
    }

    fn registry() -> (TempDir, PackRegistry) {
        let tempdir = TempDir::new().unwrap();
        write_pack(tempdir.path(), "ARM", "CMSIS", "5.9.0");
        write_pack(tempdir.path(), "ARM", "CMSIS", "6.0.0");
        write_pack(tempdir.path(), "ARM", "CMSIS-Driver", "2.7.2");
        write_pack(tempdir.path(), "Keil", "RteTest", "0.1.0");
        let registry = PackRegistry::new(tempdir.path());
        (tempdir, registry)
    }

    fn spec(vendor: &str, name: &str, range: &str) -> PackSpec {
        PackSpec {
            vendor: vendor.to_string(),
            name: name.to_string(),
            version_range: VersionRange::parse(range).unwrap(),
        }
    }

    #[test]
    fn enumerates_installed_pdsc_files() {
        let (_tempdir, registry) = registry();
        let installed = registry.installed_pdsc_files().unwrap();
        assert_eq!(installed.len(), 4);
        assert!(installed.iter().all(|p| p.path.is_file()));
    }

    #[test]
    fn effective_pdsc_picks_highest_in_range() {
        let (_tempdir, registry) = registry();
        let best = registry.effective_pdsc(&spec("ARM", "CMSIS", "5.5.0")).unwrap();
        assert_eq!(best.id.to_string(), "ARM::CMSIS@6.0.0");

        let capped = registry
            .effective_pdsc(&spec("ARM", "CMSIS", "5.5.0:5.99.99"))
            .unwrap();
        assert_eq!(capped.id.to_string(), "ARM::CMSIS@5.9.0");
    }

    #[test]
    fn effective_pdsc_reports_missing() {
        let (_tempdir, registry) = registry();
        let err = registry
            .effective_pdsc(&spec("ARM", "CMSIS", "7.0.0"))
            .unwrap_err();
        assert!(err.to_string().contains("not found"), "{err}");
    }

    #[test]
    fn wildcard_expansion() {
        let (_tempdir, registry) = registry();
        let expanded = registry
            .expand_wildcard(&spec("ARM", "CMSIS*", ""))
            .unwrap();
        let names: Vec<String> = expanded.iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec!["CMSIS", "CMSIS-Driver"]);
    }

    #[test]
    fn wildcard_without_version_must_be_unique() {
        let (_tempdir, registry) = registry();
        let err = registry
            .effective_pdsc(&spec("ARM", "CMSIS*", ""))
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous"), "{err}");
    }

    #[test]
    fn required_policy_needs_requirements() {
        let (_tempdir, registry) = registry();
        let err = registry.load(LoadPacksPolicy::Required, &[]).unwrap_err();
        assert!(err.to_string().contains("required"), "{err}");
    }

    #[test]
    fn default_policy_without_requirements_loads_latest() {
        let (_tempdir, registry) = registry();
        let packs = registry.load(LoadPacksPolicy::Default, &[]).unwrap();
        let ids: Vec<String> = packs.iter().map(|p| p.id.to_string()).collect();
        assert!(ids.contains(&"ARM::CMSIS@6.0.0".to_string()));
        assert!(!ids.contains(&"ARM::CMSIS@5.9.0".to_string()));
        assert_eq!(packs.len(), 3);
    }

    #[test]
    fn all_policy_loads_every_version() {
        let (_tempdir, registry) = registry();
        let packs = registry.load(LoadPacksPolicy::All, &[]).unwrap();
        assert_eq!(packs.len(), 4);
    }

    #[test]
    fn required_policy_loads_only_requirements() {
        let (_tempdir, registry) = registry();
        let packs = registry
            .load(LoadPacksPolicy::Required, &[spec("ARM", "CMSIS", "5.9.0:5.9.0")])
            .unwrap();
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].id.to_string(), "ARM::CMSIS@5.9.0");
    }

    #[test]
    fn local_pack_loading() {
        let tempdir = TempDir::new().unwrap();
        let registry = PackRegistry::new(tempdir.path().join("packs"));
        let local = tempdir.path().join("MyPack");
        fs::create_dir_all(&local).unwrap();
        assert!(registry.load_local(&tempdir.path().join("absent")).is_err());
        assert!(registry.load_local(&local).is_err());
        fs::write(
            local.join("My.Pack.pdsc"),
            "<package><vendor>My</vendor><name>Pack</name>\
             <releases><release version=\"1.0.0\"/></releases></package>",
        )
        .unwrap();
        let pack = registry.load_local(&local).unwrap();
        assert!(pack.local);
        assert_eq!(pack.id.to_string(), "My::Pack@1.0.0");
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("CMSIS*", "CMSIS-Driver"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("C?SIS", "CMSIS"));
        assert!(!wildcard_match("CMSIS", "CMSIS-Driver"));
    }
}
