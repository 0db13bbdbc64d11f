//! Configuration file lifecycle audit.
//!
//! A deployed configuration file `F` carries side-car backups `F.base@V`
//! (the version it was copied from) and `F.update@V` (a newer version
//! offered by the pack). Comparing the base version against the version
//! currently offered by the pack yields the update status written
//! verbatim into the build plan.

use anyhow::Result;
use rtemodel::{compare_versions, parse_lenient};
use semver::Version;
use std::path::Path;

pub const PLM_STATUS_MISSING_FILE: &str = "missing file";
pub const PLM_STATUS_MISSING_BASE: &str = "missing base";
pub const PLM_STATUS_UPDATE_REQUIRED: &str = "update required";
pub const PLM_STATUS_UPDATE_RECOMMENDED: &str = "update recommended";
pub const PLM_STATUS_UPDATE_SUGGESTED: &str = "update suggested";

/// How a status should surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlmSeverity {
    Error,
    Warning,
}

/// The audit outcome for one configuration file.
#[derive(Debug, Clone, Default)]
pub struct PlmAudit {
    /// The status string for the build plan; `None` when up to date.
    pub status: Option<String>,
    pub severity: Option<PlmSeverity>,
    pub base_version: Option<String>,
    /// More than one base or update side-car coexists.
    pub multiple_sidecars: bool,
}

/// Side-car versions found next to a deployed file.
fn sidecar_versions(deployed: &Path, kind: &str) -> Result<Vec<Version>> {
    let Some(parent) = deployed.parent() else {
        return Ok(Vec::new());
    };
    let Some(file_name) = deployed.file_name().map(|n| n.to_string_lossy().to_string())
    else {
        return Ok(Vec::new());
    };
    let prefix = format!("{file_name}.{kind}@");
    let mut versions = Vec::new();
    let entries = std::fs::read_dir(parent).ok().into_iter().flatten();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(version) = name.strip_prefix(&prefix) {
            if let Ok(version) = parse_lenient(version) {
                versions.push(version);
            }
        }
    }
    versions.sort_by(compare_versions);
    Ok(versions)
}

/// Audit one deployed configuration file against the version the pack
/// currently offers.
///
/// `is_dbgconf` downgrades a missing file to a warning; debug
/// configuration files are frequently created on demand.
pub fn audit(deployed: &Path, offered_version: &str, is_dbgconf: bool) -> Result<PlmAudit> {
    let mut audit = PlmAudit::default();

    if !deployed.is_file() {
        audit.status = Some(PLM_STATUS_MISSING_FILE.to_string());
        audit.severity = Some(if is_dbgconf {
            PlmSeverity::Warning
        } else {
            PlmSeverity::Error
        });
        return Ok(audit);
    }

    let bases = sidecar_versions(deployed, "base")?;
    let updates = sidecar_versions(deployed, "update")?;
    audit.multiple_sidecars = bases.len() > 1 || updates.len() > 1;

    let Some(base) = bases.last() else {
        audit.status = Some(PLM_STATUS_MISSING_BASE.to_string());
        audit.severity = Some(PlmSeverity::Warning);
        return Ok(audit);
    };
    audit.base_version = Some(base.to_string());

    let offered = match parse_lenient(offered_version) {
        Ok(version) => version,
        // A pack file without a version offers nothing to update to.
        Err(_) => return Ok(audit),
    };
    if compare_versions(base, &offered) == std::cmp::Ordering::Equal {
        return Ok(audit);
    }
    if base.major != offered.major {
        audit.status = Some(PLM_STATUS_UPDATE_REQUIRED.to_string());
        audit.severity = Some(PlmSeverity::Error);
    } else if base.minor != offered.minor {
        audit.status = Some(PLM_STATUS_UPDATE_RECOMMENDED.to_string());
        audit.severity = Some(PlmSeverity::Warning);
    } else {
        audit.status = Some(PLM_STATUS_UPDATE_SUGGESTED.to_string());
        audit.severity = Some(PlmSeverity::Warning);
    }
    Ok(audit)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn deploy(dir: &Path, name: &str, sidecars: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, "content").unwrap();
        for sidecar in sidecars {
            fs::write(dir.join(format!("{name}.{sidecar}")), "content").unwrap();
        }
        path
    }

    #[test]
    fn missing_file() {
        let tempdir = TempDir::new().unwrap();
        let audit = audit(&tempdir.path().join("absent.c"), "1.0.0", false).unwrap();
        assert_eq!(audit.status.as_deref(), Some(PLM_STATUS_MISSING_FILE));
        assert_eq!(audit.severity, Some(PlmSeverity::Error));

        let audit = super::audit(&tempdir.path().join("absent.dbgconf"), "1.0.0", true).unwrap();
        assert_eq!(audit.severity, Some(PlmSeverity::Warning));
    }

    #[test]
    fn missing_base() {
        let tempdir = TempDir::new().unwrap();
        let file = deploy(tempdir.path(), "system.c", &[]);
        let audit = audit(&file, "1.0.0", false).unwrap();
        assert_eq!(audit.status.as_deref(), Some(PLM_STATUS_MISSING_BASE));
        assert_eq!(audit.severity, Some(PlmSeverity::Warning));
    }

    #[test]
    fn semver_comparison_table() {
        let tempdir = TempDir::new().unwrap();
        let file = deploy(tempdir.path(), "system.c", &["base@1.0.0"]);

        let cases = [
            ("1.0.0", None),
            ("2.0.0", Some(PLM_STATUS_UPDATE_REQUIRED)),
            ("1.1.0", Some(PLM_STATUS_UPDATE_RECOMMENDED)),
            ("1.0.1", Some(PLM_STATUS_UPDATE_SUGGESTED)),
            ("1.0.0-rc1", Some(PLM_STATUS_UPDATE_SUGGESTED)),
        ];
        for (offered, expected) in cases {
            let audit = audit(&file, offered, false).unwrap();
            assert_eq!(audit.status.as_deref(), expected, "offered {offered}");
        }

        let audit = audit(&file, "2.0.0", false).unwrap();
        assert_eq!(audit.severity, Some(PlmSeverity::Error));
        assert_eq!(audit.base_version.as_deref(), Some("1.0.0"));
    }

    #[test]
    fn multiple_sidecars_flagged() {
        let tempdir = TempDir::new().unwrap();
        let file = deploy(
            tempdir.path(),
            "system.c",
            &["base@1.0.0", "base@1.1.0", "update@2.0.0"],
        );
        let audit = audit(&file, "1.1.0", false).unwrap();
        assert!(audit.multiple_sidecars);
        // The newest base wins the comparison.
        assert_eq!(audit.status, None);
    }
}
