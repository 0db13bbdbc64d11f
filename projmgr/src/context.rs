//! Context enumeration and option precedence.
//!
//! A context is one `(project, build-type, target-type)` combination with
//! the canonical name `project[.build][+target]`. Contexts are enumerated
//! in source order: projects, then build-types, then target-types; the
//! emitted index reflects the same order.

use crate::parser::{
    ClayerItem, ComponentNode, CprojectItem, ExecuteNode, GroupNode, LinkerNode, MemorySettings,
    MiscSettings, PackNode, ProcessorSettings, TargetSetNode,
};
use anyhow::{bail, ensure, Result};
use lazy_static::lazy_static;
use regex::Regex;
use rtemodel::{DependencyResult, TargetAttributes};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A build-type/target-type pair, both possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypePair {
    pub build: String,
    pub target: String,
}

/// A parsed context name: `project[.build][+target]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextName {
    pub project: String,
    pub build: String,
    pub target: String,
}

lazy_static! {
    static ref CONTEXT_NAME_RE: Regex =
        Regex::new(r"^(?P<project>[^.+]*)(\.(?P<build>[^.+]*))?(\+(?P<target>[^.+]*))?$").unwrap();
}

impl ContextName {
    /// Parse `project[.build][+target]`; every part may be empty or hold
    /// `*`/`?` wildcards.
    pub fn parse(value: &str) -> Result<Self> {
        let captures = CONTEXT_NAME_RE
            .captures(value)
            .ok_or_else(|| anyhow::anyhow!("Invalid context name '{value}'"))?;
        Ok(Self {
            project: captures.name("project").map_or("", |m| m.as_str()).to_string(),
            build: captures.name("build").map_or("", |m| m.as_str()).to_string(),
            target: captures.name("target").map_or("", |m| m.as_str()).to_string(),
        })
    }

    pub fn format(project: &str, build: &str, target: &str) -> String {
        let mut name = project.to_string();
        if !build.is_empty() {
            name.push('.');
            name.push_str(build);
        }
        if !target.is_empty() {
            name.push('+');
            name.push_str(target);
        }
        name
    }

    /// Glob-match against a concrete context name; empty parts match
    /// everything.
    pub fn matches(&self, name: &str) -> bool {
        let Ok(other) = ContextName::parse(name) else {
            return false;
        };
        let part = |pattern: &str, value: &str| {
            pattern.is_empty() || wildcard_match(pattern, value)
        };
        part(&self.project, &other.project)
            && part(&self.build, &other.build)
            && part(&self.target, &other.target)
    }
}

/// Case-sensitive glob match supporting `*` and `?`.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    fn inner(p: &[char], v: &[char]) -> bool {
        match (p.first(), v.first()) {
            (None, None) => true,
            (Some('*'), _) => inner(&p[1..], v) || (!v.is_empty() && inner(p, &v[1..])),
            (Some('?'), Some(_)) => inner(&p[1..], &v[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &v[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    inner(&p, &v)
}

/// Whether one `for-context`/`not-for-context` entry matches a type pair.
///
/// An entry is either `[.build][+target]` with empty-side wildcards, or a
/// full regular expression applied to the canonical `.build+target` form.
pub fn type_entry_matches(entry: &str, type_pair: &TypePair) -> bool {
    if let Some(captures) = CONTEXT_NAME_RE.captures(entry) {
        let project = captures.name("project").map_or("", |m| m.as_str());
        if project.is_empty() {
            let build = captures.name("build").map_or("", |m| m.as_str());
            let target = captures.name("target").map_or("", |m| m.as_str());
            let build_ok = build.is_empty() || wildcard_match(build, &type_pair.build);
            let target_ok = target.is_empty() || wildcard_match(target, &type_pair.target);
            return build_ok && target_ok;
        }
    }
    // Entries that do not follow the plain form are treated as a regular
    // expression over the canonical rendering.
    let canonical = format!(".{}+{}", type_pair.build, type_pair.target);
    Regex::new(entry).map(|re| re.is_match(&canonical)).unwrap_or(false)
}

/// Apply include/exclude filters: inclusion is an OR over `for-context`,
/// exclusion wins.
pub fn context_filters_allow(
    for_context: &[String],
    not_for_context: &[String],
    type_pair: &TypePair,
) -> bool {
    let included = for_context.is_empty()
        || for_context.iter().any(|e| type_entry_matches(e, type_pair));
    let excluded = not_for_context.iter().any(|e| type_entry_matches(e, type_pair));
    included && !excluded
}

/// Merged scalar and vector options of one context after precedence
/// resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSettings {
    pub compiler: String,
    pub optimize: String,
    pub debug: String,
    pub warnings: String,
    pub language_c: String,
    pub language_cpp: String,
    pub link_time_optimize: bool,
    pub defines: Vec<String>,
    pub defines_asm: Vec<String>,
    pub undefines: Vec<String>,
    pub add_paths: Vec<String>,
    pub add_paths_asm: Vec<String>,
    pub del_paths: Vec<String>,
    pub misc: MiscSettings,
    pub processor: ProcessorSettings,
    pub variables: BTreeMap<String, String>,
    pub context_map: Vec<ContextName>,
}

/// The per-level option sets feeding the merge, kept for diagnostics and
/// for re-runs after layer resolution.
#[derive(Debug, Clone, Default)]
pub struct TranslationControl {
    pub csolution: crate::parser::BuildSettings,
    pub cproject: crate::parser::BuildSettings,
    pub target_type: crate::parser::BuildSettings,
    pub build_type: crate::parser::BuildSettings,
    pub setups: Vec<crate::parser::BuildSettings>,
    pub clayers: BTreeMap<String, crate::parser::BuildSettings>,
    pub processed: MergedSettings,
}

impl TranslationControl {
    /// The precedence order: cproject, csolution, target-type,
    /// build-type, setups, clayers.
    fn ordered(&self) -> Vec<&crate::parser::BuildSettings> {
        let mut list = vec![
            &self.cproject,
            &self.csolution,
            &self.target_type,
            &self.build_type,
        ];
        list.extend(self.setups.iter());
        list.extend(self.clayers.values());
        list
    }

    /// Merge all levels into `processed`. Scalar options admit a single
    /// non-empty value; vector options union with `del` subtraction.
    pub fn merge(&mut self) -> Result<()> {
        let levels = self.ordered();
        let mut merged = MergedSettings::default();

        merged.compiler =
            merge_scalar("compiler", levels.iter().map(|l| l.compiler.as_deref()))?;
        merged.optimize =
            merge_scalar("optimize", levels.iter().map(|l| l.optimize.as_deref()))?;
        merged.debug = merge_scalar("debug", levels.iter().map(|l| l.debug.as_deref()))?;
        merged.warnings =
            merge_scalar("warnings", levels.iter().map(|l| l.warnings.as_deref()))?;
        merged.language_c =
            merge_scalar("language-C", levels.iter().map(|l| l.language_c.as_deref()))?;
        merged.language_cpp = merge_scalar(
            "language-CPP",
            levels.iter().map(|l| l.language_cpp.as_deref()),
        )?;
        merged.link_time_optimize =
            levels.iter().any(|l| l.link_time_optimize.unwrap_or(false));

        for level in &levels {
            add_uniquely(
                &mut merged.defines,
                crate::parser::normalized_defines(&level.define),
            );
            add_uniquely(
                &mut merged.defines_asm,
                crate::parser::normalized_defines(&level.define_asm),
            );
            add_uniquely(&mut merged.undefines, level.undefine.clone());
            add_uniquely(&mut merged.add_paths, level.add_path.clone());
            add_uniquely(&mut merged.add_paths_asm, level.add_path_asm.clone());
            add_uniquely(&mut merged.del_paths, level.del_path.clone());
            for entry in level.variables_flat() {
                merged.variables.entry(entry.0).or_insert(entry.1);
            }
            for entry in &level.context_map {
                if let Ok(name) = ContextName::parse(&entry.context) {
                    merged.context_map.push(name);
                }
            }
        }
        merged.defines.retain(|d| !merged.undefines.contains(d));
        merged
            .add_paths
            .retain(|p| !merged.del_paths.contains(p));
        merged
            .add_paths_asm
            .retain(|p| !merged.del_paths.contains(p));

        merged.processor = merge_processor(levels.iter().map(|l| l.processor.as_ref()))?;
        self.processed = merged;
        Ok(())
    }

    /// Fold compiler-specific `misc` lists for the selected compiler into
    /// `processed.misc`. Runs after compiler selection.
    pub fn merge_misc(&mut self, compiler_name: &str, cdefault_misc: &[MiscSettings]) {
        let mut sources: Vec<MiscSettings> = Vec::new();
        for level in self.ordered() {
            sources.extend(level.misc.iter().cloned());
        }
        sources.extend(cdefault_misc.iter().cloned());

        let mut folded = MiscSettings::default();
        for misc in &sources {
            let applies = match &misc.for_compiler {
                None => true,
                Some(spec) => spec.split_whitespace().any(|name| name == compiler_name),
            };
            if !applies {
                continue;
            }
            add_uniquely(&mut folded.asm, misc.asm.clone());
            add_uniquely(&mut folded.c, misc.c.clone());
            add_uniquely(&mut folded.cpp, misc.cpp.clone());
            add_uniquely(&mut folded.c_cpp, misc.c_cpp.clone());
            add_uniquely(&mut folded.link, misc.link.clone());
            add_uniquely(&mut folded.link_c, misc.link_c.clone());
            add_uniquely(&mut folded.link_cpp, misc.link_cpp.clone());
            add_uniquely(&mut folded.library, misc.library.clone());
        }
        self.processed.misc = folded;
    }
}

/// A single non-empty value wins; differing non-empty values conflict.
fn merge_scalar<'a, I: Iterator<Item = Option<&'a str>>>(
    option: &str,
    values: I,
) -> Result<String> {
    let mut out = String::new();
    for value in values.flatten() {
        if value.is_empty() || value == out {
            continue;
        }
        ensure!(
            out.is_empty(),
            "Redefinition of '{option}' from '{out}' into '{value}' is not allowed"
        );
        out = value.to_string();
    }
    Ok(out)
}

fn add_uniquely(dst: &mut Vec<String>, src: Vec<String>) {
    for item in src {
        if !dst.contains(&item) {
            dst.push(item);
        }
    }
}

fn merge_processor<'a, I: Iterator<Item = Option<&'a ProcessorSettings>>>(
    levels: I,
) -> Result<ProcessorSettings> {
    let mut out = ProcessorSettings::default();
    for processor in levels.flatten() {
        let fields: [(&str, &Option<String>, &mut Option<String>); 6] = [
            ("fpu", &processor.fpu, &mut out.fpu),
            ("dsp", &processor.dsp, &mut out.dsp),
            ("mve", &processor.mve, &mut out.mve),
            ("endian", &processor.endian, &mut out.endian),
            ("trustzone", &processor.trustzone, &mut out.trustzone),
            (
                "branch-protection",
                &processor.branch_protection,
                &mut out.branch_protection,
            ),
        ];
        for (name, value, slot) in fields {
            if let Some(value) = value {
                match slot {
                    Some(existing) if *existing != *value => bail!(
                        "Redefinition of 'processor: {name}' from '{existing}' into \
                         '{value}' is not allowed"
                    ),
                    _ => *slot = Some(value.clone()),
                }
            }
        }
    }
    Ok(out)
}

/// Resolved per-context directories; absolute paths.
#[derive(Debug, Clone, Default)]
pub struct Directories {
    pub cprj: PathBuf,
    pub intdir: PathBuf,
    pub outdir: PathBuf,
    pub cbuild: PathBuf,
    pub rte: PathBuf,
    pub tmpdir: PathBuf,
    pub out_base: PathBuf,
}

/// A device selection `vendor::name:pname`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSpec {
    pub vendor: String,
    pub name: String,
    pub pname: String,
}

impl DeviceSpec {
    pub fn parse(value: &str) -> Self {
        let (vendor, rest) = match value.split_once("::") {
            Some((vendor, rest)) => (vendor.to_string(), rest),
            None => (String::new(), value),
        };
        let (name, pname) = match rest.split_once(':') {
            Some((name, pname)) => (name.to_string(), pname.to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self {
            vendor,
            name,
            pname,
        }
    }

    pub fn info(&self) -> String {
        let mut out = String::new();
        if !self.vendor.is_empty() {
            out.push_str(&self.vendor);
            out.push_str("::");
        }
        out.push_str(&self.name);
        if !self.pname.is_empty() {
            out.push(':');
            out.push_str(&self.pname);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.vendor.is_empty() && self.name.is_empty() && self.pname.is_empty()
    }
}

/// A board selection `vendor::name:revision`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardSpec {
    pub vendor: String,
    pub name: String,
    pub revision: String,
}

impl BoardSpec {
    pub fn parse(value: &str) -> Self {
        let (vendor, rest) = match value.split_once("::") {
            Some((vendor, rest)) => (vendor.to_string(), rest),
            None => (String::new(), value),
        };
        let (name, revision) = match rest.split_once(':') {
            Some((name, revision)) => (name.to_string(), revision.to_string()),
            None => (rest.to_string(), String::new()),
        };
        Self {
            vendor,
            name,
            revision,
        }
    }

    pub fn info(&self) -> String {
        let mut out = String::new();
        if !self.vendor.is_empty() {
            out.push_str(&self.vendor);
            out.push_str("::");
        }
        out.push_str(&self.name);
        if !self.revision.is_empty() {
            out.push(':');
            out.push_str(&self.revision);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.vendor.is_empty() && self.name.is_empty()
    }
}

/// Merge several partial device selections; non-empty fields must agree.
pub fn merge_device_specs<'a, I: Iterator<Item = &'a str>>(values: I) -> Result<DeviceSpec> {
    let mut out = DeviceSpec::default();
    for value in values.filter(|v| !v.is_empty()) {
        let spec = DeviceSpec::parse(value);
        let fields = [
            (&spec.vendor, &mut out.vendor),
            (&spec.name, &mut out.name),
            (&spec.pname, &mut out.pname),
        ];
        for (value, slot) in fields {
            if value.is_empty() {
                continue;
            }
            if slot.is_empty() {
                *slot = value.clone();
            } else if slot != value {
                bail!(
                    "Redefinition of 'device' from '{}' into '{}' is not allowed",
                    slot,
                    value
                );
            }
        }
    }
    Ok(out)
}

/// A toolchain resolved for one context.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolchainItem {
    pub name: String,
    pub version: String,
    pub required: String,
    pub root: String,
    pub config: String,
}

/// One selected component with its bookkeeping.
#[derive(Debug, Clone)]
pub struct SelectedEntry {
    pub selected: rtemodel::SelectedComponent,
    pub generator: String,
    pub layer: String,
}

/// A deployed configuration file of a component.
#[derive(Debug, Clone, Default)]
pub struct ConfigFileEntry {
    /// Path under the RTE directory.
    pub path: PathBuf,
    /// Pack-relative source file.
    pub source: PathBuf,
    pub version: String,
}

/// A file contributed by a component, resolved to its absolute location.
#[derive(Debug, Clone, Default)]
pub struct ComponentFileEntry {
    pub name: String,
    pub attr: String,
    pub category: String,
    pub language: String,
    pub scope: String,
    pub version: String,
    pub select: String,
}

/// An API implemented by the selection.
#[derive(Debug, Clone, Default)]
pub struct ApiEntry {
    pub id: String,
    pub implemented_by: Vec<String>,
    pub files: Vec<ComponentFileEntry>,
    pub from_pack: String,
}

/// A generator referenced by a selected component.
#[derive(Debug, Clone, Default)]
pub struct GeneratorEntry {
    pub id: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
    pub gpdsc: PathBuf,
    pub from_pack: String,
    pub components: Vec<String>,
}

/// Linker inputs after processing.
#[derive(Debug, Clone, Default)]
pub struct LinkerContext {
    pub auto: bool,
    pub script: String,
    pub regions: String,
    pub defines: Vec<String>,
}

/// Resolved output artefacts: `type -> filename`.
pub type OutputFiles = BTreeMap<String, String>;

/// One fully processed context.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub name: String,
    pub project_name: String,
    pub type_pair: TypePair,
    pub description: String,
    pub cproject: CprojectItem,
    pub clayers: BTreeMap<String, ClayerItem>,
    pub directories: Directories,
    pub controls: TranslationControl,

    pub device: String,
    pub board: String,
    pub device_item: DeviceSpec,
    pub board_item: BoardSpec,
    pub device_pack: Option<String>,
    pub board_pack: Option<String>,
    pub memories: Vec<MemorySettings>,
    pub target_set: Vec<TargetSetNode>,
    pub target_attributes: TargetAttributes,

    pub compiler: String,
    pub toolchain: ToolchainItem,

    pub pack_requirements: Vec<PackNode>,
    pub resolved_pack_ids: BTreeSet<String>,
    pub pack_paths: BTreeMap<String, PathBuf>,
    pub user_pack_to_resolved: BTreeMap<String, BTreeSet<String>>,
    pub local_pack_paths: BTreeSet<String>,
    pub missing_packs: Vec<String>,
    pub unused_packs: Vec<String>,

    pub component_requirements: Vec<(ComponentNode, String)>,
    pub components: BTreeMap<String, SelectedEntry>,
    pub validation_results: Vec<DependencyResult>,
    pub apis: Vec<ApiEntry>,

    pub config_files: BTreeMap<String, Vec<ConfigFileEntry>>,
    pub plm_status: BTreeMap<String, String>,
    pub component_files: BTreeMap<String, Vec<ComponentFileEntry>>,

    pub groups: Vec<GroupNode>,
    pub generators: BTreeMap<String, GeneratorEntry>,
    pub linker: LinkerContext,
    pub linker_nodes: Vec<LinkerNode>,
    pub executes: Vec<ExecuteNode>,
    pub constructed_files: Vec<PathBuf>,

    pub variables: BTreeMap<String, String>,
    pub undefined_variables: BTreeSet<String>,
    pub compatible_layers: BTreeMap<String, Vec<String>>,
    pub layer_sets: BTreeMap<String, BTreeSet<String>>,

    pub output_base_name: String,
    pub output_types: Vec<String>,
    pub outputs: OutputFiles,

    pub depends_on: Vec<String>,
    pub precedences_done: bool,
    pub need_rebuild: bool,
}

impl Context {
    pub fn new(project_name: &str, build: &str, target: &str) -> Self {
        Self {
            name: ContextName::format(project_name, build, target),
            project_name: project_name.to_string(),
            type_pair: TypePair {
                build: build.to_string(),
                target: target.to_string(),
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::parser::{BuildSettings, DefineEntry};

    #[test]
    fn context_name_parsing() {
        let name = ContextName::parse("Blinky.Debug+A").unwrap();
        assert_eq!(name.project, "Blinky");
        assert_eq!(name.build, "Debug");
        assert_eq!(name.target, "A");

        let name = ContextName::parse("Blinky+A").unwrap();
        assert_eq!(name.build, "");
        assert_eq!(name.target, "A");

        let name = ContextName::parse("+A").unwrap();
        assert_eq!(name.project, "");
        assert_eq!(name.target, "A");

        assert_eq!(ContextName::format("Blinky", "", "A"), "Blinky+A");
        assert_eq!(
            ContextName::format("Blinky", "Debug", "A"),
            "Blinky.Debug+A"
        );
    }

    #[test]
    fn context_name_globs() {
        let selector = ContextName::parse("Blinky.*+A").unwrap();
        assert!(selector.matches("Blinky.Debug+A"));
        assert!(selector.matches("Blinky.Release+A"));
        assert!(!selector.matches("Blinky.Debug+B"));

        let all = ContextName::parse("").unwrap();
        assert!(all.matches("Anything.Debug+B"));
    }

    #[test]
    fn type_filter_entries() {
        let pair = TypePair {
            build: "Debug".to_string(),
            target: "A".to_string(),
        };
        assert!(type_entry_matches("+A", &pair));
        assert!(type_entry_matches(".Debug", &pair));
        assert!(type_entry_matches(".Debug+A", &pair));
        assert!(!type_entry_matches(".Release", &pair));
        assert!(!type_entry_matches("+B", &pair));
        // Regex form over the canonical rendering.
        assert!(type_entry_matches(r"\.Debug\+[AB]", &pair));
    }

    #[test]
    fn include_or_exclude_wins() {
        let pair = TypePair {
            build: "Debug".to_string(),
            target: "A".to_string(),
        };
        let includes = vec!["+A".to_string()];
        let excludes = vec![".Debug".to_string()];
        assert!(context_filters_allow(&includes, &[], &pair));
        assert!(!context_filters_allow(&includes, &excludes, &pair));
        assert!(context_filters_allow(&[], &[], &pair));
    }

    fn settings(compiler: Option<&str>, defines: &[&str]) -> BuildSettings {
        BuildSettings {
            compiler: compiler.map(str::to_string),
            define: defines
                .iter()
                .map(|d| DefineEntry::Name(d.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn scalar_precedence_conflicts_are_errors() {
        let mut controls = TranslationControl {
            cproject: settings(Some("AC6"), &[]),
            build_type: settings(Some("GCC"), &[]),
            ..Default::default()
        };
        let err = controls.merge().unwrap_err();
        assert!(err.to_string().contains("Redefinition of 'compiler'"), "{err}");

        let mut controls = TranslationControl {
            cproject: settings(Some("AC6"), &[]),
            build_type: settings(Some("AC6"), &[]),
            ..Default::default()
        };
        controls.merge().unwrap();
        assert_eq!(controls.processed.compiler, "AC6");
    }

    #[test]
    fn vector_union_and_del_subtraction() {
        let mut controls = TranslationControl {
            cproject: settings(None, &["A", "B"]),
            target_type: settings(None, &["B", "C"]),
            ..Default::default()
        };
        controls.build_type.undefine = vec!["C".to_string()];
        controls.cproject.add_path = vec!["./inc".to_string(), "./drop".to_string()];
        controls.build_type.del_path = vec!["./drop".to_string()];
        controls.merge().unwrap();
        assert_eq!(controls.processed.defines, vec!["A", "B"]);
        assert_eq!(controls.processed.add_paths, vec!["./inc"]);
    }

    #[test]
    fn misc_folds_by_compiler() {
        let mut controls = TranslationControl::default();
        controls.cproject.misc = vec![
            MiscSettings {
                for_compiler: Some("AC6".to_string()),
                c: vec!["-fshort-enums".to_string()],
                ..Default::default()
            },
            MiscSettings {
                for_compiler: Some("GCC".to_string()),
                c: vec!["-ffunction-sections".to_string()],
                ..Default::default()
            },
            MiscSettings {
                for_compiler: None,
                link: vec!["--map".to_string()],
                ..Default::default()
            },
        ];
        controls.merge().unwrap();
        controls.merge_misc("AC6", &[]);
        assert_eq!(controls.processed.misc.c, vec!["-fshort-enums"]);
        assert_eq!(controls.processed.misc.link, vec!["--map"]);
    }

    #[test]
    fn device_spec_parsing_and_merging() {
        let spec = DeviceSpec::parse("ARM::ARMCM3:cm3_core0");
        assert_eq!(spec.vendor, "ARM");
        assert_eq!(spec.name, "ARMCM3");
        assert_eq!(spec.pname, "cm3_core0");

        let merged =
            merge_device_specs(["ARMCM3", "ARM::ARMCM3:core1"].into_iter()).unwrap();
        assert_eq!(merged.vendor, "ARM");
        assert_eq!(merged.pname, "core1");

        let err = merge_device_specs(["ARMCM3", "ARMCM4"].into_iter()).unwrap_err();
        assert!(err.to_string().contains("Redefinition of 'device'"), "{err}");
    }

    #[test]
    fn processor_merge_detects_conflicts() {
        let mut a = BuildSettings::default();
        a.processor = Some(ProcessorSettings {
            fpu: Some("dp".to_string()),
            ..Default::default()
        });
        let mut b = BuildSettings::default();
        b.processor = Some(ProcessorSettings {
            fpu: Some("off".to_string()),
            ..Default::default()
        });
        let mut controls = TranslationControl {
            cproject: a,
            build_type: b,
            ..Default::default()
        };
        let err = controls.merge().unwrap_err();
        assert!(err.to_string().contains("processor: fpu"), "{err}");
    }
}
