//! Plain-data structures for the YAML input formats.
//!
//! One struct per node of the csolution / cproject / clayer / cdefault /
//! cbuild-set / cbuild-pack / debug-adapters formats. Deserialization is
//! permissive about optional keys; unknown-key checking is a separate pass
//! (see `schema`), mirroring the split between loading and validation.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Accept either a scalar string or a list of strings.
pub fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}

/// A `define:` entry: either a bare name or a single-pair `NAME: value`
/// mapping; both normalize to the `NAME[=VALUE]` string form.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DefineEntry {
    Name(String),
    Pair(BTreeMap<String, serde_yaml::Value>),
}

impl DefineEntry {
    pub fn normalized(&self) -> String {
        match self {
            DefineEntry::Name(name) => name.clone(),
            DefineEntry::Pair(map) => match map.iter().next() {
                Some((key, value)) => match value {
                    serde_yaml::Value::String(s) => format!("{key}=\"{s}\""),
                    serde_yaml::Value::Bool(b) => format!("{key}={b}"),
                    serde_yaml::Value::Number(n) => format!("{key}={n}"),
                    _ => key.clone(),
                },
                None => String::new(),
            },
        }
    }
}

pub fn normalized_defines(entries: &[DefineEntry]) -> Vec<String> {
    entries.iter().map(DefineEntry::normalized).collect()
}

/// Compiler-specific option lists.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MiscSettings {
    pub for_compiler: Option<String>,
    #[serde(rename = "ASM", default)]
    pub asm: Vec<String>,
    #[serde(rename = "C", default)]
    pub c: Vec<String>,
    #[serde(rename = "CPP", default)]
    pub cpp: Vec<String>,
    #[serde(rename = "C-CPP", default)]
    pub c_cpp: Vec<String>,
    #[serde(rename = "Link", default)]
    pub link: Vec<String>,
    #[serde(rename = "Link-C", default)]
    pub link_c: Vec<String>,
    #[serde(rename = "Link-CPP", default)]
    pub link_cpp: Vec<String>,
    #[serde(rename = "Library", default)]
    pub library: Vec<String>,
}

/// User-selectable processor attributes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessorSettings {
    pub fpu: Option<String>,
    pub dsp: Option<String>,
    pub mve: Option<String>,
    pub endian: Option<String>,
    pub trustzone: Option<String>,
    pub branch_protection: Option<String>,
}

/// Build options that may appear at every precedence level.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildSettings {
    pub compiler: Option<String>,
    pub optimize: Option<String>,
    pub debug: Option<String>,
    pub warnings: Option<String>,
    #[serde(rename = "language-C")]
    pub language_c: Option<String>,
    #[serde(rename = "language-CPP")]
    pub language_cpp: Option<String>,
    pub link_time_optimize: Option<bool>,
    #[serde(default)]
    pub define: Vec<DefineEntry>,
    #[serde(rename = "define-asm", default)]
    pub define_asm: Vec<DefineEntry>,
    #[serde(default)]
    pub undefine: Vec<String>,
    #[serde(default)]
    pub add_path: Vec<String>,
    #[serde(rename = "add-path-asm", default)]
    pub add_path_asm: Vec<String>,
    #[serde(default)]
    pub del_path: Vec<String>,
    #[serde(default)]
    pub misc: Vec<MiscSettings>,
    pub processor: Option<ProcessorSettings>,
    /// List of single-pair maps in the input; flattened on access.
    #[serde(default)]
    pub variables: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub context_map: Vec<ContextMapEntry>,
}

impl BuildSettings {
    pub fn variables_flat(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for entry in &self.variables {
            for (key, value) in entry {
                map.insert(key.clone(), value.clone());
            }
        }
        map
    }
}

/// Redirects `$...(context)$` references of one project to another
/// build/target type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContextMapEntry {
    pub context: String,
}

/// A memory region added at target-type level.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MemorySettings {
    pub name: Option<String>,
    pub access: Option<String>,
    pub start: Option<serde_yaml::Value>,
    pub size: Option<serde_yaml::Value>,
    pub algorithm: Option<String>,
}

/// An image loaded by a target set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImageNode {
    pub context: Option<String>,
    pub image: Option<String>,
    pub info: Option<String>,
    #[serde(rename = "type")]
    pub image_type: Option<String>,
    pub load: Option<String>,
    pub load_offset: Option<serde_yaml::Value>,
    pub pname: Option<String>,
}

/// Debugger configuration of a target set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebuggerNode {
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub clock: Option<serde_yaml::Value>,
    pub dbgconf: Option<String>,
    pub start_pname: Option<String>,
}

/// A named debug/run configuration of a target type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetSetNode {
    #[serde(rename = "set", default)]
    pub set: String,
    pub info: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageNode>,
    pub debugger: Option<DebuggerNode>,
}

/// One entry of `target-types:`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetTypeNode {
    #[serde(rename = "type")]
    pub name: String,
    pub board: Option<String>,
    pub device: Option<String>,
    #[serde(default)]
    pub memory: Vec<MemorySettings>,
    #[serde(default)]
    pub target_set: Vec<TargetSetNode>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// One entry of `build-types:`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildTypeNode {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// A pack requirement or a project-local pack reference.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PackNode {
    #[serde(default)]
    pub pack: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
}

/// A project reference inside `projects:`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectEntryNode {
    pub project: String,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
}

/// Output directory overrides at solution level.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputDirsNode {
    pub outdir: Option<String>,
    pub tmpdir: Option<String>,
    pub intdir: Option<String>,
    pub cprjdir: Option<String>,
    pub rtedir: Option<String>,
}

/// An `executes:` node: a user command with declared inputs and outputs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecuteNode {
    pub execute: String,
    pub run: String,
    #[serde(default)]
    pub always: bool,
    #[serde(default)]
    pub input: Vec<String>,
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
}

/// Generator output options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneratorsNode {
    pub base_dir: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, GeneratorOptionsNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GeneratorOptionsNode {
    pub path: Option<String>,
    pub name: Option<String>,
    pub map: Option<String>,
}

/// The `solution:` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SolutionNode {
    pub description: Option<String>,
    pub created_for: Option<String>,
    /// Presence of the key enables cdefault injection.
    pub cdefault: Option<serde_yaml::Value>,
    #[serde(default)]
    pub select_compiler: Vec<String>,
    pub output_dirs: Option<OutputDirsNode>,
    #[serde(default)]
    pub packs: Vec<PackNode>,
    #[serde(default)]
    pub target_types: Vec<TargetTypeNode>,
    #[serde(default)]
    pub build_types: Vec<BuildTypeNode>,
    #[serde(default)]
    pub projects: Vec<ProjectEntryNode>,
    #[serde(default)]
    pub executes: Vec<ExecuteNode>,
    pub generators: Option<GeneratorsNode>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CsolutionFile {
    pub solution: SolutionNode,
}

/// A parsed csolution with its location.
#[derive(Debug, Clone, Default)]
pub struct CsolutionItem {
    pub name: String,
    pub path: PathBuf,
    pub directory: PathBuf,
    pub solution: SolutionNode,
}

/// `output:` of a project: base name and artefact types.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputNode {
    pub base_name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "string_or_vec")]
    pub types: Vec<String>,
}

/// A component requirement.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ComponentNode {
    pub component: String,
    pub condition: Option<String>,
    pub from_pack: Option<String>,
    pub instances: Option<u32>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// A source file node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileNode {
    pub file: String,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub for_compiler: Vec<String>,
    pub category: Option<String>,
    pub link: Option<String>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// A group of files, possibly nested.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupNode {
    pub group: String,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub for_compiler: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileNode>,
    #[serde(default)]
    pub groups: Vec<GroupNode>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// A layer reference inside a project.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LayerNode {
    #[serde(default)]
    pub layer: String,
    #[serde(rename = "type", default)]
    pub layer_type: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
}

/// One provided or consumed endpoint: either a bare key or a
/// `key: value` pair with a string or integer value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ConnectPair {
    Bare(String),
    Pair(BTreeMap<String, Option<serde_yaml::Value>>),
}

/// A connection of a layer or project.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectNode {
    #[serde(default)]
    pub connect: String,
    pub set: Option<String>,
    pub info: Option<String>,
    #[serde(default)]
    pub provides: Vec<ConnectPair>,
    #[serde(default)]
    pub consumes: Vec<ConnectPair>,
}

impl ConnectNode {
    pub fn provides_flat(&self) -> Vec<(String, String)> {
        flatten_pairs(&self.provides)
    }

    pub fn consumes_flat(&self) -> Vec<(String, String)> {
        flatten_pairs(&self.consumes)
    }
}

fn flatten_pairs(pairs: &[ConnectPair]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for pair in pairs {
        match pair {
            ConnectPair::Bare(key) => out.push((key.clone(), String::new())),
            ConnectPair::Pair(map) => {
                for (key, value) in map {
                    let value = match value {
                        None => String::new(),
                        Some(serde_yaml::Value::String(s)) => s.clone(),
                        Some(serde_yaml::Value::Number(n)) => n.to_string(),
                        Some(serde_yaml::Value::Bool(b)) => b.to_string(),
                        Some(serde_yaml::Value::Null) | Some(_) => String::new(),
                    };
                    out.push((key.clone(), value));
                }
            }
        }
    }
    out
}

/// A linker node of a project, setup or layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LinkerNode {
    #[serde(default)]
    pub auto: bool,
    pub regions: Option<String>,
    pub script: Option<String>,
    #[serde(default)]
    pub define: Vec<DefineEntry>,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub for_compiler: Vec<String>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
}

/// A project setup entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SetupNode {
    pub setup: String,
    #[serde(default, deserialize_with = "string_or_vec")]
    pub for_compiler: Vec<String>,
    #[serde(default)]
    pub for_context: Vec<String>,
    #[serde(default)]
    pub not_for_context: Vec<String>,
    pub output: Option<OutputNode>,
    #[serde(default)]
    pub linker: Vec<LinkerNode>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

/// The `project:` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectNode {
    pub description: Option<String>,
    pub output: Option<OutputNode>,
    pub rte: Option<RteNode>,
    #[serde(default)]
    pub packs: Vec<PackNode>,
    #[serde(default)]
    pub components: Vec<ComponentNode>,
    #[serde(default)]
    pub groups: Vec<GroupNode>,
    #[serde(default)]
    pub layers: Vec<LayerNode>,
    #[serde(default)]
    pub setups: Vec<SetupNode>,
    #[serde(default)]
    pub connections: Vec<ConnectNode>,
    #[serde(default)]
    pub linker: Vec<LinkerNode>,
    #[serde(default)]
    pub executes: Vec<ExecuteNode>,
    pub generators: Option<GeneratorsNode>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RteNode {
    pub base_dir: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CprojectFile {
    pub project: ProjectNode,
}

/// A parsed cproject with its location.
#[derive(Debug, Clone, Default)]
pub struct CprojectItem {
    pub name: String,
    pub path: PathBuf,
    pub directory: PathBuf,
    pub project: ProjectNode,
}

/// The `layer:` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClayerNode {
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub layer_type: String,
    pub for_board: Option<String>,
    pub for_device: Option<String>,
    #[serde(default)]
    pub packs: Vec<PackNode>,
    #[serde(default)]
    pub components: Vec<ComponentNode>,
    #[serde(default)]
    pub groups: Vec<GroupNode>,
    #[serde(default)]
    pub connections: Vec<ConnectNode>,
    #[serde(default)]
    pub linker: Vec<LinkerNode>,
    pub generators: Option<GeneratorsNode>,
    #[serde(flatten)]
    pub build: BuildSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClayerFile {
    pub layer: ClayerNode,
}

/// A parsed clayer with its location.
#[derive(Debug, Clone, Default)]
pub struct ClayerItem {
    pub name: String,
    pub path: PathBuf,
    pub directory: PathBuf,
    pub layer: ClayerNode,
}

/// The `default:` document (cdefault.yml).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CdefaultNode {
    pub compiler: Option<String>,
    #[serde(default)]
    pub select_compiler: Vec<String>,
    #[serde(default)]
    pub misc: Vec<MiscSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CdefaultFile {
    #[serde(rename = "default")]
    pub default: CdefaultNode,
}

#[derive(Debug, Clone, Default)]
pub struct CdefaultItem {
    pub path: PathBuf,
    pub default: CdefaultNode,
}

/// One context reference inside a cbuild-set file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CbuildSetContextNode {
    pub context: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CbuildSetNode {
    pub generated_by: Option<String>,
    #[serde(default)]
    pub contexts: Vec<CbuildSetContextNode>,
    pub compiler: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CbuildSetFile {
    pub cbuild_set: CbuildSetNode,
}

/// One resolved pack entry of a cbuild-pack file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolvedPackNode {
    pub resolved_pack: String,
    #[serde(default)]
    pub selected_by_pack: Vec<String>,
    #[serde(default)]
    pub selected_by: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CbuildPackNode {
    #[serde(default)]
    pub resolved_packs: Vec<ResolvedPackNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CbuildPackFile {
    pub cbuild_pack: CbuildPackNode,
}

/// Defaults carried by a debug adapter entry.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebugAdapterDefaultsNode {
    pub port: Option<serde_yaml::Value>,
    pub protocol: Option<String>,
    pub clock: Option<serde_yaml::Value>,
}

/// One debug adapter description.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebugAdapterNode {
    pub name: String,
    #[serde(default)]
    pub alias: Vec<String>,
    pub template: Option<String>,
    pub defaults: Option<DebugAdapterDefaultsNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebugAdaptersFile {
    #[serde(default)]
    pub debug_adapters: Vec<DebugAdapterNode>,
}
