//! The pack data model.
//!
//! A [`Pack`] is the parsed form of one pack description file. It owns plain
//! data only: devices, boards, components, APIs, generators, taxonomy and
//! conditions. Conditions are kept in a pool keyed by their identifier and
//! are referenced by name from components and from other conditions, so that
//! cyclic condition graphs hold names, never ownership.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Identity of a pack: `Vendor::Name@Version`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackId {
    pub vendor: String,
    pub name: String,
    pub version: Version,
}

impl PackId {
    /// The id without the version part, `Vendor::Name`.
    pub fn common_id(&self) -> String {
        format!("{}::{}", self.vendor, self.name)
    }
}

impl Display for PackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}@{}", self.vendor, self.name, self.version)
    }
}

/// One parsed pack description.
#[derive(Debug, Clone, Default)]
pub struct Pack {
    pub id: PackId,
    pub description: String,
    /// Absolute path of the pack description file.
    pub pdsc_path: PathBuf,
    /// Absolute path of the directory that contains the pack content.
    pub path: PathBuf,
    /// True when the pack was referenced through a project-local `path:`.
    pub local: bool,
    pub devices: Vec<Device>,
    pub boards: Vec<Board>,
    pub components: Vec<Component>,
    pub apis: Vec<Api>,
    pub conditions: BTreeMap<String, Condition>,
    pub generators: BTreeMap<String, Generator>,
    pub taxonomy: Vec<Taxonomy>,
    pub clayers: Vec<PackLayer>,
    pub requirements: Vec<PackRequirement>,
    pub license: Option<String>,
}

impl Default for PackId {
    fn default() -> Self {
        Self {
            vendor: String::new(),
            name: String::new(),
            version: Version::new(0, 0, 0),
        }
    }
}

impl Pack {
    pub fn condition(&self, id: &str) -> Option<&Condition> {
        self.conditions.get(id)
    }
}

/// A pack-to-pack requirement recorded in a description file.
#[derive(Debug, Clone, Default)]
pub struct PackRequirement {
    pub vendor: String,
    pub name: String,
    pub version_range: String,
}

/// A reusable layer shipped inside a pack.
#[derive(Debug, Clone, Default)]
pub struct PackLayer {
    pub layer_type: String,
    pub file: String,
    pub copy_to: String,
}

/// Processor attributes of one device processor (`Pname`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Processor {
    pub pname: String,
    pub core: String,
    pub fpu: String,
    pub dsp: String,
    pub mve: String,
    pub endian: String,
    pub trustzone: String,
    pub pacbti: String,
    pub clock: String,
}

impl Processor {
    /// The attribute map used for condition evaluation and target filtering.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let entries = [
            ("Pname", &self.pname),
            ("Dcore", &self.core),
            ("Dfpu", &self.fpu),
            ("Ddsp", &self.dsp),
            ("Dmve", &self.mve),
            ("Dendian", &self.endian),
            ("Dtz", &self.trustzone),
            ("Dpacbti", &self.pacbti),
        ];
        for (key, value) in entries {
            if !value.is_empty() {
                map.insert(key.to_string(), value.clone());
            }
        }
        map
    }
}

/// A memory region of a device or board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryItem {
    pub name: String,
    pub access: String,
    pub start: String,
    pub size: String,
    pub default: bool,
    pub startup: bool,
    pub pname: String,
    pub algorithm: String,
}

/// A flattened device entry.
///
/// The description file nests family, sub-family, device and variant; the
/// reader flattens the hierarchy and records effective attributes per entry.
#[derive(Debug, Clone, Default)]
pub struct Device {
    pub vendor: String,
    pub name: String,
    pub family: String,
    /// Set when this entry is a variant of another device.
    pub variant_of: Option<String>,
    /// Names of the variants of this device, in document order.
    pub variants: Vec<String>,
    pub description: String,
    pub processors: Vec<Processor>,
    pub memories: Vec<MemoryItem>,
    pub algorithms: Vec<String>,
    pub debug_config: Option<String>,
    pub header: Option<String>,
    pub define: Option<String>,
}

impl Device {
    pub fn processor(&self, pname: &str) -> Option<&Processor> {
        if pname.is_empty() && self.processors.len() == 1 {
            return self.processors.first();
        }
        self.processors.iter().find(|p| p.pname == pname)
    }

    pub fn processor_names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.pname.clone()).collect()
    }
}

/// Reference from a board to a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentifier {
    pub vendor: String,
    pub name: String,
    pub pname: String,
}

/// A board entry.
#[derive(Debug, Clone, Default)]
pub struct Board {
    pub vendor: String,
    pub name: String,
    pub revision: String,
    pub description: String,
    pub mounted_devices: Vec<DeviceIdentifier>,
    pub compatible_devices: Vec<DeviceIdentifier>,
    pub memories: Vec<MemoryItem>,
    pub algorithms: Vec<String>,
}

impl Board {
    /// `Vendor::Name` with the revision appended when present.
    pub fn full_name(&self) -> String {
        if self.revision.is_empty() {
            format!("{}::{}", self.vendor, self.name)
        } else {
            format!("{}::{}:{}", self.vendor, self.name, self.revision)
        }
    }
}

/// File categories a component file can declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FileCategory {
    Doc,
    Header,
    Include,
    Library,
    Object,
    Source,
    SourceC,
    SourceCpp,
    SourceAsm,
    LinkerScript,
    Utility,
    Image,
    PreIncludeGlobal,
    PreIncludeLocal,
    Other,
}

serde_plain::derive_fromstr_from_deserialize!(FileCategory);
serde_plain::derive_display_from_serialize!(FileCategory);

impl Default for FileCategory {
    fn default() -> Self {
        FileCategory::Other
    }
}

impl FileCategory {
    pub fn parse(value: &str) -> Self {
        value.parse().unwrap_or(FileCategory::Other)
    }
}

/// A file declared by a component or an API.
#[derive(Debug, Clone, Default)]
pub struct FileItem {
    pub name: String,
    pub category: FileCategory,
    /// `config` or `template`; empty for plain files.
    pub attr: String,
    pub version: String,
    pub condition: Option<String>,
    pub select: String,
    pub language: String,
    pub scope: String,
}

impl FileItem {
    pub fn is_config(&self) -> bool {
        self.attr == "config"
    }
}

/// A software component.
#[derive(Debug, Clone, Default)]
pub struct Component {
    pub vendor: String,
    pub bundle: String,
    pub class: String,
    pub group: String,
    pub sub: String,
    pub variant: String,
    pub version: String,
    pub api_version: String,
    pub condition: Option<String>,
    pub max_instances: u32,
    pub generator: Option<String>,
    pub default_variant: bool,
    pub description: String,
    pub files: Vec<FileItem>,
    pub rte_components_h: Option<String>,
}

impl Component {
    /// `Cclass[&Cbundle]:Cgroup[:Csub]`: the identity without vendor,
    /// variant and version.
    pub fn taxonomy_id(&self) -> String {
        let mut id = self.class.clone();
        if !self.bundle.is_empty() {
            id.push('&');
            id.push_str(&self.bundle);
        }
        id.push(':');
        id.push_str(&self.group);
        if !self.sub.is_empty() {
            id.push(':');
            id.push_str(&self.sub);
        }
        id
    }

    /// The aggregate id: vendor and taxonomy, without variant and version.
    /// At most one component per aggregate id may be selected in a context.
    pub fn aggregate_id(&self) -> String {
        format!("{}::{}", self.vendor, self.taxonomy_id())
    }

    /// The partial id used for user-facing matching: taxonomy plus variant.
    pub fn partial_id(&self) -> String {
        let mut id = self.taxonomy_id();
        if !self.variant.is_empty() {
            id.push('&');
            id.push_str(&self.variant);
        }
        id
    }

    /// The fully qualified id including vendor, variant and version.
    pub fn full_id(&self) -> String {
        let mut id = format!("{}::{}", self.vendor, self.taxonomy_id());
        if !self.variant.is_empty() {
            id.push('&');
            id.push_str(&self.variant);
        }
        if !self.version.is_empty() {
            id.push('@');
            id.push_str(&self.version);
        }
        id
    }

    /// The attribute map seen by condition expressions.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let entries = [
            ("Cvendor", &self.vendor),
            ("Cbundle", &self.bundle),
            ("Cclass", &self.class),
            ("Cgroup", &self.group),
            ("Csub", &self.sub),
            ("Cvariant", &self.variant),
            ("Cversion", &self.version),
            ("Capiversion", &self.api_version),
        ];
        for (key, value) in entries {
            if !value.is_empty() {
                map.insert(key.to_string(), value.clone());
            }
        }
        map
    }
}

/// An API: the polymorphic contract shape of a component.
#[derive(Debug, Clone, Default)]
pub struct Api {
    pub class: String,
    pub group: String,
    pub api_version: String,
    pub exclusive: bool,
    pub condition: Option<String>,
    pub description: String,
    pub files: Vec<FileItem>,
}

impl Api {
    pub fn id(&self) -> String {
        let mut id = format!("{}:{}", self.class, self.group);
        if !self.api_version.is_empty() {
            id.push('@');
            id.push_str(&self.api_version);
        }
        id
    }

    /// Whether a component implements this API.
    pub fn implemented_by(&self, component: &Component) -> bool {
        !component.api_version.is_empty()
            && component.class == self.class
            && component.group == self.group
    }
}

/// Kinds of condition expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Require,
    Accept,
    Deny,
}

/// One condition expression: a kind plus an attribute predicate set.
#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub attributes: BTreeMap<String, String>,
}

impl Expression {
    /// The nested condition referenced by this expression, if any.
    pub fn condition_ref(&self) -> Option<&str> {
        self.attributes.get("condition").map(String::as_str)
    }

    /// Whether the expression predicates over device, board or toolchain
    /// attributes.
    pub fn is_target_expression(&self) -> bool {
        self.attributes
            .keys()
            .any(|k| k.starts_with('D') || k.starts_with('B') || k.starts_with('T'))
    }

    /// Whether the expression predicates over component attributes.
    pub fn is_component_expression(&self) -> bool {
        self.attributes.keys().any(|k| k.starts_with('C'))
    }
}

/// A named condition: a list of expressions.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    pub id: String,
    pub expressions: Vec<Expression>,
}

/// An external code generator declared by a pack.
#[derive(Debug, Clone, Default)]
pub struct Generator {
    pub id: String,
    pub description: String,
    pub command: String,
    pub working_dir: String,
    pub gpdsc: String,
    pub arguments: Vec<String>,
}

/// A taxonomy entry describing a component class/group.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    pub class: String,
    pub group: String,
    pub description: String,
    pub doc: String,
}
