//! Reader for pack description files and pack indexes.
//!
//! Only the subset of the description format that the resolver consumes is
//! read: releases (for the pack version), devices, boards, components, APIs,
//! conditions, generators, taxonomy, layers and pack requirements.

use crate::error;
use crate::pack::{
    Api, Board, Component, Condition, Device, DeviceIdentifier, Expression, ExpressionKind,
    FileCategory, FileItem, Generator, MemoryItem, Pack, PackLayer, PackRequirement, Processor,
    Taxonomy,
};
use crate::version::parse_lenient;
use roxmltree::{Document, Node};
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::path::Path;

type Result<T> = crate::Result<T>;

/// Read and parse one pack description file.
pub fn read_pdsc(path: &Path) -> Result<Pack> {
    let data = std::fs::read_to_string(path).context(error::PdscReadSnafu { path })?;
    parse_pdsc(&data, path)
}

/// An entry of a pack index file.
#[derive(Debug, Clone)]
pub struct PidxEntry {
    pub vendor: String,
    pub name: String,
    pub version: String,
    pub url: String,
}

/// Read a pack index (`*.pidx`) listing description files by location.
pub fn read_pidx(path: &Path) -> Result<Vec<PidxEntry>> {
    let data = std::fs::read_to_string(path).context(error::PdscReadSnafu { path })?;
    let doc = Document::parse(&data).map_err(|e| {
        crate::Error::from(
            error::PidxParseSnafu {
                path,
                reason: e.to_string(),
            }
            .build(),
        )
    })?;
    let mut entries = Vec::new();
    for node in doc.descendants().filter(|n| n.has_tag_name("pdsc")) {
        entries.push(PidxEntry {
            vendor: attr(&node, "vendor"),
            name: attr(&node, "name"),
            version: attr(&node, "version"),
            url: attr(&node, "url"),
        });
    }
    Ok(entries)
}

fn parse_error(path: &Path, reason: impl Into<String>) -> crate::Error {
    error::PdscParseSnafu {
        path,
        reason: reason.into(),
    }
    .build()
    .into()
}

fn parse_pdsc(data: &str, path: &Path) -> Result<Pack> {
    let doc = Document::parse(data).map_err(|e| parse_error(path, e.to_string()))?;
    let root = doc.root_element();
    if !root.has_tag_name("package") {
        return Err(parse_error(path, "root element is not <package>"));
    }

    let mut pack = Pack {
        pdsc_path: path.to_path_buf(),
        path: path.parent().unwrap_or(Path::new("")).to_path_buf(),
        ..Default::default()
    };

    for child in root.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "vendor" => pack.id.vendor = text(&child),
            "name" => pack.id.name = text(&child),
            "description" => pack.description = text(&child).trim().to_string(),
            "license" => pack.license = Some(text(&child).trim().to_string()),
            "releases" => {
                // The first release entry is the pack's own version.
                if let Some(release) = child.children().find(|n| n.has_tag_name("release")) {
                    let version = attr(&release, "version");
                    pack.id.version = parse_lenient(&version)
                        .map_err(|e| parse_error(path, e.to_string()))?;
                }
            }
            "requirements" => {
                for req in child.descendants().filter(|n| n.has_tag_name("package")) {
                    pack.requirements.push(PackRequirement {
                        vendor: attr(&req, "vendor"),
                        name: attr(&req, "name"),
                        version_range: attr(&req, "version"),
                    });
                }
            }
            "conditions" => parse_conditions(&child, &mut pack.conditions),
            "devices" => parse_devices(&child, &mut pack),
            "boards" => parse_boards(&child, &mut pack),
            "components" => parse_components(&child, &mut pack),
            "apis" => parse_apis(&child, &mut pack),
            "generators" => parse_generators(&child, &mut pack),
            "taxonomy" => parse_taxonomy(&child, &mut pack),
            "csolution" => parse_clayers(&child, &mut pack),
            _ => {}
        }
    }

    if pack.id.vendor.is_empty() || pack.id.name.is_empty() {
        return Err(parse_error(path, "missing <vendor> or <name>"));
    }
    Ok(pack)
}

fn attr(node: &Node, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

fn text(node: &Node) -> String {
    node.text().unwrap_or_default().to_string()
}

fn attr_map(node: &Node) -> BTreeMap<String, String> {
    node.attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect()
}

fn parse_conditions(node: &Node, conditions: &mut BTreeMap<String, Condition>) {
    for cond in node.children().filter(|n| n.has_tag_name("condition")) {
        let id = attr(&cond, "id");
        let mut expressions = Vec::new();
        for expr in cond.children().filter(Node::is_element) {
            let kind = match expr.tag_name().name() {
                "require" => ExpressionKind::Require,
                "accept" => ExpressionKind::Accept,
                "deny" => ExpressionKind::Deny,
                _ => continue,
            };
            expressions.push(Expression {
                kind,
                attributes: attr_map(&expr),
            });
        }
        conditions.insert(id.clone(), Condition { id, expressions });
    }
}

fn parse_processor(node: &Node) -> Processor {
    Processor {
        pname: attr(node, "Pname"),
        core: attr(node, "Dcore"),
        fpu: attr(node, "Dfpu"),
        dsp: attr(node, "Ddsp"),
        mve: attr(node, "Dmve"),
        endian: attr(node, "Dendian"),
        trustzone: attr(node, "Dtz"),
        pacbti: attr(node, "Dpacbti"),
        clock: attr(node, "Dclock"),
    }
}

fn parse_memory(node: &Node) -> MemoryItem {
    MemoryItem {
        name: {
            let name = attr(node, "name");
            if name.is_empty() {
                attr(node, "id")
            } else {
                name
            }
        },
        access: attr(node, "access"),
        start: attr(node, "start"),
        size: attr(node, "size"),
        default: attr(node, "default") == "1",
        startup: attr(node, "startup") == "1",
        pname: attr(node, "Pname"),
        algorithm: String::new(),
    }
}

/// Per-level device properties that children inherit and may override.
#[derive(Debug, Clone, Default)]
struct DeviceScope {
    vendor: String,
    family: String,
    processors: Vec<Processor>,
    memories: Vec<MemoryItem>,
    algorithms: Vec<String>,
    header: Option<String>,
    define: Option<String>,
    description: String,
}

impl DeviceScope {
    fn absorb(&mut self, node: &Node) {
        for child in node.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "processor" => {
                    let processor = parse_processor(&child);
                    // A processor element at a deeper level refines the
                    // entry with the same Pname instead of adding one.
                    if let Some(existing) = self
                        .processors
                        .iter_mut()
                        .find(|p| p.pname == processor.pname)
                    {
                        merge_processor(existing, &processor);
                    } else {
                        self.processors.push(processor);
                    }
                }
                "memory" => self.memories.push(parse_memory(&child)),
                "algorithm" => self.algorithms.push(attr(&child, "name")),
                "compile" => {
                    let header = attr(&child, "header");
                    if !header.is_empty() {
                        self.header = Some(header);
                    }
                    let define = attr(&child, "define");
                    if !define.is_empty() {
                        self.define = Some(define);
                    }
                }
                "description" => self.description = text(&child).trim().to_string(),
                _ => {}
            }
        }
    }
}

fn merge_processor(dst: &mut Processor, src: &Processor) {
    let fields = [
        (&mut dst.core, &src.core),
        (&mut dst.fpu, &src.fpu),
        (&mut dst.dsp, &src.dsp),
        (&mut dst.mve, &src.mve),
        (&mut dst.endian, &src.endian),
        (&mut dst.trustzone, &src.trustzone),
        (&mut dst.pacbti, &src.pacbti),
        (&mut dst.clock, &src.clock),
    ];
    for (dst, src) in fields {
        if !src.is_empty() {
            *dst = src.clone();
        }
    }
}

fn parse_devices(node: &Node, pack: &mut Pack) {
    for family in node.children().filter(|n| n.has_tag_name("family")) {
        let mut scope = DeviceScope {
            vendor: normalize_vendor(&attr(&family, "Dvendor")),
            family: attr(&family, "Dfamily"),
            ..Default::default()
        };
        scope.absorb(&family);
        for child in family.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "subFamily" => {
                    let mut sub_scope = scope.clone();
                    sub_scope.absorb(&child);
                    for device in child.children().filter(|n| n.has_tag_name("device")) {
                        parse_device(&device, &sub_scope, pack);
                    }
                }
                "device" => parse_device(&child, &scope, pack),
                _ => {}
            }
        }
    }
}

fn parse_device(node: &Node, scope: &DeviceScope, pack: &mut Pack) {
    let mut scope = scope.clone();
    scope.absorb(node);
    let name = attr(node, "Dname");
    let variants: Vec<String> = node
        .children()
        .filter(|n| n.has_tag_name("variant"))
        .map(|n| attr(&n, "Dvariant"))
        .collect();

    pack.devices.push(Device {
        vendor: scope.vendor.clone(),
        name: name.clone(),
        family: scope.family.clone(),
        variant_of: None,
        variants: variants.clone(),
        description: scope.description.clone(),
        processors: scope.processors.clone(),
        memories: scope.memories.clone(),
        algorithms: scope.algorithms.clone(),
        debug_config: None,
        header: scope.header.clone(),
        define: scope.define.clone(),
    });

    for variant in node.children().filter(|n| n.has_tag_name("variant")) {
        let mut variant_scope = scope.clone();
        variant_scope.absorb(&variant);
        pack.devices.push(Device {
            vendor: variant_scope.vendor.clone(),
            name: attr(&variant, "Dvariant"),
            family: variant_scope.family.clone(),
            variant_of: Some(name.clone()),
            variants: Vec::new(),
            description: variant_scope.description.clone(),
            processors: variant_scope.processors.clone(),
            memories: variant_scope.memories.clone(),
            algorithms: variant_scope.algorithms.clone(),
            debug_config: None,
            header: variant_scope.header.clone(),
            define: variant_scope.define.clone(),
        });
    }
}

/// Vendor attributes carry a numeric suffix (`ARM:82`); strip it.
fn normalize_vendor(vendor: &str) -> String {
    match vendor.split_once(':') {
        Some((name, _)) => name.to_string(),
        None => vendor.to_string(),
    }
}

fn parse_device_ref(node: &Node) -> DeviceIdentifier {
    DeviceIdentifier {
        vendor: normalize_vendor(&attr(node, "Dvendor")),
        name: attr(node, "Dname"),
        pname: attr(node, "Pname"),
    }
}

fn parse_boards(node: &Node, pack: &mut Pack) {
    for board in node.children().filter(|n| n.has_tag_name("board")) {
        let mut item = Board {
            vendor: attr(&board, "vendor"),
            name: attr(&board, "name"),
            revision: attr(&board, "revision"),
            ..Default::default()
        };
        for child in board.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "description" => item.description = text(&child).trim().to_string(),
                "mountedDevice" => item.mounted_devices.push(parse_device_ref(&child)),
                "compatibleDevice" => item.compatible_devices.push(parse_device_ref(&child)),
                "memory" => item.memories.push(parse_memory(&child)),
                "algorithm" => item.algorithms.push(attr(&child, "name")),
                _ => {}
            }
        }
        pack.boards.push(item);
    }
}

fn parse_file(node: &Node) -> FileItem {
    FileItem {
        name: attr(node, "name"),
        category: FileCategory::parse(&attr(node, "category")),
        attr: attr(node, "attr"),
        version: attr(node, "version"),
        condition: node.attribute("condition").map(str::to_string),
        select: attr(node, "select"),
        language: attr(node, "language"),
        scope: attr(node, "scope"),
    }
}

fn parse_component(node: &Node, vendor: &str, bundle: &str, bundle_version: &str) -> Component {
    let mut component = Component {
        vendor: {
            let v = attr(node, "Cvendor");
            if v.is_empty() {
                vendor.to_string()
            } else {
                v
            }
        },
        bundle: bundle.to_string(),
        class: attr(node, "Cclass"),
        group: attr(node, "Cgroup"),
        sub: attr(node, "Csub"),
        variant: attr(node, "Cvariant"),
        version: {
            let v = attr(node, "Cversion");
            if v.is_empty() {
                bundle_version.to_string()
            } else {
                v
            }
        },
        api_version: attr(node, "Capiversion"),
        condition: node.attribute("condition").map(str::to_string),
        max_instances: node
            .attribute("maxInstances")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1),
        generator: node.attribute("generator").map(str::to_string),
        default_variant: attr(node, "isDefaultVariant") == "1",
        ..Default::default()
    };
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "description" => component.description = text(&child).trim().to_string(),
            "files" => {
                for file in child.children().filter(|n| n.has_tag_name("file")) {
                    component.files.push(parse_file(&file));
                }
            }
            "RTE_Components_h" => {
                component.rte_components_h = Some(text(&child).trim().to_string());
            }
            _ => {}
        }
    }
    component
}

fn parse_components(node: &Node, pack: &mut Pack) {
    let pack_vendor = pack.id.vendor.clone();
    for child in node.children().filter(Node::is_element) {
        match child.tag_name().name() {
            "component" => {
                pack.components
                    .push(parse_component(&child, &pack_vendor, "", ""));
            }
            "bundle" => {
                let bundle = attr(&child, "Cbundle");
                let bundle_class = attr(&child, "Cclass");
                let bundle_version = attr(&child, "Cversion");
                for component in child.children().filter(|n| n.has_tag_name("component")) {
                    let mut item =
                        parse_component(&component, &pack_vendor, &bundle, &bundle_version);
                    if item.class.is_empty() {
                        item.class = bundle_class.clone();
                    }
                    pack.components.push(item);
                }
            }
            _ => {}
        }
    }
}

fn parse_apis(node: &Node, pack: &mut Pack) {
    for api in node.children().filter(|n| n.has_tag_name("api")) {
        let mut item = Api {
            class: attr(&api, "Cclass"),
            group: attr(&api, "Cgroup"),
            api_version: attr(&api, "Capiversion"),
            exclusive: attr(&api, "exclusive") != "0",
            condition: api.attribute("condition").map(str::to_string),
            ..Default::default()
        };
        for child in api.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "description" => item.description = text(&child).trim().to_string(),
                "files" => {
                    for file in child.children().filter(|n| n.has_tag_name("file")) {
                        item.files.push(parse_file(&file));
                    }
                }
                _ => {}
            }
        }
        pack.apis.push(item);
    }
}

fn parse_generators(node: &Node, pack: &mut Pack) {
    for gen in node.children().filter(|n| n.has_tag_name("generator")) {
        let mut item = Generator {
            id: attr(&gen, "id"),
            ..Default::default()
        };
        for child in gen.children().filter(Node::is_element) {
            match child.tag_name().name() {
                "description" => item.description = text(&child).trim().to_string(),
                "command" => item.command = text(&child).trim().to_string(),
                "workingDir" => item.working_dir = text(&child).trim().to_string(),
                "gpdsc" => item.gpdsc = attr(&child, "name"),
                "arguments" => {
                    for argument in child.children().filter(|n| n.has_tag_name("argument")) {
                        let switch = attr(&argument, "switch");
                        let value = text(&argument).trim().to_string();
                        item.arguments.push(if switch.is_empty() {
                            value
                        } else {
                            format!("{switch}{value}")
                        });
                    }
                }
                _ => {}
            }
        }
        pack.generators.insert(item.id.clone(), item);
    }
}

fn parse_taxonomy(node: &Node, pack: &mut Pack) {
    for desc in node.children().filter(|n| n.has_tag_name("description")) {
        pack.taxonomy.push(Taxonomy {
            class: attr(&desc, "Cclass"),
            group: attr(&desc, "Cgroup"),
            description: text(&desc).trim().to_string(),
            doc: attr(&desc, "doc"),
        });
    }
}

fn parse_clayers(node: &Node, pack: &mut Pack) {
    for clayer in node.children().filter(|n| n.has_tag_name("clayer")) {
        pack.clayers.push(PackLayer {
            layer_type: attr(&clayer, "type"),
            file: attr(&clayer, "file"),
            copy_to: attr(&clayer, "copy-to"),
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PDSC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package schemaVersion="1.7.7">
  <vendor>ARM</vendor>
  <name>RteTest_DFP</name>
  <description>Test device family pack</description>
  <releases>
    <release version="0.2.0" date="2023-01-01">Current</release>
    <release version="0.1.0" date="2022-01-01">Older</release>
  </releases>
  <requirements>
    <packages>
      <package vendor="ARM" name="CMSIS" version="5.9.0:6.0.0"/>
    </packages>
  </requirements>
  <conditions>
    <condition id="CM3 Cond">
      <require Dcore="Cortex-M3"/>
      <require Tcompiler="AC6 GCC" condition=""/>
    </condition>
    <condition id="Deny GCC">
      <deny Tcompiler="GCC"/>
    </condition>
  </conditions>
  <devices>
    <family Dfamily="RteTest ARM Cortex M" Dvendor="ARM:82">
      <processor Dcore="Cortex-M3" Dfpu="NO_FPU" Dendian="Little-endian"/>
      <compile header="Device/ARM/ARMCM3/Include/ARMCM3.h" define="ARMCM3"/>
      <device Dname="RteTest_ARMCM3">
        <memory name="IROM1" start="0x00000000" size="0x40000" default="1" startup="1"/>
        <memory name="IRAM1" start="0x20000000" size="0x20000" default="1"/>
      </device>
      <device Dname="RteTest_ARMCM4">
        <processor Dfpu="SP_FPU"/>
        <variant Dvariant="RteTest_ARMCM4_FP">
          <compile header="Device/ARM/ARMCM4/Include/ARMCM4_FP.h" define="ARMCM4_FP"/>
        </variant>
      </device>
    </family>
  </devices>
  <boards>
    <board vendor="Keil" name="RteTest board" revision="Rev1">
      <description>Test board</description>
      <mountedDevice Dvendor="ARM:82" Dname="RteTest_ARMCM3"/>
      <compatibleDevice Dvendor="ARM:82" Dname="RteTest_ARMCM4"/>
      <memory name="XRAM1" start="0x60000000" size="0x100000"/>
    </board>
  </boards>
  <apis>
    <api Cclass="RteTest" Cgroup="Check" Capiversion="1.0.0" exclusive="1">
      <description>Check API</description>
      <files>
        <file category="header" name="api/Check.h"/>
      </files>
    </api>
  </apis>
  <components>
    <component Cclass="RteTest" Cgroup="CORE" Cversion="0.1.1" condition="CM3 Cond">
      <description>Core component</description>
      <files>
        <file category="source" name="Source/core.c"/>
        <file category="header" name="Include/core.h" attr="config" version="1.0.0"/>
      </files>
      <RTE_Components_h>#define RTE_TEST_CORE</RTE_Components_h>
    </component>
    <bundle Cbundle="TestBundle" Cclass="RteTestBundle" Cversion="1.0.0">
      <component Cgroup="G_A">
        <description>Bundled component</description>
      </component>
    </bundle>
  </components>
  <generators>
    <generator id="RteTestGen">
      <description>Test generator</description>
      <command>gen/testgen</command>
      <workingDir>$PRTE_DIR$/Gen</workingDir>
      <gpdsc name="RteTestGen.gpdsc"/>
      <arguments>
        <argument switch="-p=">#P</argument>
      </arguments>
    </generator>
  </generators>
  <taxonomy>
    <description Cclass="RteTest" Cgroup="CORE">Test taxonomy</description>
  </taxonomy>
  <csolution>
    <clayer type="Board" file="Layers/board.clayer.yml" copy-to="Board"/>
  </csolution>
</package>
"#;

    fn parsed() -> Pack {
        parse_pdsc(PDSC, Path::new("/packs/ARM/RteTest_DFP/0.2.0/ARM.RteTest_DFP.pdsc")).unwrap()
    }

    #[test]
    fn pack_identity_comes_from_first_release() {
        let pack = parsed();
        assert_eq!(pack.id.to_string(), "ARM::RteTest_DFP@0.2.0");
        assert_eq!(pack.requirements.len(), 1);
        assert_eq!(pack.requirements[0].version_range, "5.9.0:6.0.0");
    }

    #[test]
    fn devices_flatten_with_inheritance() {
        let pack = parsed();
        let names: Vec<&str> = pack.devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["RteTest_ARMCM3", "RteTest_ARMCM4", "RteTest_ARMCM4_FP"]
        );

        let cm3 = &pack.devices[0];
        assert_eq!(cm3.vendor, "ARM");
        assert_eq!(cm3.processors[0].core, "Cortex-M3");
        assert_eq!(cm3.processors[0].fpu, "NO_FPU");
        assert_eq!(cm3.memories.len(), 2);
        assert_eq!(cm3.header.as_deref(), Some("Device/ARM/ARMCM3/Include/ARMCM3.h"));

        // The device-level processor refines the family-level entry.
        let cm4 = &pack.devices[1];
        assert_eq!(cm4.processors[0].fpu, "SP_FPU");
        assert_eq!(cm4.variants, vec!["RteTest_ARMCM4_FP"]);

        let fp = &pack.devices[2];
        assert_eq!(fp.variant_of.as_deref(), Some("RteTest_ARMCM4"));
        assert_eq!(fp.define.as_deref(), Some("ARMCM4_FP"));
    }

    #[test]
    fn boards_carry_device_references() {
        let pack = parsed();
        let board = &pack.boards[0];
        assert_eq!(board.full_name(), "Keil::RteTest board:Rev1");
        assert_eq!(board.mounted_devices[0].name, "RteTest_ARMCM3");
        assert_eq!(board.mounted_devices[0].vendor, "ARM");
        assert_eq!(board.compatible_devices[0].name, "RteTest_ARMCM4");
    }

    #[test]
    fn components_and_bundles() {
        let pack = parsed();
        assert_eq!(pack.components.len(), 2);
        let core = &pack.components[0];
        assert_eq!(core.full_id(), "ARM::RteTest:CORE@0.1.1");
        assert_eq!(core.condition.as_deref(), Some("CM3 Cond"));
        assert!(core.files[1].is_config());
        assert_eq!(core.rte_components_h.as_deref(), Some("#define RTE_TEST_CORE"));

        let bundled = &pack.components[1];
        assert_eq!(bundled.bundle, "TestBundle");
        assert_eq!(bundled.class, "RteTestBundle");
        assert_eq!(bundled.version, "1.0.0");
        assert_eq!(bundled.full_id(), "ARM::RteTestBundle&TestBundle:G_A@1.0.0");
    }

    #[test]
    fn conditions_generators_taxonomy_layers() {
        let pack = parsed();
        let cond = pack.condition("CM3 Cond").unwrap();
        assert_eq!(cond.expressions.len(), 2);
        assert_eq!(cond.expressions[0].kind, ExpressionKind::Require);
        assert!(cond.expressions[0].is_target_expression());

        let deny = pack.condition("Deny GCC").unwrap();
        assert_eq!(deny.expressions[0].kind, ExpressionKind::Deny);

        let gen = pack.generators.get("RteTestGen").unwrap();
        assert_eq!(gen.command, "gen/testgen");
        assert_eq!(gen.arguments, vec!["-p=#P"]);

        assert_eq!(pack.taxonomy[0].class, "RteTest");
        assert_eq!(pack.clayers[0].layer_type, "Board");

        let api = &pack.apis[0];
        assert_eq!(api.id(), "RteTest:Check@1.0.0");
        assert!(api.exclusive);
    }
}
