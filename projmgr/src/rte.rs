//! RTE directory maintenance.
//!
//! Deploys component configuration files into the project's RTE
//! directory (with versioned base side-cars), and generates the derived
//! headers: `RTE_Components.h`, `Pre_Include_Global.h` and the memory
//! regions header used by automatic linker script generation.

use crate::context::{ConfigFileEntry, Context};
use crate::diagnostics::Diagnostics;
use anyhow::{Context as _, Result};
use log::{debug, info};
use rtemodel::{FileCategory, MemoryItem, RteModel};
use std::path::{Path, PathBuf};

/// The per-context subdirectory of the RTE tree holding generated
/// headers.
pub fn context_header_dir(context: &Context) -> PathBuf {
    let suffix = if context.type_pair.build.is_empty() {
        format!("_{}", context.type_pair.target)
    } else {
        format!("_{}_{}", context.type_pair.build, context.type_pair.target)
    };
    context.directories.rte.join(suffix)
}

/// Deploy missing configuration files and record every instance in the
/// context.
///
/// A freshly deployed file gets a `.base@<version>` side-car so later
/// updates can detect the origin version.
pub fn update_config_files(
    context: &mut Context,
    model: &RteModel,
    dry_run: bool,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut deployed: Vec<(String, ConfigFileEntry)> = Vec::new();
    for entry in context.components.values() {
        let component = &entry.selected.component;
        let Some(pack) = model.packs().get(entry.selected.pack_index) else {
            continue;
        };
        for file in component.files.iter().filter(|f| f.is_config()) {
            let class_dir = component.class.clone();
            let file_name = Path::new(&file.name)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.name.clone());
            let destination = context
                .directories
                .rte
                .join(&class_dir)
                .join(&file_name);
            let source = pack.path.join(&file.name);

            if !destination.is_file() && !dry_run {
                if source.is_file() {
                    std::fs::create_dir_all(destination.parent().unwrap_or(Path::new(".")))
                        .context("Unable to create RTE directory")?;
                    std::fs::copy(&source, &destination).context(format!(
                        "Unable to deploy config file '{}'",
                        destination.display()
                    ))?;
                    if !file.version.is_empty() {
                        let sidecar = destination.with_file_name(format!(
                            "{file_name}.base@{}",
                            file.version
                        ));
                        std::fs::copy(&source, &sidecar).ok();
                    }
                    info!(
                        "[{}] Deployed config file '{}'",
                        context.name,
                        destination.display()
                    );
                } else {
                    diagnostics.warning(
                        &context.name,
                        format!(
                            "Config file source '{}' does not exist in pack '{}'",
                            file.name, pack.id
                        ),
                    );
                }
            }

            deployed.push((
                component.full_id(),
                ConfigFileEntry {
                    path: destination,
                    source,
                    version: file.version.clone(),
                },
            ));
        }
    }
    for (component_id, entry) in deployed {
        context
            .config_files
            .entry(component_id)
            .or_default()
            .push(entry);
    }
    Ok(())
}

/// Compose `RTE_Components.h` from the selected components' contributed
/// lines and the device header.
pub fn rte_components_header(context: &Context, device_header: Option<&str>) -> String {
    let mut out = String::new();
    out.push_str("/*\n * Auto generated Run-Time-Environment Configuration File\n */\n\n");
    out.push_str("#ifndef RTE_COMPONENTS_H\n#define RTE_COMPONENTS_H\n\n");
    if let Some(header) = device_header {
        let name = Path::new(header)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| header.to_string());
        out.push_str("/*\n * Define the Device Header File:\n */\n");
        out.push_str(&format!("#define CMSIS_device_header \"{name}\"\n\n"));
    }
    for entry in context.components.values() {
        if let Some(snippet) = &entry.selected.component.rte_components_h {
            out.push_str(&format!(
                "/* {} */\n{}\n",
                entry.selected.component.full_id(),
                snippet
            ));
        }
    }
    out.push_str("\n#endif /* RTE_COMPONENTS_H */\n");
    out
}

/// Compose `Pre_Include_Global.h` by including every global pre-include
/// file contributed by the selection.
pub fn pre_include_global_header(context: &Context, model: &RteModel) -> Option<String> {
    let mut includes = Vec::new();
    for entry in context.components.values() {
        let Some(pack) = model.packs().get(entry.selected.pack_index) else {
            continue;
        };
        for file in &entry.selected.component.files {
            if file.category == FileCategory::PreIncludeGlobal {
                includes.push(pack.path.join(&file.name));
            }
        }
    }
    if includes.is_empty() {
        return None;
    }
    let mut out = String::new();
    out.push_str("/*\n * Auto generated global pre-include file\n */\n\n");
    for include in includes {
        out.push_str(&format!(
            "#include \"{}\"\n",
            crate::common::path_to_portable(&include)
        ));
    }
    Some(out)
}

/// Compose the memory regions header from device and board memories.
pub fn regions_header(device_name: &str, memories: &[MemoryItem]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "/*\n * Auto generated memory regions for device '{device_name}'\n */\n\n"
    ));
    let guard = format!(
        "REGIONS_{}_H",
        device_name.replace(|c: char| !c.is_ascii_alphanumeric(), "_").to_uppercase()
    );
    out.push_str(&format!("#ifndef {guard}\n#define {guard}\n\n"));
    let mut rom_index = 0;
    let mut ram_index = 0;
    for memory in memories {
        let is_rom = memory.access.contains('x')
            || memory.name.to_uppercase().contains("ROM")
            || memory.name.to_uppercase().contains("FLASH");
        let index = if is_rom {
            rom_index += 1;
            rom_index - 1
        } else {
            ram_index += 1;
            ram_index - 1
        };
        let prefix = if is_rom { "ROM" } else { "RAM" };
        out.push_str(&format!(
            "/* {} */\n#define __{prefix}{index}_BASE {}\n#define __{prefix}{index}_SIZE {}\n",
            memory.name,
            if memory.start.is_empty() { "0x0" } else { &memory.start },
            if memory.size.is_empty() { "0x0" } else { &memory.size },
        ));
    }
    out.push_str(&format!("\n#endif /* {guard} */\n"));
    out
}

/// Write the generated headers below the context's RTE directory and
/// record them as constructed files.
pub fn update_rte_headers(
    context: &mut Context,
    model: &RteModel,
    dry_run: bool,
) -> Result<Vec<PathBuf>> {
    let header_dir = context_header_dir(context);
    let mut constructed = Vec::new();

    let device_header = context
        .device_pack
        .as_deref()
        .and_then(|id| model.find_pack_by_id(id))
        .and_then(|pack| {
            pack.devices
                .iter()
                .find(|d| d.name == context.device_item.name)
                .and_then(|d| d.header.clone())
        });
    let components_h = header_dir.join("RTE_Components.h");
    if !dry_run {
        crate::common::write_file(
            &components_h,
            &rte_components_header(context, device_header.as_deref()),
        )?;
        debug!("[{}] Wrote '{}'", context.name, components_h.display());
    }
    constructed.push(components_h);

    if let Some(content) = pre_include_global_header(context, model) {
        let pre_include = header_dir.join("Pre_Include_Global.h");
        if !dry_run {
            crate::common::write_file(&pre_include, &content)?;
        }
        constructed.push(pre_include);
    }

    Ok(constructed)
}

#[cfg(test)]
mod test {
    use super::*;
    use rtemodel::MemoryItem;

    #[test]
    fn header_dir_reflects_context_types() {
        let mut context = Context::new("App", "Debug", "A");
        context.directories.rte = PathBuf::from("/prj/RTE");
        assert_eq!(
            context_header_dir(&context),
            PathBuf::from("/prj/RTE/_Debug_A")
        );

        let mut context = Context::new("App", "", "A");
        context.directories.rte = PathBuf::from("/prj/RTE");
        assert_eq!(context_header_dir(&context), PathBuf::from("/prj/RTE/_A"));
    }

    #[test]
    fn components_header_contains_device_and_snippets() {
        let mut context = Context::new("App", "Debug", "A");
        let mut component = rtemodel::Component {
            vendor: "ARM".to_string(),
            class: "RteTest".to_string(),
            group: "CORE".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        component.rte_components_h = Some("#define RTE_TEST_CORE".to_string());
        context.components.insert(
            component.aggregate_id(),
            crate::context::SelectedEntry {
                selected: rtemodel::SelectedComponent {
                    pack_id: rtemodel::PackId::default(),
                    pack_index: 0,
                    component,
                    selected_by: "RteTest:CORE".to_string(),
                    instances: 1,
                },
                generator: String::new(),
                layer: String::new(),
            },
        );
        let header = rte_components_header(&context, Some("Device/Include/ARMCM3.h"));
        assert!(header.contains("#define CMSIS_device_header \"ARMCM3.h\""));
        assert!(header.contains("#define RTE_TEST_CORE"));
        assert!(header.contains("#ifndef RTE_COMPONENTS_H"));
    }

    #[test]
    fn regions_header_separates_rom_and_ram() {
        let memories = vec![
            MemoryItem {
                name: "IROM1".to_string(),
                access: "rx".to_string(),
                start: "0x00000000".to_string(),
                size: "0x40000".to_string(),
                ..Default::default()
            },
            MemoryItem {
                name: "IRAM1".to_string(),
                access: "rw".to_string(),
                start: "0x20000000".to_string(),
                size: "0x20000".to_string(),
                ..Default::default()
            },
        ];
        let header = regions_header("ARMCM3", &memories);
        assert!(header.contains("#define __ROM0_BASE 0x00000000"));
        assert!(header.contains("#define __RAM0_BASE 0x20000000"));
        assert!(header.contains("REGIONS_ARMCM3_H"));
    }
}
