//! The run/debug payload (`<solution>+<target>.cbuild-run.yml`).

use super::{generated_by, put, put_map, put_nonempty, put_values, render, write_if_changed};
use crate::common::portable_relative_to;
use crate::context::Context;
use crate::parser::{DebugAdapterNode, TargetSetNode};
use anyhow::Result;
use rtemodel::RteModel;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Emit the run/debug payload of one target type for the active target
/// set.
///
/// The payload aggregates over every context of the target type:
/// programming algorithms and memories come from the resolved device and
/// board, outputs from the target-set images (or the contexts' own
/// artefacts when the set lists none), the debugger configuration from
/// the target set refined by debug adapter defaults.
pub fn emit_cbuild_run(
    output_dir: &Path,
    solution_name: &str,
    solution_path: &Path,
    target_type: &str,
    target_set: &TargetSetNode,
    contexts: &[&Context],
    model: &RteModel,
    adapters: &[DebugAdapterNode],
) -> Result<PathBuf> {
    let path = output_dir.join(format!("{solution_name}+{target_type}.cbuild-run.yml"));
    let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut node = Mapping::new();
    put(&mut node, "generated-by", generated_by());
    put(
        &mut node,
        "solution",
        portable_relative_to(solution_path, &base),
    );
    put(&mut node, "target-type", format!("+{target_type}"));
    put_nonempty(&mut node, "target-set", &target_set.set);

    let primary = contexts.first();
    if let Some(context) = primary {
        put_nonempty(&mut node, "compiler", &context.compiler);
        put_nonempty(&mut node, "board", &context.board);
        if let Some(board_pack) = &context.board_pack {
            put_nonempty(&mut node, "board-pack", board_pack);
        }
        put_nonempty(&mut node, "device", &context.device);
        if let Some(device_pack) = &context.device_pack {
            put_nonempty(&mut node, "device-pack", device_pack);
        }
    }

    // Programming algorithms and the memory map from device and board.
    let mut algorithms = Vec::new();
    let mut memories = Vec::new();
    if let Some(context) = primary {
        if let Some(device_pack_id) = &context.device_pack {
            if let Some(pack) = model.find_pack_by_id(device_pack_id) {
                if let Some(device) = pack
                    .devices
                    .iter()
                    .find(|d| d.name == context.device_item.name)
                {
                    for algorithm in &device.algorithms {
                        let mut entry = Mapping::new();
                        put(
                            &mut entry,
                            "algorithm",
                            portable_relative_to(&pack.path.join(algorithm), &base),
                        );
                        algorithms.push(Value::from(entry));
                    }
                    for memory in &device.memories {
                        let mut entry = Mapping::new();
                        put(&mut entry, "name", memory.name.as_str());
                        put_nonempty(&mut entry, "access", &memory.access);
                        put_nonempty(&mut entry, "start", &memory.start);
                        put_nonempty(&mut entry, "size", &memory.size);
                        put_nonempty(&mut entry, "pname", &memory.pname);
                        memories.push(Value::from(entry));
                    }
                }
            }
        }
        if let Some(board_pack_id) = &context.board_pack {
            if let Some(pack) = model.find_pack_by_id(board_pack_id) {
                if let Some(board) = pack
                    .boards
                    .iter()
                    .find(|b| b.name == context.board_item.name)
                {
                    for memory in &board.memories {
                        let mut entry = Mapping::new();
                        put(&mut entry, "name", memory.name.as_str());
                        put_nonempty(&mut entry, "access", &memory.access);
                        put_nonempty(&mut entry, "start", &memory.start);
                        put_nonempty(&mut entry, "size", &memory.size);
                        memories.push(Value::from(entry));
                    }
                }
            }
        }
    }
    put_values(&mut node, "programming", algorithms);
    if !memories.is_empty() {
        let mut resources = Mapping::new();
        put_values(&mut resources, "memory", memories);
        put_map(&mut node, "system-resources", resources);
    }

    // Outputs: explicit target-set images, else every context artefact.
    let mut outputs = Vec::new();
    if target_set.images.is_empty() {
        for context in contexts {
            for (output_type, filename) in &context.outputs {
                let mut entry = Mapping::new();
                put(
                    &mut entry,
                    "file",
                    portable_relative_to(&context.directories.outdir.join(filename), &base),
                );
                put(&mut entry, "info", format!("generate by {}", context.name));
                put(&mut entry, "type", output_type.as_str());
                outputs.push(Value::from(entry));
            }
        }
    } else {
        for image in &target_set.images {
            let mut entry = Mapping::new();
            if let Some(file) = &image.image {
                put(&mut entry, "file", file.as_str());
            }
            if let Some(context_name) = &image.context {
                put(&mut entry, "info", format!("generate by {context_name}"));
            }
            if let Some(image_type) = &image.image_type {
                put(&mut entry, "type", image_type.as_str());
            }
            put_nonempty(&mut entry, "load", image.load.as_deref().unwrap_or(""));
            outputs.push(Value::from(entry));
        }
    }
    put_values(&mut node, "output", outputs);

    // Debugger configuration refined by adapter defaults.
    if let Some(debugger) = &target_set.debugger {
        let mut entry = Mapping::new();
        let name = debugger.name.clone().unwrap_or_default();
        put_nonempty(&mut entry, "name", &name);
        let adapter = adapters
            .iter()
            .find(|a| a.name == name || a.alias.iter().any(|alias| *alias == name));
        let protocol = debugger
            .protocol
            .clone()
            .or_else(|| adapter.and_then(|a| a.defaults.as_ref()?.protocol.clone()));
        put_nonempty(&mut entry, "protocol", protocol.as_deref().unwrap_or(""));
        let clock = debugger
            .clock
            .clone()
            .or_else(|| adapter.and_then(|a| a.defaults.as_ref()?.clock.clone()));
        if let Some(clock) = clock {
            put(&mut entry, "clock", clock);
        }
        put_nonempty(&mut entry, "dbgconf", debugger.dbgconf.as_deref().unwrap_or(""));
        put_nonempty(
            &mut entry,
            "start-pname",
            debugger.start_pname.as_deref().unwrap_or(""),
        );
        put_map(&mut node, "debugger", entry);
    }

    let mut root = Mapping::new();
    put(&mut root, "cbuild-run", Value::from(node));
    let content = render(&Value::from(root))?;
    write_if_changed(&path, &content)?;
    Ok(path)
}
