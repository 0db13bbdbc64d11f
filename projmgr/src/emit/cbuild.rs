//! The per-context build plan (`<context>.cbuild.yml`), also reused for
//! generator payloads (`<context>.cbuild-gen.yml`).

use super::{generated_by, put, put_map, put_nonempty, put_seq, put_values, render, write_if_changed};
use crate::common::portable_relative_to;
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::parser::{normalized_defines, GroupNode};
use anyhow::Result;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Emit the build plan for one context. Returns the artefact path.
///
/// A `generator_id` switches the artefact to the generator payload
/// (`build-gen:` root, `current-generator:` node, `.cbuild-gen.yml`
/// suffix).
pub fn emit_cbuild(
    context: &mut Context,
    solution_path: &Path,
    generator_id: Option<&str>,
    diagnostics: &Diagnostics,
) -> Result<PathBuf> {
    let suffix = if generator_id.is_some() {
        "cbuild-gen.yml"
    } else {
        "cbuild.yml"
    };
    let path = context
        .directories
        .cprj
        .join(format!("{}.{suffix}", context.name));
    let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut node = Mapping::new();
    put(&mut node, "generated-by", generated_by());
    if let Some(generator_id) = generator_id {
        let mut generator = Mapping::new();
        put(&mut generator, "id", generator_id);
        if let Some(entry) = context.generators.get(generator_id) {
            put_nonempty(&mut generator, "from-pack", &entry.from_pack);
        }
        put_map(&mut node, "current-generator", generator);
    }
    put(
        &mut node,
        "solution",
        portable_relative_to(solution_path, &base),
    );
    put(
        &mut node,
        "project",
        portable_relative_to(&context.cproject.path, &base),
    );
    put(&mut node, "context", context.name.clone());
    put_nonempty(&mut node, "compiler", &context.compiler);
    put_nonempty(&mut node, "board", &context.board);
    if let Some(board_pack) = &context.board_pack {
        put_nonempty(&mut node, "board-pack", board_pack);
    }
    put_nonempty(&mut node, "device", &context.device);
    if let Some(device_pack) = &context.device_pack {
        put_nonempty(&mut node, "device-pack", device_pack);
    }
    put_map(&mut node, "processor", processor_node(context));
    put_values(&mut node, "packs", packs_node(context, &base));

    let controls = &context.controls.processed;
    put_nonempty(&mut node, "optimize", &controls.optimize);
    put_nonempty(&mut node, "debug", &controls.debug);
    put_nonempty(&mut node, "warnings", &controls.warnings);
    put_nonempty(&mut node, "language-C", &controls.language_c);
    put_nonempty(&mut node, "language-CPP", &controls.language_cpp);
    if controls.link_time_optimize {
        put(&mut node, "link-time-optimize", true);
    }
    put_map(&mut node, "misc", misc_node(context));
    put_seq(&mut node, "define", &controls.defines);
    put_seq(&mut node, "define-asm", &controls.defines_asm);
    put_seq(&mut node, "add-path", &controls.add_paths);
    put_seq(&mut node, "add-path-asm", &controls.add_paths_asm);

    let mut output_dirs = Mapping::new();
    put(
        &mut output_dirs,
        "intdir",
        portable_relative_to(&context.directories.intdir, &base),
    );
    put(
        &mut output_dirs,
        "outdir",
        portable_relative_to(&context.directories.outdir, &base),
    );
    put(
        &mut output_dirs,
        "rtedir",
        portable_relative_to(&context.directories.rte, &base),
    );
    put_map(&mut node, "output-dirs", output_dirs);
    put_values(&mut node, "output", output_node(context));

    put_values(&mut node, "components", components_node(context, &base));
    put_values(&mut node, "apis", apis_node(context, &base));
    put_values(&mut node, "generators", generators_node(context, &base));
    put_map(&mut node, "linker", linker_node(context));
    put_values(&mut node, "groups", groups_node(&context.groups));
    put_values(&mut node, "constructed-files", constructed_node(context, &base));
    put_map(&mut node, "messages", messages_node(context, diagnostics));

    let mut root = Mapping::new();
    let root_key = if generator_id.is_some() {
        "build-gen"
    } else {
        "build"
    };
    put(&mut root, root_key, Value::from(node));
    let content = render(&Value::from(root))?;

    // The rebuild flag reflects a semantically meaningful change versus
    // the on-disk plan: the compiler selection.
    if generator_id.is_none() {
        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(value) = serde_yaml::from_str::<Value>(&existing) {
                let previous = value
                    .get("build")
                    .and_then(|b| b.get("compiler"))
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                if !previous.is_empty() && previous != context.compiler {
                    context.need_rebuild = true;
                }
            }
        }
    }

    write_if_changed(&path, &content)?;
    Ok(path)
}

fn processor_node(context: &Context) -> Mapping {
    let mut processor = Mapping::new();
    let attributes = &context.target_attributes;
    for (key, yaml_key) in [
        ("Dcore", "core"),
        ("Dfpu", "fpu"),
        ("Ddsp", "dsp"),
        ("Dmve", "mve"),
        ("Dendian", "endian"),
        ("Dsecure", "trustzone"),
        ("Dbranchprot", "branch-protection"),
    ] {
        if let Some(value) = attributes.get(key) {
            put(&mut processor, yaml_key, value);
        }
    }
    processor
}

fn packs_node(context: &Context, base: &Path) -> Vec<Value> {
    let mut packs = Vec::new();
    for id in &context.resolved_pack_ids {
        let mut entry = Mapping::new();
        put(&mut entry, "pack", id.as_str());
        if let Some(path) = context.pack_paths.get(id) {
            put(&mut entry, "path", portable_relative_to(path, base));
        }
        packs.push(Value::from(entry));
    }
    packs
}

fn misc_node(context: &Context) -> Mapping {
    let misc = &context.controls.processed.misc;
    let mut node = Mapping::new();
    put_seq(&mut node, "ASM", &misc.asm);
    put_seq(&mut node, "C", &misc.c);
    put_seq(&mut node, "CPP", &misc.cpp);
    put_seq(&mut node, "C-CPP", &misc.c_cpp);
    put_seq(&mut node, "Link", &misc.link);
    put_seq(&mut node, "Link-C", &misc.link_c);
    put_seq(&mut node, "Link-CPP", &misc.link_cpp);
    put_seq(&mut node, "Library", &misc.library);
    node
}

fn output_node(context: &Context) -> Vec<Value> {
    let mut outputs = Vec::new();
    for (output_type, filename) in &context.outputs {
        let mut entry = Mapping::new();
        put(&mut entry, "type", output_type.as_str());
        put(&mut entry, "file", filename.as_str());
        outputs.push(Value::from(entry));
    }
    outputs
}

fn components_node(context: &Context, base: &Path) -> Vec<Value> {
    let mut components = Vec::new();
    for entry in context.components.values() {
        let component = &entry.selected.component;
        let id = component.full_id();
        let mut node = Mapping::new();
        put(&mut node, "component", id.as_str());
        put_nonempty(&mut node, "condition", component.condition.as_deref().unwrap_or(""));
        put(&mut node, "from-pack", entry.selected.pack_id.to_string());
        put(&mut node, "selected-by", entry.selected.selected_by.as_str());
        if entry.selected.instances > 1 {
            put(&mut node, "instances", entry.selected.instances as u64);
        }
        if !entry.generator.is_empty() {
            put(&mut node, "generator", entry.generator.as_str());
        }
        put_nonempty(&mut node, "layer", &entry.layer);

        let mut files = Vec::new();
        if let Some(config_files) = context.config_files.get(&id) {
            for config in config_files {
                let mut file = Mapping::new();
                put(&mut file, "file", portable_relative_to(&config.path, base));
                put(&mut file, "category", "configFile");
                put(&mut file, "attr", "config");
                put_nonempty(&mut file, "version", &config.version);
                let key = config.path.to_string_lossy().to_string();
                if let Some(status) = context.plm_status.get(&key) {
                    put(&mut file, "status", status.as_str());
                }
                files.push(Value::from(file));
            }
        }
        if let Some(component_files) = context.component_files.get(&id) {
            for item in component_files {
                let mut file = Mapping::new();
                put(&mut file, "file", item.name.as_str());
                put_nonempty(&mut file, "category", &item.category);
                put_nonempty(&mut file, "attr", &item.attr);
                put_nonempty(&mut file, "language", &item.language);
                put_nonempty(&mut file, "scope", &item.scope);
                put_nonempty(&mut file, "version", &item.version);
                put_nonempty(&mut file, "select", &item.select);
                files.push(Value::from(file));
            }
        }
        put_values(&mut node, "files", files);
        components.push(Value::from(node));
    }
    components
}

fn apis_node(context: &Context, _base: &Path) -> Vec<Value> {
    let mut apis = Vec::new();
    for api in &context.apis {
        let mut node = Mapping::new();
        put(&mut node, "api", api.id.as_str());
        put(&mut node, "from-pack", api.from_pack.as_str());
        put_seq(&mut node, "implemented-by", &api.implemented_by);
        let mut files = Vec::new();
        for item in &api.files {
            let mut file = Mapping::new();
            put(&mut file, "file", item.name.as_str());
            put_nonempty(&mut file, "category", &item.category);
            put_nonempty(&mut file, "version", &item.version);
            files.push(Value::from(file));
        }
        put_values(&mut node, "files", files);
        apis.push(Value::from(node));
    }
    apis
}

fn generators_node(context: &Context, base: &Path) -> Vec<Value> {
    let mut generators = Vec::new();
    for entry in context.generators.values() {
        let mut node = Mapping::new();
        put(&mut node, "generator", entry.id.as_str());
        put(&mut node, "from-pack", entry.from_pack.as_str());
        put_nonempty(&mut node, "command", &entry.command);
        put_seq(&mut node, "arguments", &entry.arguments);
        put(
            &mut node,
            "working-dir",
            portable_relative_to(&entry.working_dir, base),
        );
        put(&mut node, "gpdsc", portable_relative_to(&entry.gpdsc, base));
        put_seq(&mut node, "for-components", &entry.components);
        generators.push(Value::from(node));
    }
    generators
}

fn linker_node(context: &Context) -> Mapping {
    let mut node = Mapping::new();
    put_nonempty(&mut node, "script", &context.linker.script);
    put_nonempty(&mut node, "regions", &context.linker.regions);
    put_seq(&mut node, "define", &context.linker.defines);
    node
}

fn groups_node(groups: &[GroupNode]) -> Vec<Value> {
    let mut out = Vec::new();
    for group in groups {
        let mut node = Mapping::new();
        put(&mut node, "group", group.group.as_str());
        let defines = normalized_defines(&group.build.define);
        put_seq(&mut node, "define", &defines);
        put_seq(&mut node, "add-path", &group.build.add_path);
        let mut files = Vec::new();
        for file in &group.files {
            let mut entry = Mapping::new();
            put(&mut entry, "file", file.file.as_str());
            put_nonempty(&mut entry, "category", file.category.as_deref().unwrap_or(""));
            if !file.for_compiler.is_empty() {
                put_seq(&mut entry, "for-compiler", &file.for_compiler);
            }
            let file_defines = normalized_defines(&file.build.define);
            put_seq(&mut entry, "define", &file_defines);
            files.push(Value::from(entry));
        }
        put_values(&mut node, "files", files);
        put_values(&mut node, "groups", groups_node(&group.groups));
        out.push(Value::from(node));
    }
    out
}

fn constructed_node(context: &Context, base: &Path) -> Vec<Value> {
    let mut out = Vec::new();
    for path in &context.constructed_files {
        let mut entry = Mapping::new();
        put(&mut entry, "file", portable_relative_to(path, base));
        put(&mut entry, "category", "header");
        out.push(Value::from(entry));
    }
    out
}

fn messages_node(context: &Context, diagnostics: &Diagnostics) -> Mapping {
    let mut node = Mapping::new();
    if let Some(streams) = diagnostics.context_messages(&context.name) {
        put_seq(&mut node, "errors", &streams.errors);
        put_seq(&mut node, "warnings", &streams.warnings);
        put_seq(&mut node, "info", &streams.infos);
    }
    node
}
