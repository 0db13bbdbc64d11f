//! The solution-level index (`<solution>.cbuild-idx.yml`).

use super::{generated_by, put, put_map, put_nonempty, put_seq, put_values, render, write_if_changed};
use crate::common::portable_relative_to;
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use crate::parser::{CsolutionItem, ExecuteNode};
use anyhow::Result;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Inputs for the index emission that are not part of a single context.
pub struct IdxInputs<'a> {
    pub csolution: &'a CsolutionItem,
    pub cdefault_path: Option<&'a Path>,
    pub output_dir: &'a Path,
    pub ordered_context_names: &'a [String],
    pub selectable_compilers: &'a [String],
    pub executes: &'a [ExecuteNode],
}

/// Emit the index over all processed contexts. Returns the artefact path.
pub fn emit_cbuild_idx(
    inputs: &IdxInputs<'_>,
    contexts: &std::collections::BTreeMap<String, Context>,
    cbuild_paths: &std::collections::BTreeMap<String, PathBuf>,
    diagnostics: &Diagnostics,
) -> Result<PathBuf> {
    let path = inputs
        .output_dir
        .join(format!("{}.cbuild-idx.yml", inputs.csolution.name));
    let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut node = Mapping::new();
    put(&mut node, "generated-by", generated_by());
    if let Some(cdefault) = inputs.cdefault_path {
        put(&mut node, "cdefault", portable_relative_to(cdefault, &base));
    }
    put(
        &mut node,
        "csolution",
        portable_relative_to(&inputs.csolution.path, &base),
    );
    if !inputs.selectable_compilers.is_empty() {
        let mut compilers = Vec::new();
        for compiler in inputs.selectable_compilers {
            let mut entry = Mapping::new();
            put(&mut entry, "compiler", compiler.as_str());
            compilers.push(Value::from(entry));
        }
        put_values(&mut node, "select-compiler", compilers);
    }

    // One cproject entry per distinct project, in source order.
    let mut seen_projects = BTreeSet::new();
    let mut cprojects = Vec::new();
    for name in inputs.ordered_context_names {
        let Some(context) = contexts.get(name) else {
            continue;
        };
        if !seen_projects.insert(context.project_name.clone()) {
            continue;
        }
        let mut entry = Mapping::new();
        put(
            &mut entry,
            "cproject",
            portable_relative_to(&context.cproject.path, &base),
        );
        cprojects.push(Value::from(entry));
    }
    put_values(&mut node, "cprojects", cprojects);

    let mut cbuilds = Vec::new();
    let mut any_rebuild = false;
    for name in inputs.ordered_context_names {
        let Some(context) = contexts.get(name) else {
            continue;
        };
        let mut entry = Mapping::new();
        if let Some(cbuild_path) = cbuild_paths.get(name) {
            put(&mut entry, "cbuild", portable_relative_to(cbuild_path, &base));
        }
        put(&mut entry, "project", context.project_name.as_str());
        put(
            &mut entry,
            "configuration",
            format!(
                "{}+{}",
                if context.type_pair.build.is_empty() {
                    String::new()
                } else {
                    format!(".{}", context.type_pair.build)
                },
                context.type_pair.target
            ),
        );
        let clayers: Vec<Value> = context
            .clayers
            .values()
            .map(|clayer| {
                let mut layer = Mapping::new();
                put(
                    &mut layer,
                    "clayer",
                    portable_relative_to(&clayer.path, &base),
                );
                Value::from(layer)
            })
            .collect();
        put_values(&mut entry, "clayers", clayers);
        put_seq(&mut entry, "packs-missing", &context.missing_packs);
        put_seq(&mut entry, "packs-unused", &context.unused_packs);
        if !context.variables.is_empty() {
            let mut variables = Vec::new();
            for (key, value) in &context.variables {
                let mut var = Mapping::new();
                put(&mut var, key, value.as_str());
                variables.push(Value::from(var));
            }
            put_values(&mut entry, "variables", variables);
        }
        if !context.undefined_variables.is_empty() {
            let undefined: Vec<String> =
                context.undefined_variables.iter().cloned().collect();
            put_seq(&mut entry, "variables-undefined", &undefined);
        }
        if let Some(streams) = diagnostics.context_messages(name) {
            let mut messages = Mapping::new();
            put_seq(&mut messages, "errors", &streams.errors);
            put_seq(&mut messages, "warnings", &streams.warnings);
            put_seq(&mut messages, "info", &streams.infos);
            put_map(&mut entry, "messages", messages);
        }
        if context.need_rebuild {
            any_rebuild = true;
            put(&mut entry, "rebuild", true);
        }
        cbuilds.push(Value::from(entry));
    }
    put_values(&mut node, "cbuilds", cbuilds);

    let mut executes = Vec::new();
    for execute in inputs.executes {
        let mut entry = Mapping::new();
        put(&mut entry, "execute", execute.execute.as_str());
        put_nonempty(&mut entry, "run", &execute.run);
        if execute.always {
            put(&mut entry, "always", true);
        }
        put_seq(&mut entry, "input", &execute.input);
        put_seq(&mut entry, "output", &execute.output);
        executes.push(Value::from(entry));
    }
    put_values(&mut node, "executes", executes);

    // The index itself needs a rebuild when the set of child cbuilds
    // changed versus the on-disk index.
    if let Ok(existing) = std::fs::read_to_string(&path) {
        if let Ok(value) = serde_yaml::from_str::<Value>(&existing) {
            let previous: BTreeSet<String> = value
                .get("build-idx")
                .and_then(|b| b.get("cbuilds"))
                .and_then(|c| c.as_sequence())
                .map(|seq| {
                    seq.iter()
                        .filter_map(|e| e.get("cbuild"))
                        .filter_map(|c| c.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let current: BTreeSet<String> = cbuild_paths
                .values()
                .map(|p| portable_relative_to(p, &base))
                .collect();
            if !previous.is_empty() && previous != current {
                any_rebuild = true;
            }
        }
    }
    if any_rebuild {
        put(&mut node, "rebuild", true);
    }

    let mut root = Mapping::new();
    put(&mut root, "build-idx", Value::from(node));
    let content = render(&Value::from(root))?;
    write_if_changed(&path, &content)?;
    Ok(path)
}
