//! Generator inputs: `<context>.cbuild-gen.yml` per generator-using
//! context plus the `<solution>.cbuild-gen-idx.yml` index.

use super::{emit_cbuild, generated_by, put, put_values, render, write_if_changed};
use crate::common::portable_relative_to;
use crate::context::Context;
use crate::diagnostics::Diagnostics;
use anyhow::Result;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Emit the generator payloads of one context, one per referenced
/// generator. Returns `generator id -> artefact path`.
pub fn emit_cbuild_gens(
    context: &mut Context,
    solution_path: &Path,
    diagnostics: &Diagnostics,
) -> Result<BTreeMap<String, PathBuf>> {
    let generator_ids: Vec<String> = context.generators.keys().cloned().collect();
    let mut paths = BTreeMap::new();
    for generator_id in generator_ids {
        let path = emit_cbuild(context, solution_path, Some(&generator_id), diagnostics)?;
        paths.insert(generator_id, path);
    }
    Ok(paths)
}

/// Emit the generator index over all contexts that reference generators.
pub fn emit_cbuild_gen_idx(
    output_dir: &Path,
    solution_name: &str,
    contexts: &BTreeMap<String, Context>,
    gen_paths: &BTreeMap<String, BTreeMap<String, PathBuf>>,
    ordered_context_names: &[String],
) -> Result<Option<PathBuf>> {
    let mut generators: BTreeMap<String, Vec<(String, PathBuf)>> = BTreeMap::new();
    for name in ordered_context_names {
        let Some(paths) = gen_paths.get(name) else {
            continue;
        };
        for (generator_id, path) in paths {
            generators
                .entry(generator_id.clone())
                .or_default()
                .push((name.clone(), path.clone()));
        }
    }
    if generators.is_empty() {
        return Ok(None);
    }

    let path = output_dir.join(format!("{solution_name}.cbuild-gen-idx.yml"));
    let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let mut node = Mapping::new();
    put(&mut node, "generated-by", generated_by());
    let mut entries = Vec::new();
    for (generator_id, uses) in &generators {
        let mut generator = Mapping::new();
        put(&mut generator, "generator", generator_id.as_str());
        if let Some((context_name, _)) = uses.first() {
            if let Some(context) = contexts.get(context_name) {
                if let Some(entry) = context.generators.get(generator_id) {
                    put(
                        &mut generator,
                        "working-dir",
                        portable_relative_to(&entry.working_dir, &base),
                    );
                }
            }
        }
        let mut cbuild_gens = Vec::new();
        for (context_name, gen_path) in uses {
            let mut entry = Mapping::new();
            put(
                &mut entry,
                "cbuild-gen",
                portable_relative_to(gen_path, &base),
            );
            put(&mut entry, "project", context_name.as_str());
            cbuild_gens.push(Value::from(entry));
        }
        put_values(&mut generator, "cbuild-gens", cbuild_gens);
        entries.push(Value::from(generator));
    }
    put_values(&mut node, "generators", entries);

    let mut root = Mapping::new();
    put(&mut root, "build-gen-idx", Value::from(node));
    let content = render(&Value::from(root))?;
    write_if_changed(&path, &content)?;
    Ok(Some(path))
}
