//! Component selection and dependency validation.
//!
//! Requirements arrive as full or partial component ids. Matching filters
//! the installed components by target attributes first, then narrows by
//! token subset, prefers exact field equality, and finally picks the
//! highest version that satisfies a user version filter. One aggregate id
//! may be selected at most once per context.

use crate::context::{ApiEntry, ComponentFileEntry, Context, GeneratorEntry, SelectedEntry};
use crate::diagnostics::Diagnostics;
use anyhow::{bail, ensure, Result};
use log::debug;
use rtemodel::{
    compare_versions, parse_lenient, ComponentRef, ConditionResult, FileCategory, PackFilter,
    RteModel, SelectedComponent, VersionRange,
};
use std::collections::BTreeSet;

/// A parsed component requirement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentRequest {
    pub vendor: String,
    pub class: String,
    pub bundle: String,
    pub group: String,
    pub sub: String,
    pub variant: String,
    pub version: VersionRange,
    pub tokens: BTreeSet<String>,
    pub raw: String,
}

impl ComponentRequest {
    /// Parse `[Cvendor::]Cclass[&Cbundle]:Cgroup[:Csub][&Cvariant][@[>=]ver]`.
    pub fn parse(value: &str) -> Result<Self> {
        let mut request = ComponentRequest {
            raw: value.to_string(),
            ..Default::default()
        };
        let mut rest = value.trim().to_string();
        if let Some((body, version)) = rest.rsplit_once('@') {
            request.version = match version.strip_prefix(">=") {
                Some(min) => VersionRange::from_min(parse_lenient(min)?),
                None => VersionRange::exact(parse_lenient(version)?),
            };
            rest = body.to_string();
        }
        if let Some((vendor, body)) = rest.split_once("::") {
            request.vendor = vendor.to_string();
            rest = body.to_string();
        }
        let segments: Vec<&str> = rest.split(':').collect();
        if let Some(first) = segments.first() {
            match first.split_once('&') {
                Some((class, bundle)) => {
                    request.class = class.to_string();
                    request.bundle = bundle.to_string();
                }
                None => request.class = first.to_string(),
            }
        }
        let mut tail: Vec<String> = segments.iter().skip(1).map(|s| s.to_string()).collect();
        if let Some(last) = tail.last_mut() {
            let cloned = last.clone();
            if let Some((name, variant)) = cloned.split_once('&') {
                request.variant = variant.to_string();
                *last = name.to_string();
            }
        }
        match tail.len() {
            0 => {}
            1 => request.group = tail[0].clone(),
            _ => {
                request.group = tail[0].clone();
                request.sub = tail[1].clone();
            }
        }
        for token in [
            &request.vendor,
            &request.class,
            &request.bundle,
            &request.group,
            &request.sub,
            &request.variant,
        ] {
            if !token.is_empty() {
                request.tokens.insert(token.clone());
            }
        }
        ensure!(
            !request.tokens.is_empty(),
            "Invalid component requirement '{value}'"
        );
        Ok(request)
    }

    fn candidate_tokens(candidate: &ComponentRef) -> BTreeSet<String> {
        let component = candidate.component;
        [
            &component.vendor,
            &component.bundle,
            &component.class,
            &component.group,
            &component.sub,
            &component.variant,
        ]
        .iter()
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .collect()
    }

    /// Token-subset match: every requested token appears among the
    /// candidate's identity fields.
    pub fn matches_tokens(&self, candidate: &ComponentRef) -> bool {
        let tokens = Self::candidate_tokens(candidate);
        self.tokens.iter().all(|t| tokens.contains(t))
    }

    /// Exact field equality for every populated request field; an absent
    /// sub/variant requires the candidate's field to be empty as well.
    pub fn matches_exact(&self, candidate: &ComponentRef) -> bool {
        let component = candidate.component;
        (self.vendor.is_empty() || self.vendor == component.vendor)
            && self.class == component.class
            && (self.bundle.is_empty() || self.bundle == component.bundle)
            && self.group == component.group
            && self.sub == component.sub
            && (self.variant.is_empty() || self.variant == component.variant)
    }

    pub fn matches_version(&self, candidate: &ComponentRef) -> bool {
        if self.version.is_any() {
            return true;
        }
        match parse_lenient(&candidate.component.version) {
            Ok(version) => self.version.contains(&version),
            Err(_) => false,
        }
    }
}

/// Select every component requirement of the context, enforce aggregate
/// uniqueness, then run the dependency solver.
pub fn select_components(
    context: &mut Context,
    model: &RteModel,
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let filter = if context.resolved_pack_ids.is_empty() {
        PackFilter::all()
    } else {
        PackFilter::restricted(context.resolved_pack_ids.iter().cloned())
    };
    let installed = model.filtered_components(&context.target_attributes, &filter);
    let candidates: Vec<ComponentRef> = installed.values().copied().collect();

    let requirements = context.component_requirements.clone();
    for (item, layer) in &requirements {
        let request = ComponentRequest::parse(&item.component)?;
        let candidate = match pick_component(&request, &candidates) {
            Ok(candidate) => candidate,
            Err(e) => {
                bail!("No component was found with identifier '{}': {e}", item.component);
            }
        };
        let component = candidate.component.clone();
        let instances = item.instances.unwrap_or(1);
        ensure!(
            instances <= component.max_instances,
            "Component '{}' accepts at most {} instances, {} were requested",
            component.full_id(),
            component.max_instances,
            instances
        );

        let aggregate = component.aggregate_id();
        if let Some(existing) = context.components.get(&aggregate) {
            // Identical re-selection from another layer is tolerated;
            // selecting a second variant or version of the same aggregate
            // is not.
            ensure!(
                existing.selected.component.full_id() == component.full_id(),
                "Duplicate component selection for '{aggregate}': '{}' and '{}'",
                existing.selected.component.full_id(),
                component.full_id()
            );
            continue;
        }

        debug!(
            "[{}] Selected component '{}' for '{}'",
            context.name,
            component.full_id(),
            item.component
        );
        context.components.insert(
            aggregate,
            SelectedEntry {
                selected: SelectedComponent {
                    pack_id: candidate.pack.id.clone(),
                    pack_index: candidate.pack_index,
                    component,
                    selected_by: item.component.clone(),
                    instances,
                },
                generator: candidate.component.generator.clone().unwrap_or_default(),
                layer: layer.clone(),
            },
        );
    }

    collect_generators(context, model);
    collect_apis(context, model, &filter);
    solve_dependencies(context, model, diagnostics);
    collect_component_files(context, model);
    Ok(())
}

/// Narrow the candidate list for one request and pick the winner.
fn pick_component<'a>(
    request: &ComponentRequest,
    candidates: &[ComponentRef<'a>],
) -> Result<ComponentRef<'a>> {
    let mut matching: Vec<ComponentRef> = candidates
        .iter()
        .filter(|c| request.matches_tokens(c))
        .copied()
        .collect();
    if matching.is_empty() {
        bail!("no installed component matches");
    }

    let exact: Vec<ComponentRef> = matching
        .iter()
        .filter(|c| request.matches_exact(c))
        .copied()
        .collect();
    if !exact.is_empty() {
        matching = exact;
    }

    matching.retain(|c| request.matches_version(c));
    if matching.is_empty() {
        bail!("no matching component satisfies the version filter '{}'", request.version);
    }

    let aggregates: BTreeSet<String> = matching
        .iter()
        .map(|c| c.component.aggregate_id())
        .collect();
    if aggregates.len() > 1 {
        bail!(
            "multiple components match: {}",
            matching
                .iter()
                .map(|c| c.component.full_id())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    // Multiple variants of one aggregate: without an explicit variant the
    // default variant wins; first in document order when several claim it.
    if request.variant.is_empty() {
        let variants: BTreeSet<&str> = matching
            .iter()
            .map(|c| c.component.variant.as_str())
            .collect();
        if variants.len() > 1 {
            let default: Vec<ComponentRef> = matching
                .iter()
                .filter(|c| c.component.default_variant || c.component.variant.is_empty())
                .copied()
                .collect();
            if !default.is_empty() {
                matching = default;
            }
        }
    }

    matching
        .into_iter()
        .max_by(|a, b| {
            match (
                parse_lenient(&a.component.version),
                parse_lenient(&b.component.version),
            ) {
                (Ok(va), Ok(vb)) => compare_versions(&va, &vb),
                (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
                (Err(_), Ok(_)) => std::cmp::Ordering::Less,
                (Err(_), Err(_)) => std::cmp::Ordering::Equal,
            }
        })
        .ok_or_else(|| anyhow::anyhow!("no installed component matches"))
}

/// Record generator entries for selected components that declare one.
fn collect_generators(context: &mut Context, model: &RteModel) {
    let entries: Vec<(String, String, usize)> = context
        .components
        .values()
        .filter(|e| !e.generator.is_empty())
        .map(|e| {
            (
                e.generator.clone(),
                e.selected.component.full_id(),
                e.selected.pack_index,
            )
        })
        .collect();
    for (generator_id, component_id, pack_index) in entries {
        let Some(pack) = model.packs().get(pack_index) else {
            continue;
        };
        let Some(generator) = pack.generators.get(&generator_id) else {
            continue;
        };
        let working_dir = context
            .directories
            .cprj
            .join(generator.working_dir.trim_start_matches("$PRTE_DIR$/"));
        let gpdsc_name = if generator.gpdsc.is_empty() {
            format!("{generator_id}.gpdsc")
        } else {
            generator.gpdsc.clone()
        };
        let entry = context
            .generators
            .entry(generator_id.clone())
            .or_insert_with(|| GeneratorEntry {
                id: generator_id.clone(),
                command: generator.command.clone(),
                arguments: generator.arguments.clone(),
                gpdsc: working_dir.join(&gpdsc_name),
                working_dir,
                from_pack: pack.id.to_string(),
                components: Vec::new(),
            });
        entry.components.push(component_id);
    }
}

/// Collect the APIs implemented by the current selection.
fn collect_apis(context: &mut Context, model: &RteModel, filter: &PackFilter) {
    let apis = model.filtered_apis(&context.target_attributes, filter);
    for api in apis {
        let implementors: Vec<String> = context
            .components
            .values()
            .filter(|e| api.api.implemented_by(&e.selected.component))
            .map(|e| e.selected.component.full_id())
            .collect();
        if implementors.is_empty() {
            continue;
        }
        let files = api
            .api
            .files
            .iter()
            .map(|f| {
                let mut entry = file_entry(f);
                entry.name =
                    crate::common::path_to_portable(&api.pack.path.join(&f.name));
                entry
            })
            .collect();
        context.apis.push(ApiEntry {
            id: api.api.id(),
            implemented_by: implementors,
            files,
            from_pack: api.pack.id.to_string(),
        });
    }
}

/// Run the dependency solver and log results below fulfilled as warnings.
fn solve_dependencies(context: &mut Context, model: &RteModel, diagnostics: &mut Diagnostics) {
    let selection: Vec<SelectedComponent> = context
        .components
        .values()
        .map(|e| e.selected.clone())
        .collect();
    let results = model.dependency_solve(&context.target_attributes, &selection);
    for result in &results {
        if result.result >= ConditionResult::Fulfilled {
            continue;
        }
        let mut message = format!(
            "Component '{}' dependency validation: {:?}",
            result.component_id, result.result
        );
        if !result.expressions.is_empty() {
            message.push_str(&format!(" [{}]", result.expressions.join("; ")));
        }
        if !result.aggregates.is_empty() {
            message.push_str(&format!(
                ", candidates: {}",
                result.aggregates.join(", ")
            ));
        }
        diagnostics.warning(&context.name, message);
    }
    context.validation_results = results;
}

fn file_entry(file: &rtemodel::FileItem) -> ComponentFileEntry {
    ComponentFileEntry {
        name: file.name.clone(),
        attr: file.attr.clone(),
        category: file.category.to_string(),
        language: file.language.clone(),
        scope: file.scope.clone(),
        version: file.version.clone(),
        select: file.select.clone(),
    }
}

/// Record the non-config files of every selected component, resolved
/// against the owning pack's location.
fn collect_component_files(context: &mut Context, model: &RteModel) {
    let entries: Vec<(String, Vec<ComponentFileEntry>)> = context
        .components
        .values()
        .map(|entry| {
            let pack_path = model
                .packs()
                .get(entry.selected.pack_index)
                .map(|p| p.path.clone());
            let files = entry
                .selected
                .component
                .files
                .iter()
                .filter(|f| !f.is_config())
                .filter(|f| f.category != FileCategory::Doc)
                .map(|f| {
                    let mut file = file_entry(f);
                    if let Some(pack_path) = &pack_path {
                        file.name =
                            crate::common::path_to_portable(&pack_path.join(&f.name));
                    }
                    file
                })
                .collect();
            (entry.selected.component.full_id(), files)
        })
        .collect();
    for (id, files) in entries {
        context.component_files.insert(id, files);
    }
}
