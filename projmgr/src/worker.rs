//! Per-invocation orchestration.
//!
//! The worker owns the parser, the pack registry, the model and the
//! contexts. An invocation runs in two phases: `init` populates the
//! registry, the model and the context skeletons; processing then walks
//! the selected contexts in source order, resolving precedences, target,
//! toolchain, components, layers and sequences, and finally emits the
//! derived artefacts. Access sequences referencing other contexts
//! re-enter processing recursively; a `precedences_done` flag per context
//! guarantees termination and a processing stack detects cycles.

use crate::common::absolute_from;
use crate::context::{
    context_filters_allow, merge_device_specs, Context, ContextName, SelectedEntry,
};
use crate::diagnostics::{Diagnostics, SOLUTION_SCOPE};
use crate::emit::{self, PackLockEntry};
use crate::parser::{
    normalized_defines, CdefaultItem, ClayerItem, CsolutionItem, ExecuteNode, FileNode,
    GroupNode, LinkerNode, Parser,
};
use crate::plm::{self, PlmSeverity};
use crate::sequences::{self, ExpansionEnv};
use crate::target::resolve_target;
use crate::toolchain::{output_affixes, CompilerSpec, ToolchainRegistry};
use anyhow::{bail, ensure, Context as _, Result};
use log::debug;
use rtemodel::{LoadPacksPolicy, Pack, PackRegistry, PackSpec, RteModel, VersionRange};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Options of one invocation, assembled by the command layer.
#[derive(Debug, Clone, Default)]
pub struct WorkerOptions {
    pub solution: PathBuf,
    pub context_selectors: Vec<String>,
    pub use_context_set: bool,
    pub toolchain: Option<String>,
    pub active_target_set: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub load_policy: LoadPacksPolicy,
    pub check_schema: bool,
    pub dry_run: bool,
    pub update_rte: bool,
    pub frozen_packs: bool,
    pub clayer_search_path: Option<PathBuf>,
    pub pack_root: Option<PathBuf>,
    pub compiler_root: Option<PathBuf>,
}

impl WorkerOptions {
    pub fn new(solution: impl Into<PathBuf>) -> Self {
        Self {
            solution: solution.into(),
            check_schema: true,
            update_rte: true,
            ..Default::default()
        }
    }
}

pub struct Worker {
    options: WorkerOptions,
    pub parser: Parser,
    registry: PackRegistry,
    toolchains: ToolchainRegistry,
    model: RteModel,
    pub diagnostics: Diagnostics,
    pub contexts: BTreeMap<String, Context>,
    /// Context names in source order (projects, build-types,
    /// target-types).
    pub ordered_contexts: Vec<String>,
    pub selected_contexts: Vec<String>,
    solution_dir: PathBuf,
    solution_name: String,
    output_dir: PathBuf,
    tmp_dir: PathBuf,
    out_dir: PathBuf,
    selectable_compilers: Vec<String>,
    selected_compiler: String,
    solution_executes: Vec<ExecuteNode>,
}

impl Worker {
    /// Parse the solution, its projects and the ambient configuration,
    /// register toolchains and enumerate contexts. No packs are loaded
    /// yet.
    pub fn new(options: WorkerOptions) -> Result<Self> {
        let pack_root = options
            .pack_root
            .clone()
            .or_else(|| std::env::var_os("CMSIS_PACK_ROOT").map(PathBuf::from))
            .context("CMSIS_PACK_ROOT is not set and no pack root was given")?;
        let compiler_root = options
            .compiler_root
            .clone()
            .or_else(|| std::env::var_os("CMSIS_COMPILER_ROOT").map(PathBuf::from))
            .unwrap_or_else(|| pack_root.join("..").join("etc"));

        let mut parser = Parser::new(options.check_schema);
        parser.parse_csolution(&options.solution)?;
        let csolution = parser.csolution.clone().expect("solution was just parsed");
        let solution_dir = csolution.directory.clone();
        let solution_name = csolution.name.clone();

        for entry in &csolution.solution.projects {
            let path = absolute_from(&solution_dir, &entry.project);
            parser.parse_cproject(&path)?;
        }

        // cdefault: looked up next to the solution, then in the compiler
        // root directory, only when the solution enables it.
        if parser.enable_cdefault {
            for candidate in [
                solution_dir.join("cdefault.yml"),
                solution_dir.join("cdefault.yaml"),
                compiler_root.join("cdefault.yml"),
            ] {
                if candidate.is_file() {
                    parser.parse_cdefault(&candidate)?;
                    break;
                }
            }
        }

        let debug_adapters = compiler_root.join("debug-adapters.yml");
        if debug_adapters.is_file() {
            parser.parse_debug_adapters(&debug_adapters)?;
        }

        let toolchains = ToolchainRegistry::discover(std::env::vars(), compiler_root);
        let output_dir = options
            .output_dir
            .clone()
            .map(|dir| absolute_from(&solution_dir, &dir.to_string_lossy()))
            .unwrap_or_else(|| solution_dir.clone());

        let dirs = csolution.solution.output_dirs.clone().unwrap_or_default();
        let tmp_dir = absolute_from(&output_dir, dirs.tmpdir.as_deref().unwrap_or("tmp"));
        let out_dir = absolute_from(&output_dir, dirs.outdir.as_deref().unwrap_or("out"));

        let mut worker = Self {
            registry: PackRegistry::new(pack_root),
            toolchains,
            model: RteModel::default(),
            diagnostics: Diagnostics::new(),
            contexts: BTreeMap::new(),
            ordered_contexts: Vec::new(),
            selected_contexts: Vec::new(),
            solution_dir,
            solution_name,
            output_dir,
            tmp_dir,
            out_dir,
            selectable_compilers: Vec::new(),
            selected_compiler: String::new(),
            solution_executes: Vec::new(),
            parser,
            options,
        };
        worker.collect_selectable_compilers();
        worker.add_contexts()?;
        Ok(worker)
    }

    pub fn model(&self) -> &RteModel {
        &self.model
    }

    pub fn registry(&self) -> &PackRegistry {
        &self.registry
    }

    pub fn toolchains(&self) -> &ToolchainRegistry {
        &self.toolchains
    }

    fn csolution(&self) -> &CsolutionItem {
        self.parser.csolution.as_ref().expect("parsed at init")
    }

    fn cdefault(&self) -> Option<&CdefaultItem> {
        self.parser.cdefault.as_ref()
    }

    fn collect_selectable_compilers(&mut self) {
        let mut compilers = Vec::new();
        if let Some(cdefault) = self.cdefault() {
            compilers.extend(cdefault.default.select_compiler.iter().cloned());
        }
        for compiler in &self.csolution().solution.select_compiler {
            if !compilers.contains(compiler) {
                compilers.push(compiler.clone());
            }
        }
        self.selectable_compilers = compilers;
    }

    /// Enumerate the contexts: projects × build-types × target-types in
    /// source order, honouring the projects' context filters.
    fn add_contexts(&mut self) -> Result<()> {
        let csolution = self.csolution().clone();
        let solution = &csolution.solution;
        ensure!(
            !solution.target_types.is_empty(),
            "Missing target-types in solution '{}'",
            csolution.path.display()
        );
        let build_types: Vec<String> = solution
            .build_types
            .iter()
            .map(|b| b.name.clone())
            .collect();
        let build_types = if build_types.is_empty() {
            vec![String::new()]
        } else {
            build_types
        };

        for entry in &solution.projects {
            let project_name = {
                let path = absolute_from(&csolution.directory, &entry.project);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                name.trim_end_matches(".yml")
                    .trim_end_matches(".yaml")
                    .trim_end_matches(".cproject")
                    .to_string()
            };
            for build_type in &build_types {
                for target_type in &solution.target_types {
                    let type_pair = crate::context::TypePair {
                        build: build_type.clone(),
                        target: target_type.name.clone(),
                    };
                    if !context_filters_allow(
                        &entry.for_context,
                        &entry.not_for_context,
                        &type_pair,
                    ) {
                        continue;
                    }
                    let mut context =
                        Context::new(&project_name, build_type, &target_type.name);
                    let Some(cproject) = self.parser.cprojects.get(&project_name) else {
                        bail!("Project '{project_name}' was not parsed");
                    };
                    context.cproject = cproject.clone();
                    context.description = cproject
                        .project
                        .description
                        .clone()
                        .unwrap_or_default();

                    // Per-level option sets for the precedence merge.
                    context.controls.csolution = solution.build.clone();
                    context.controls.cproject = cproject.project.build.clone();
                    context.controls.target_type = target_type.build.clone();
                    if let Some(build_type_node) = solution
                        .build_types
                        .iter()
                        .find(|b| b.name == *build_type)
                    {
                        context.controls.build_type = build_type_node.build.clone();
                    }

                    context.board = target_type.board.clone().unwrap_or_default();
                    context.board_item =
                        crate::context::BoardSpec::parse(&context.board);
                    context.device = target_type.device.clone().unwrap_or_default();
                    context.memories = target_type.memory.clone();
                    context.target_set = target_type.target_set.clone();

                    // Pack requirements filtered for this context, from
                    // the solution and the project.
                    for pack in solution.packs.iter().chain(cproject.project.packs.iter())
                    {
                        if context_filters_allow(
                            &pack.for_context,
                            &pack.not_for_context,
                            &context.type_pair,
                        ) {
                            context.pack_requirements.push(pack.clone());
                        }
                    }

                    self.compute_directories(&mut context);
                    self.ordered_contexts.push(context.name.clone());
                    self.contexts.insert(context.name.clone(), context);
                }
            }
        }
        ensure!(
            !self.ordered_contexts.is_empty(),
            "No context matches the solution's projects and types"
        );
        self.solution_executes = solution.executes.clone();
        Ok(())
    }

    fn compute_directories(&self, context: &mut Context) {
        let mut segments = PathBuf::from(&context.project_name);
        segments.push(&context.type_pair.target);
        if !context.type_pair.build.is_empty() {
            segments.push(&context.type_pair.build);
        }
        let directories = &mut context.directories;
        directories.outdir = self.out_dir.join(&segments);
        directories.intdir = self.tmp_dir.join(&segments);
        directories.cprj = self.tmp_dir.join(&segments);
        directories.cbuild = directories.cprj.clone();
        directories.tmpdir = self.tmp_dir.clone();
        directories.out_base = self.out_dir.clone();
        let rte_base = context
            .cproject
            .project
            .rte
            .as_ref()
            .and_then(|rte| rte.base_dir.clone())
            .unwrap_or_else(|| "RTE".to_string());
        directories.rte = absolute_from(&context.cproject.directory, &rte_base);
    }

    /// Apply `--context` selectors or the persisted cbuild-set; an empty
    /// selection selects every context.
    pub fn parse_context_selection(&mut self) -> Result<()> {
        let mut selectors = self.options.context_selectors.clone();
        if selectors.is_empty() && self.options.use_context_set {
            let path = self
                .output_dir
                .join(format!("{}.cbuild-set.yml", self.solution_name));
            if path.is_file() {
                self.parser.parse_cbuild_set(&path)?;
                if let Some(set) = &self.parser.cbuild_set {
                    selectors = set.contexts.iter().map(|c| c.context.clone()).collect();
                    if self.options.toolchain.is_none() {
                        if let Some(compiler) = &set.compiler {
                            self.options.toolchain = Some(compiler.clone());
                        }
                    }
                }
            }
        }
        if selectors.is_empty() {
            self.selected_contexts = self.ordered_contexts.clone();
            return Ok(());
        }
        let mut selected = Vec::new();
        for selector in &selectors {
            let pattern = ContextName::parse(selector)
                .context(format!("Invalid context selector '{selector}'"))?;
            let mut matched = false;
            for name in &self.ordered_contexts {
                if pattern.matches(name) && !selected.contains(name) {
                    selected.push(name.clone());
                    matched = true;
                }
            }
            ensure!(
                matched,
                "No context matches '{selector}'; run 'csolution list contexts' to see \
                 the available ones"
            );
        }
        // Keep source order regardless of selector order.
        self.selected_contexts = self
            .ordered_contexts
            .iter()
            .filter(|name| selected.contains(name))
            .cloned()
            .collect();
        Ok(())
    }

    /// Resolve pack requirements of every selected context and build the
    /// model. Missing packs are per-context errors; processing continues
    /// for surviving contexts.
    pub fn load_packs(&mut self) -> Result<()> {
        let mut to_load: BTreeMap<PathBuf, rtemodel::PackId> = BTreeMap::new();
        let selected = self.selected_contexts.clone();
        for name in &selected {
            let requirements = self.contexts[name].pack_requirements.clone();
            let mut resolved_ids = BTreeSet::new();
            let mut pack_paths = BTreeMap::new();
            let mut user_map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            let mut local_paths = BTreeSet::new();
            let mut missing = Vec::new();

            for requirement in &requirements {
                if !requirement.path.is_empty() {
                    let dir = absolute_from(&self.solution_dir, &requirement.path);
                    match self.registry.load_local(&dir) {
                        Ok(pack) => {
                            resolved_ids.insert(pack.id.to_string());
                            pack_paths.insert(pack.id.to_string(), pack.path.clone());
                            local_paths.insert(pack.id.to_string());
                            to_load.insert(pack.pdsc_path.clone(), pack.id.clone());
                        }
                        Err(e) => {
                            self.diagnostics.error(name, e.to_string());
                        }
                    }
                    continue;
                }
                let spec = match parse_pack_expression(&requirement.pack) {
                    Ok(spec) => spec,
                    Err(e) => {
                        self.diagnostics.error(name, e.to_string());
                        continue;
                    }
                };
                let expanded = match self.registry.expand_wildcard(&spec) {
                    Ok(expanded) if !expanded.is_empty() => expanded,
                    Ok(_) => {
                        missing.push(requirement.pack.clone());
                        self.diagnostics.error(
                            name,
                            format!("Required pack '{}' is not installed", requirement.pack),
                        );
                        continue;
                    }
                    Err(e) => {
                        missing.push(requirement.pack.clone());
                        self.diagnostics.error(name, e.to_string());
                        continue;
                    }
                };
                for spec in expanded {
                    match self.registry.effective_pdsc(&spec) {
                        Ok(effective) => {
                            let id = effective.id.to_string();
                            resolved_ids.insert(id.clone());
                            user_map
                                .entry(requirement.pack.clone())
                                .or_default()
                                .insert(id);
                            to_load.insert(effective.path, effective.id);
                        }
                        Err(e) => {
                            missing.push(spec.to_string());
                            self.diagnostics.error(name, e.to_string());
                        }
                    }
                }
            }

            let context = self.contexts.get_mut(name).expect("known context");
            context.resolved_pack_ids = resolved_ids;
            context.pack_paths = pack_paths;
            context.user_pack_to_resolved = user_map;
            context.local_pack_paths = local_paths;
            context.missing_packs = missing;
        }

        let explicit: Vec<PackSpec> = Vec::new();
        let mut packs: Vec<Pack> = match self.options.load_policy {
            LoadPacksPolicy::Required => {
                ensure!(
                    !to_load.is_empty(),
                    "The 'required' pack load policy needs an explicit list of packs, \
                     but none was given"
                );
                Vec::new()
            }
            LoadPacksPolicy::Latest | LoadPacksPolicy::All => {
                self.registry.load(self.options.load_policy, &explicit)?
            }
            LoadPacksPolicy::Default => {
                if to_load.is_empty() {
                    self.registry.load(LoadPacksPolicy::Default, &explicit)?
                } else {
                    Vec::new()
                }
            }
        };

        for (path, _) in &to_load {
            if packs.iter().any(|p| &p.pdsc_path == path) {
                continue;
            }
            match rtemodel::read_pdsc(path) {
                Ok(pack) => packs.push(pack),
                Err(e) => self.diagnostics.error(SOLUTION_SCOPE, e.to_string()),
            }
        }

        // One round of pack-to-pack requirements keeps dependencies of
        // the required packs available for condition evaluation.
        let mut additional = Vec::new();
        for pack in &packs {
            for requirement in &pack.requirements {
                let spec = PackSpec {
                    vendor: requirement.vendor.clone(),
                    name: requirement.name.clone(),
                    version_range: VersionRange::parse(&requirement.version_range)
                        .unwrap_or_default(),
                };
                if packs
                    .iter()
                    .any(|p| spec.matches_name(&p.id.vendor, &p.id.name))
                {
                    continue;
                }
                if let Ok(effective) = self.registry.effective_pdsc(&spec) {
                    if let Ok(pack) = rtemodel::read_pdsc(&effective.path) {
                        debug!("Loaded dependent pack '{}'", pack.id);
                        additional.push(pack);
                    }
                }
            }
        }
        packs.extend(additional);

        // Contexts without explicit requirements see every loaded pack.
        for name in &selected {
            let context = self.contexts.get_mut(name).expect("known context");
            for pack in &packs {
                if context.pack_requirements.is_empty() {
                    context.resolved_pack_ids.insert(pack.id.to_string());
                }
                context
                    .pack_paths
                    .insert(pack.id.to_string(), pack.path.clone());
            }
        }

        self.model = RteModel::new(packs);
        Ok(())
    }

    /// Process every selected context; returns false when any context
    /// recorded an error.
    pub fn process_contexts(&mut self) -> bool {
        let selected = self.selected_contexts.clone();
        for name in &selected {
            let mut stack = Vec::new();
            if let Err(e) = self.process_context(name, &mut stack) {
                self.diagnostics.error(name, e.to_string());
            }
        }
        !self.diagnostics.has_errors()
    }

    /// Memoised recursive processing; access sequences re-enter here for
    /// referenced contexts.
    fn process_context(&mut self, name: &str, stack: &mut Vec<String>) -> Result<()> {
        let Some(context) = self.contexts.get(name) else {
            bail!("Context '{name}' is not selected");
        };
        if context.precedences_done {
            return Ok(());
        }
        ensure!(
            !stack.contains(&name.to_string()),
            "Cyclic context reference detected: {} -> {name}",
            stack.join(" -> ")
        );
        stack.push(name.to_string());
        let mut context = self.contexts.remove(name).expect("present");
        let result = self.process_context_inner(&mut context, stack);
        context.precedences_done = true;
        self.contexts.insert(name.to_string(), context);
        stack.pop();
        result
    }

    fn process_context_inner(
        &mut self,
        context: &mut Context,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        // Setups contribute their options when their for-compiler and
        // context filters match; compiler-specific setups join after the
        // first merge round resolved the compiler.
        context.controls.merge()?;
        self.resolve_compiler(context)?;
        self.apply_setups(context)?;
        context.controls.merge()?;
        let cdefault_misc = self
            .cdefault()
            .map(|c| c.default.misc.clone())
            .unwrap_or_default();
        let compiler_name = CompilerSpec::parse(&context.compiler)?.name;
        context.controls.merge_misc(&compiler_name, &cdefault_misc);
        context.variables = context.controls.processed.variables.clone();

        // Device precedence: target-type board/device merged with layer
        // contributions happens before target resolution.
        context.device_item = merge_device_specs(
            [context.device.as_str()].into_iter().filter(|d| !d.is_empty()),
        )?;
        resolve_target(context, &self.model, &mut self.diagnostics)?;
        context
            .target_attributes
            .set("Tcompiler", compiler_name.clone());

        self.parse_context_layers(context)?;
        if !context.controls.clayers.is_empty() {
            context.controls.merge()?;
            context.controls.merge_misc(&compiler_name, &cdefault_misc);
        }
        self.check_compiler_filter_spelling(context);

        if context
            .cproject
            .project
            .layers
            .iter()
            .any(|l| l.layer.is_empty())
        {
            crate::layers::discover_layers(
                context,
                &mut self.parser,
                &self.model,
                self.options.clayer_search_path.as_deref(),
                &mut self.diagnostics,
            )?;
        }

        self.collect_component_requirements(context);
        crate::components::select_components(context, &self.model, &mut self.diagnostics)?;
        self.process_gpdscs(context);

        if self.options.update_rte {
            crate::rte::update_config_files(
                context,
                &self.model,
                self.options.dry_run,
                &mut self.diagnostics,
            )?;
            // A dry run deploys nothing, so there is nothing to audit.
            if !self.options.dry_run {
                self.audit_config_files(context);
            }
            let constructed =
                crate::rte::update_rte_headers(context, &self.model, self.options.dry_run)?;
            context.constructed_files = constructed;
        }

        self.process_output_filenames(context)?;
        self.process_groups(context)?;
        self.process_linker(context)?;
        self.process_executes(context);

        // Cross-context references must be processed before expansion.
        let refs = self.collect_context_refs(context);
        for referenced in refs {
            let resolved = {
                let known: BTreeSet<String> = self
                    .contexts
                    .keys()
                    .cloned()
                    .chain([context.name.clone()])
                    .collect();
                sequences::resolve_context_ref(&referenced, context, &known)?
            };
            if resolved != context.name {
                self.process_context(&resolved, stack)?;
                if !context.depends_on.contains(&resolved) {
                    context.depends_on.push(resolved);
                }
            }
        }
        self.expand_sequences(context)?;
        self.check_missing_files(context);
        self.collect_unused_packs(context);
        Ok(())
    }

    /// Merge the components of already-generated gpdsc files into the
    /// selection. A generated component replaces the bootstrap selection
    /// of the same aggregate unless the bootstrap carries the newer
    /// version.
    fn process_gpdscs(&mut self, context: &mut Context) {
        let gpdscs: Vec<(String, PathBuf)> = context
            .generators
            .values()
            .map(|entry| (entry.id.clone(), entry.gpdsc.clone()))
            .collect();
        for (generator_id, gpdsc_path) in gpdscs {
            if !gpdsc_path.is_file() {
                continue;
            }
            let pack = match rtemodel::read_pdsc(&gpdsc_path) {
                Ok(pack) => pack,
                Err(e) => {
                    self.diagnostics.warning(
                        &context.name,
                        format!(
                            "Unable to load generated description '{}': {e}",
                            gpdsc_path.display()
                        ),
                    );
                    continue;
                }
            };
            for component in &pack.components {
                let aggregate = component.aggregate_id();
                if let Some(existing) = context.components.get(&aggregate) {
                    let bootstrap_newer = match (
                        rtemodel::parse_lenient(&existing.selected.component.version),
                        rtemodel::parse_lenient(&component.version),
                    ) {
                        (Ok(old), Ok(new)) => {
                            rtemodel::compare_versions(&old, &new)
                                == std::cmp::Ordering::Greater
                        }
                        _ => false,
                    };
                    if bootstrap_newer {
                        continue;
                    }
                }
                let files = component
                    .files
                    .iter()
                    .filter(|f| !f.is_config())
                    .map(|f| crate::context::ComponentFileEntry {
                        name: crate::common::path_to_portable(&pack.path.join(&f.name)),
                        attr: f.attr.clone(),
                        category: f.category.to_string(),
                        language: f.language.clone(),
                        scope: f.scope.clone(),
                        version: f.version.clone(),
                        select: f.select.clone(),
                    })
                    .collect();
                context.component_files.insert(component.full_id(), files);
                context.components.insert(
                    aggregate,
                    crate::context::SelectedEntry {
                        selected: rtemodel::SelectedComponent {
                            pack_id: pack.id.clone(),
                            // Generated packs live outside the model.
                            pack_index: usize::MAX,
                            component: component.clone(),
                            selected_by: generator_id.clone(),
                            instances: 1,
                        },
                        generator: generator_id.clone(),
                        layer: String::new(),
                    },
                );
            }
        }
    }

    /// Every file a context records must exist on disk, unless an
    /// `executes:` node declares it as an output.
    fn check_missing_files(&mut self, context: &mut Context) {
        let mut execute_outputs: Vec<String> = Vec::new();
        for execute in context.executes.iter().chain(self.solution_executes.iter()) {
            execute_outputs.extend(execute.output.iter().cloned());
        }
        fn check_group(
            group: &GroupNode,
            base: &Path,
            outputs: &[String],
            missing: &mut Vec<String>,
        ) {
            for file in &group.files {
                let path = absolute_from(base, &file.file);
                let is_output = outputs
                    .iter()
                    .any(|output| absolute_from(base, output) == path);
                if !is_output && !path.is_file() {
                    missing.push(file.file.clone());
                }
            }
            for nested in &group.groups {
                check_group(nested, base, outputs, missing);
            }
        }
        let mut missing = Vec::new();
        for group in &context.groups {
            check_group(
                group,
                &context.cproject.directory,
                &execute_outputs,
                &mut missing,
            );
        }
        for file in missing {
            self.diagnostics
                .error(&context.name, format!("File '{file}' was not found"));
        }
    }

    /// Compiler precedence: explicit selection, then the merged option,
    /// then cdefault; the selectable compiler list is surfaced when
    /// nothing decides.
    fn resolve_compiler(&mut self, context: &mut Context) -> Result<()> {
        let mut compiler = self.options.toolchain.clone().unwrap_or_default();
        if compiler.is_empty() {
            compiler = context.controls.processed.compiler.clone();
        }
        if compiler.is_empty() {
            if let Some(cdefault) = self.cdefault() {
                compiler = cdefault.default.compiler.clone().unwrap_or_default();
            }
        }
        if compiler.is_empty() {
            if self.selectable_compilers.is_empty() {
                bail!(
                    "There is no compiler selected; set 'compiler:' in the solution or \
                     pass '--toolchain'"
                );
            }
            bail!(
                "There is no compiler selected; pick one of the selectable compilers \
                 [{}] via '--toolchain'",
                self.selectable_compilers.join(", ")
            );
        }
        context.compiler = CompilerSpec::parse(&compiler)?.display();
        self.selected_compiler = context.compiler.clone();
        match self.toolchains.resolve(&compiler) {
            Ok(toolchain) => context.toolchain = toolchain,
            Err(e) => {
                self.diagnostics.error(&context.name, e.to_string());
                context.toolchain.name = CompilerSpec::parse(&compiler)?.name;
            }
        }
        Ok(())
    }

    /// Warn about `for-compiler` filters naming a compiler no registered
    /// toolchain provides. A misspelled name silently disables its node,
    /// so every filter value is checked against the known compilers.
    fn check_compiler_filter_spelling(&mut self, context: &Context) {
        let mut filters: BTreeSet<String> = BTreeSet::new();
        {
            let mut add = |value: &str| {
                for entry in value.split_whitespace() {
                    let name = entry.split('@').next().unwrap_or_default();
                    if !name.is_empty() {
                        filters.insert(name.to_string());
                    }
                }
            };
            let controls = &context.controls;
            let levels = [
                &controls.csolution,
                &controls.cproject,
                &controls.target_type,
                &controls.build_type,
            ]
            .into_iter()
            .chain(controls.setups.iter())
            .chain(controls.clayers.values());
            for level in levels {
                for misc in &level.misc {
                    if let Some(for_compiler) = &misc.for_compiler {
                        add(for_compiler);
                    }
                }
            }
            if let Some(cdefault) = self.cdefault() {
                for misc in &cdefault.default.misc {
                    if let Some(for_compiler) = &misc.for_compiler {
                        add(for_compiler);
                    }
                }
            }
            for setup in &context.cproject.project.setups {
                for for_compiler in &setup.for_compiler {
                    add(for_compiler);
                }
            }
            for linker in &context.cproject.project.linker {
                for for_compiler in &linker.for_compiler {
                    add(for_compiler);
                }
            }
            fn walk_groups(group: &GroupNode, add: &mut dyn FnMut(&str)) {
                for for_compiler in &group.for_compiler {
                    add(for_compiler);
                }
                for file in &group.files {
                    for for_compiler in &file.for_compiler {
                        add(for_compiler);
                    }
                }
                for nested in &group.groups {
                    walk_groups(nested, add);
                }
            }
            for group in &context.cproject.project.groups {
                walk_groups(group, &mut add);
            }
            for clayer in context.clayers.values() {
                for group in &clayer.layer.groups {
                    walk_groups(group, &mut add);
                }
                for linker in &clayer.layer.linker {
                    for for_compiler in &linker.for_compiler {
                        add(for_compiler);
                    }
                }
            }
        }
        if filters.is_empty() {
            return;
        }

        let mut known: BTreeSet<String> = self
            .toolchains
            .registered()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        known.insert(context.toolchain.name.clone());
        for compiler in &self.selectable_compilers {
            if let Ok(spec) = CompilerSpec::parse(compiler) {
                known.insert(spec.name);
            }
        }
        for name in filters {
            if !known.contains(&name) {
                self.diagnostics.warning(
                    &context.name,
                    format!("Compiler '{name}' is not supported"),
                );
            }
        }
    }

    fn apply_setups(&mut self, context: &mut Context) -> Result<()> {
        let compiler_name = CompilerSpec::parse(&context.compiler)?.name;
        let mut setups = Vec::new();
        for setup in &context.cproject.project.setups {
            if !context_filters_allow(
                &setup.for_context,
                &setup.not_for_context,
                &context.type_pair,
            ) {
                continue;
            }
            let compiler_ok = setup.for_compiler.is_empty()
                || setup
                    .for_compiler
                    .iter()
                    .any(|c| c.split('@').next() == Some(compiler_name.as_str()));
            if !compiler_ok {
                continue;
            }
            setups.push(setup.build.clone());
            if let Some(output) = &setup.output {
                if let Some(base_name) = &output.base_name {
                    context.output_base_name = base_name.clone();
                }
                if !output.types.is_empty() {
                    context.output_types = output.types.clone();
                }
            }
            context.linker_nodes.extend(setup.linker.iter().cloned());
        }
        context.controls.setups = setups;
        Ok(())
    }

    /// Parse the layers the project references by path; `$Variable$`
    /// references in layer paths resolve from the context variables.
    fn parse_context_layers(&mut self, context: &mut Context) -> Result<()> {
        for entry in context.cproject.project.layers.clone() {
            if entry.layer.is_empty() {
                continue;
            }
            if !context_filters_allow(
                &entry.for_context,
                &entry.not_for_context,
                &context.type_pair,
            ) {
                continue;
            }
            let mut layer_path = entry.layer.clone();
            for (key, value) in &context.variables {
                layer_path = layer_path.replace(&format!("${key}$"), value);
            }
            if layer_path.contains('$') {
                let variable = layer_path
                    .split('$')
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                context.undefined_variables.insert(variable.clone());
                if entry.optional {
                    self.diagnostics.warning(
                        &context.name,
                        format!("Layer variable '{variable}' is undefined"),
                    );
                    continue;
                }
                bail!("Layer variable '{variable}' is undefined");
            }
            let path = absolute_from(&context.cproject.directory, &layer_path);
            let key = self.parser.parse_clayer(&path)?;
            let item: ClayerItem = self.parser.clayers[&key].clone();
            context
                .controls
                .clayers
                .insert(key.clone(), item.layer.build.clone());
            context.clayers.insert(key, item);
        }
        Ok(())
    }

    /// Requirements come from the project and every resolved layer, each
    /// filtered by context.
    fn collect_component_requirements(&mut self, context: &mut Context) {
        let mut requirements = Vec::new();
        for component in &context.cproject.project.components {
            if context_filters_allow(
                &component.for_context,
                &component.not_for_context,
                &context.type_pair,
            ) {
                requirements.push((component.clone(), String::new()));
            }
        }
        for (key, clayer) in &context.clayers {
            for component in &clayer.layer.components {
                if context_filters_allow(
                    &component.for_context,
                    &component.not_for_context,
                    &context.type_pair,
                ) {
                    requirements.push((component.clone(), key.clone()));
                }
            }
        }
        context.component_requirements = requirements;
    }

    /// Run the lifecycle audit for every deployed configuration file.
    fn audit_config_files(&mut self, context: &mut Context) {
        let mut statuses = BTreeMap::new();
        for entries in context.config_files.values() {
            for entry in entries {
                let is_dbgconf = entry
                    .path
                    .extension()
                    .is_some_and(|e| e == "dbgconf");
                let audit = match plm::audit(&entry.path, &entry.version, is_dbgconf) {
                    Ok(audit) => audit,
                    Err(e) => {
                        self.diagnostics.error(&context.name, e.to_string());
                        continue;
                    }
                };
                if audit.multiple_sidecars {
                    self.diagnostics.warning(
                        &context.name,
                        format!(
                            "Multiple base or update files found for '{}'; PLM may fail",
                            entry.path.display()
                        ),
                    );
                }
                if let Some(status) = &audit.status {
                    let message = format!(
                        "Config file '{}': status '{status}'",
                        entry.path.display()
                    );
                    match audit.severity {
                        Some(PlmSeverity::Error) => {
                            self.diagnostics.error(&context.name, message)
                        }
                        _ => self.diagnostics.warning(&context.name, message),
                    }
                    statuses.insert(entry.path.to_string_lossy().to_string(), status.clone());
                }
            }
        }
        context.plm_status = statuses;
    }

    /// Output artefact names from base name, types and toolchain affixes.
    fn process_output_filenames(&mut self, context: &mut Context) -> Result<()> {
        if context.output_base_name.is_empty() {
            if let Some(output) = &context.cproject.project.output {
                context.output_base_name =
                    output.base_name.clone().unwrap_or_default();
                if context.output_types.is_empty() {
                    context.output_types = output.types.clone();
                }
            }
        }
        if context.output_base_name.is_empty() {
            context.output_base_name = context.project_name.clone();
        }
        if context.output_types.is_empty() {
            context.output_types = vec!["elf".to_string()];
        }
        let affixes = output_affixes(&context.toolchain.name);
        let base = context.output_base_name.clone();
        for output_type in context.output_types.clone() {
            let filename = match output_type.as_str() {
                "elf" => format!("{base}{}", affixes.elf),
                "lib" => format!("{}{base}{}", affixes.lib_prefix, affixes.lib),
                "hex" => format!("{base}.hex"),
                "bin" => format!("{base}.bin"),
                "cmse-lib" | "cmse" => format!("{base}_CMSE_Lib.o"),
                "map" => format!("{base}{}", affixes.map),
                other => {
                    self.diagnostics.warning(
                        &context.name,
                        format!("Unknown output type '{other}'"),
                    );
                    continue;
                }
            };
            context.outputs.insert(
                if output_type == "cmse-lib" {
                    "cmse".to_string()
                } else {
                    output_type.clone()
                },
                filename,
            );
        }
        ensure!(
            !(context.outputs.contains_key("elf") && context.outputs.contains_key("lib")),
            "Output types 'elf' and 'lib' are mutually exclusive"
        );
        // The map file accompanies an executable.
        if context.outputs.contains_key("elf") {
            context
                .outputs
                .entry("map".to_string())
                .or_insert(format!("{base}{}", affixes.map));
        }
        Ok(())
    }

    /// Filter groups and files by context and compiler, from the project
    /// and every resolved layer.
    fn process_groups(&mut self, context: &mut Context) -> Result<()> {
        let compiler_name = context.toolchain.name.clone();
        let mut groups = Vec::new();
        for group in &context.cproject.project.groups {
            if let Some(filtered) = filter_group(
                group,
                &context.type_pair,
                &compiler_name,
                &context.cproject.directory,
            ) {
                groups.push(filtered);
            }
        }
        for clayer in context.clayers.values() {
            for group in &clayer.layer.groups {
                if let Some(filtered) = filter_group(
                    group,
                    &context.type_pair,
                    &compiler_name,
                    &clayer.directory,
                ) {
                    groups.push(filtered);
                }
            }
        }
        let mut names = BTreeSet::new();
        for group in &groups {
            ensure!(
                names.insert(group.group.clone()),
                "Duplicate group name '{}'",
                group.group
            );
        }
        context.groups = groups;
        Ok(())
    }

    fn process_linker(&mut self, context: &mut Context) -> Result<()> {
        let compiler_name = context.toolchain.name.clone();
        let mut nodes: Vec<(LinkerNode, PathBuf)> = context
            .cproject
            .project
            .linker
            .iter()
            .map(|l| (l.clone(), context.cproject.directory.clone()))
            .collect();
        nodes.extend(
            context
                .linker_nodes
                .iter()
                .map(|l| (l.clone(), context.cproject.directory.clone())),
        );
        for clayer in context.clayers.values() {
            nodes.extend(
                clayer
                    .layer
                    .linker
                    .iter()
                    .map(|l| (l.clone(), clayer.directory.clone())),
            );
        }
        for (node, base) in nodes {
            if !context_filters_allow(
                &node.for_context,
                &node.not_for_context,
                &context.type_pair,
            ) {
                continue;
            }
            let compiler_ok = node.for_compiler.is_empty()
                || node
                    .for_compiler
                    .iter()
                    .any(|c| c.split('@').next() == Some(compiler_name.as_str()));
            if !compiler_ok {
                continue;
            }
            if node.auto {
                context.linker.auto = true;
            }
            if let Some(script) = &node.script {
                ensure!(
                    context.linker.script.is_empty(),
                    "Redefinition of 'linker: script' is not allowed"
                );
                context.linker.script =
                    crate::common::path_to_portable(&absolute_from(&base, script));
            }
            if let Some(regions) = &node.regions {
                ensure!(
                    context.linker.regions.is_empty(),
                    "Redefinition of 'linker: regions' is not allowed"
                );
                context.linker.regions =
                    crate::common::path_to_portable(&absolute_from(&base, regions));
            }
            for define in normalized_defines(&node.define) {
                if !context.linker.defines.contains(&define) {
                    context.linker.defines.push(define);
                }
            }
        }
        // Automatic script generation derives a regions header from the
        // device and board memories when none was given.
        if context.linker.auto && context.linker.regions.is_empty() && self.options.update_rte
        {
            let header_dir = crate::rte::context_header_dir(context);
            let regions = header_dir.join(format!(
                "regions_{}.h",
                context.device_item.name
            ));
            if !self.options.dry_run {
                let memories = self.device_memories(context);
                crate::common::write_file(
                    &regions,
                    &crate::rte::regions_header(&context.device_item.name, &memories),
                )?;
            }
            context.linker.regions = crate::common::path_to_portable(&regions);
            context.constructed_files.push(regions);
        }
        Ok(())
    }

    fn device_memories(&self, context: &Context) -> Vec<rtemodel::MemoryItem> {
        let mut memories = Vec::new();
        if let Some(device_pack_id) = &context.device_pack {
            if let Some(pack) = self.model.find_pack_by_id(device_pack_id) {
                if let Some(device) = pack
                    .devices
                    .iter()
                    .find(|d| d.name == context.device_item.name)
                {
                    memories.extend(device.memories.iter().cloned());
                }
            }
        }
        memories
    }

    fn process_executes(&mut self, context: &mut Context) {
        let mut executes = Vec::new();
        for execute in &context.cproject.project.executes {
            if context_filters_allow(
                &execute.for_context,
                &execute.not_for_context,
                &context.type_pair,
            ) {
                executes.push(execute.clone());
            }
        }
        context.executes = executes;
    }

    /// Strings that may carry cross-context output sequences.
    fn collect_context_refs(&self, context: &Context) -> Vec<String> {
        let mut refs = Vec::new();
        let mut scan = |value: &str| {
            for reference in sequences::find_context_refs(value) {
                if !refs.contains(&reference) {
                    refs.push(reference);
                }
            }
        };
        for execute in &context.executes {
            scan(&execute.run);
            execute.input.iter().for_each(|v| scan(v));
            execute.output.iter().for_each(|v| scan(v));
        }
        for execute in &self.solution_executes {
            scan(&execute.run);
            execute.input.iter().for_each(|v| scan(v));
            execute.output.iter().for_each(|v| scan(v));
        }
        fn scan_group(group: &GroupNode, scan: &mut dyn FnMut(&str)) {
            for file in &group.files {
                scan(&file.file);
            }
            for nested in &group.groups {
                scan_group(nested, scan);
            }
        }
        for group in &context.groups {
            scan_group(group, &mut scan);
        }
        scan(&context.linker.script);
        scan(&context.linker.regions);
        for define in &context.controls.processed.defines {
            scan(define);
        }
        for path in &context.controls.processed.add_paths {
            scan(path);
        }
        refs
    }

    /// Expand access sequences across the context's path-carrying fields
    /// and normalise them relative to the project directory.
    fn expand_sequences(&mut self, context: &mut Context) -> Result<()> {
        let mut groups = context.groups.clone();
        let mut linker_script = context.linker.script.clone();
        let mut linker_regions = context.linker.regions.clone();
        let mut executes = context.executes.clone();
        let mut defines = context.controls.processed.defines.clone();
        let mut add_paths = context.controls.processed.add_paths.clone();
        let mut add_paths_asm = context.controls.processed.add_paths_asm.clone();
        let mut used_packs = BTreeSet::new();
        let mut undefined = BTreeSet::new();

        {
            let env = ExpansionEnv {
                context: &*context,
                contexts: &self.contexts,
                model: &self.model,
                solution_name: &self.solution_name,
                solution_dir: &self.solution_dir,
            };
            fn expand_group(
                group: &mut GroupNode,
                env: &ExpansionEnv<'_>,
                base: &Path,
                used: &mut BTreeSet<String>,
                undefined: &mut BTreeSet<String>,
            ) -> Result<()> {
                for file in &mut group.files {
                    let expanded = sequences::expand(&file.file, env, used, undefined)?;
                    file.file = sequences::relative_to_dir(&expanded, base, true);
                }
                for nested in &mut group.groups {
                    expand_group(nested, env, base, used, undefined)?;
                }
                Ok(())
            }
            let base = context.cproject.directory.clone();
            for group in &mut groups {
                expand_group(group, &env, &base, &mut used_packs, &mut undefined)?;
            }
            linker_script =
                sequences::expand(&linker_script, &env, &mut used_packs, &mut undefined)?;
            linker_regions =
                sequences::expand(&linker_regions, &env, &mut used_packs, &mut undefined)?;
            for execute in &mut executes {
                execute.run =
                    sequences::expand(&execute.run, &env, &mut used_packs, &mut undefined)?;
                for input in &mut execute.input {
                    *input = sequences::expand(input, &env, &mut used_packs, &mut undefined)?;
                }
                for output in &mut execute.output {
                    *output =
                        sequences::expand(output, &env, &mut used_packs, &mut undefined)?;
                }
            }
            for define in &mut defines {
                *define = sequences::expand(define, &env, &mut used_packs, &mut undefined)?;
            }
            for path in &mut add_paths {
                let expanded = sequences::expand(path, &env, &mut used_packs, &mut undefined)?;
                *path =
                    sequences::relative_to_dir(&expanded, &context.cproject.directory, false);
            }
            for path in &mut add_paths_asm {
                let expanded = sequences::expand(path, &env, &mut used_packs, &mut undefined)?;
                *path =
                    sequences::relative_to_dir(&expanded, &context.cproject.directory, false);
            }
        }

        context.groups = groups;
        context.linker.script = linker_script;
        context.linker.regions = linker_regions;
        context.executes = executes;
        context.controls.processed.defines = defines;
        context.controls.processed.add_paths = add_paths;
        context.controls.processed.add_paths_asm = add_paths_asm;
        for id in used_packs {
            context.resolved_pack_ids.insert(id.clone());
            if let Some(pack) = self.model.find_pack_by_id(&id) {
                context.pack_paths.insert(id, pack.path.clone());
            }
        }
        for variable in undefined {
            context.undefined_variables.insert(variable.clone());
            self.diagnostics.warning(
                &context.name,
                format!("Variable '{variable}' is undefined"),
            );
        }
        Ok(())
    }

    /// Loaded packs the context resolved but did not use.
    fn collect_unused_packs(&mut self, context: &mut Context) {
        let mut used: BTreeSet<String> = context
            .components
            .values()
            .map(|entry| entry.selected.pack_id.to_string())
            .collect();
        if let Some(device_pack) = &context.device_pack {
            used.insert(device_pack.clone());
        }
        if let Some(board_pack) = &context.board_pack {
            used.insert(board_pack.clone());
        }
        context.unused_packs = context
            .resolved_pack_ids
            .iter()
            .filter(|id| !used.contains(*id))
            .filter(|id| !context.local_pack_paths.contains(*id))
            .cloned()
            .collect();
    }

    /// Emit every artefact for the processed contexts.
    pub fn emit_artefacts(&mut self) -> Result<()> {
        if self.options.dry_run {
            return Ok(());
        }
        let solution_path = self.csolution().path.clone();
        let mut cbuild_paths = BTreeMap::new();
        let selected = self.selected_contexts.clone();
        for name in &selected {
            let mut context = self.contexts.remove(name).expect("known context");
            let result = emit::emit_cbuild(
                &mut context,
                &solution_path,
                None,
                &self.diagnostics,
            );
            match result {
                Ok(path) => {
                    cbuild_paths.insert(name.clone(), path);
                }
                Err(e) => self.diagnostics.error(name, e.to_string()),
            }
            self.contexts.insert(name.clone(), context);
        }

        // Generator payloads.
        let mut gen_paths = BTreeMap::new();
        for name in &selected {
            let mut context = self.contexts.remove(name).expect("known context");
            if !context.generators.is_empty() {
                match emit::emit_cbuild_gens(&mut context, &solution_path, &self.diagnostics)
                {
                    Ok(paths) => {
                        gen_paths.insert(name.clone(), paths);
                    }
                    Err(e) => self.diagnostics.error(name, e.to_string()),
                }
            }
            self.contexts.insert(name.clone(), context);
        }

        self.emit_pack_lock()?;
        self.expand_solution_executes();

        let cdefault_path = self.cdefault().map(|c| c.path.clone());
        let csolution = self.csolution().clone();
        let ordered_selected: Vec<String> = self
            .ordered_contexts
            .iter()
            .filter(|name| self.selected_contexts.contains(name))
            .cloned()
            .collect();
        let selectable: &[String] = if self.selected_compiler.is_empty() {
            &self.selectable_compilers
        } else {
            &[]
        };
        let inputs = emit::IdxInputs {
            csolution: &csolution,
            cdefault_path: cdefault_path.as_deref(),
            output_dir: &self.output_dir,
            ordered_context_names: &ordered_selected,
            selectable_compilers: selectable,
            executes: &self.solution_executes,
        };
        emit::emit_cbuild_idx(&inputs, &self.contexts, &cbuild_paths, &self.diagnostics)?;

        emit::emit_cbuild_gen_idx(
            &self.output_dir,
            &self.solution_name,
            &self.contexts,
            &gen_paths,
            &ordered_selected,
        )?;

        if self.options.use_context_set {
            emit::emit_cbuild_set(
                &self.output_dir,
                &self.solution_name,
                &self.selected_contexts,
                &self.selected_compiler,
            )?;
        }

        self.emit_run_artefacts(&solution_path)?;
        Ok(())
    }

    /// Expand access sequences in solution-level executes before the
    /// index is emitted; no `$...$` literal may survive into an artefact.
    fn expand_solution_executes(&mut self) {
        let Some(first) = self
            .selected_contexts
            .iter()
            .find(|name| self.contexts.contains_key(*name))
            .cloned()
        else {
            return;
        };
        let mut executes = self.solution_executes.clone();
        let mut used_packs = BTreeSet::new();
        let mut undefined = BTreeSet::new();
        {
            let env = ExpansionEnv {
                context: &self.contexts[&first],
                contexts: &self.contexts,
                model: &self.model,
                solution_name: &self.solution_name,
                solution_dir: &self.solution_dir,
            };
            for execute in &mut executes {
                let values = std::iter::once(&mut execute.run)
                    .chain(execute.input.iter_mut())
                    .chain(execute.output.iter_mut());
                for value in values {
                    if let Ok(expanded) =
                        sequences::expand(value, &env, &mut used_packs, &mut undefined)
                    {
                        *value = expanded;
                    }
                }
            }
        }
        for variable in undefined {
            self.diagnostics.warning(
                SOLUTION_SCOPE,
                format!("Variable '{variable}' is undefined"),
            );
        }
        self.solution_executes = executes;
    }

    /// The pack lockfile: seeded from disk unless refreshed, extended by
    /// every pack a selected component maps to and every user
    /// expression, minus project-local paths.
    fn emit_pack_lock(&mut self) -> Result<()> {
        let path = self
            .solution_dir
            .join(format!("{}.cbuild-pack.yml", self.solution_name));
        let seed = self.parser.parse_cbuild_pack(&path)?;
        ensure!(
            !(self.options.frozen_packs && seed.is_none()),
            "The file '{}' is required when running with frozen packs",
            path.display()
        );

        let mut entries: BTreeMap<String, PackLockEntry> = BTreeMap::new();
        for name in &self.selected_contexts {
            let Some(context) = self.contexts.get(name) else {
                continue;
            };
            for entry in context.components.values() {
                let id = entry.selected.pack_id.to_string();
                if context.local_pack_paths.contains(&id) {
                    continue;
                }
                let slot = entries.entry(id.clone()).or_insert_with(|| PackLockEntry {
                    resolved_pack: id.clone(),
                    ..Default::default()
                });
                let expression = entry.selected.selected_by.clone();
                if !slot.selected_by.contains(&expression) {
                    slot.selected_by.push(expression);
                }
            }
            for (expression, resolved) in &context.user_pack_to_resolved {
                for id in resolved {
                    if context.local_pack_paths.contains(id) {
                        continue;
                    }
                    let slot =
                        entries.entry(id.clone()).or_insert_with(|| PackLockEntry {
                            resolved_pack: id.clone(),
                            ..Default::default()
                        });
                    if !slot.selected_by_pack.contains(expression) {
                        slot.selected_by_pack.push(expression.clone());
                    }
                }
            }
        }
        let entries: Vec<PackLockEntry> = entries.into_values().collect();
        emit::emit_cbuild_pack(
            &self.solution_dir,
            &self.solution_name,
            seed.as_ref(),
            &entries,
        )?;
        Ok(())
    }

    /// Emit the run/debug payload for the active target set.
    fn emit_run_artefacts(&mut self, solution_path: &Path) -> Result<()> {
        let Some(active) = self.options.active_target_set.clone() else {
            return Ok(());
        };
        let (target_type, set_name) = match active.split_once('@') {
            Some((target, set)) => (target.to_string(), set.to_string()),
            None => (active.clone(), String::new()),
        };
        let contexts: Vec<&Context> = self
            .ordered_contexts
            .iter()
            .filter(|name| self.selected_contexts.contains(name))
            .filter_map(|name| self.contexts.get(name))
            .filter(|context| context.type_pair.target == target_type)
            .collect();
        ensure!(
            !contexts.is_empty(),
            "No selected context matches target type '+{target_type}'"
        );
        let target_set = contexts
            .iter()
            .flat_map(|context| context.target_set.iter())
            .find(|set| set.set == set_name)
            .cloned()
            .unwrap_or_default();
        emit::emit_cbuild_run(
            &self.output_dir,
            &self.solution_name,
            solution_path,
            &target_type,
            &target_set,
            &contexts,
            &self.model,
            &self.parser.debug_adapters,
        )?;
        Ok(())
    }

    /// The full convert flow. Returns true when no error was recorded.
    pub fn convert(&mut self) -> Result<bool> {
        self.parse_context_selection()?;
        self.load_packs()?;
        let ok = self.process_contexts();
        self.emit_artefacts()?;
        Ok(ok && !self.diagnostics.has_errors())
    }

    pub fn solution_name(&self) -> &str {
        &self.solution_name
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn selected_compiler(&self) -> &str {
        &self.selected_compiler
    }

    pub fn selected_components(&self, context: &str) -> Vec<&SelectedEntry> {
        self.contexts
            .get(context)
            .map(|c| c.components.values().collect())
            .unwrap_or_default()
    }
}

/// Parse a user pack expression `vendor::name[@ver | @>=ver]`.
pub fn parse_pack_expression(value: &str) -> Result<PackSpec> {
    let (id, range) = match value.split_once('@') {
        None => (value, VersionRange::any()),
        Some((id, version)) => {
            let range = match version.strip_prefix(">=") {
                Some(min) => VersionRange::from_min(rtemodel::parse_lenient(min)?),
                None => VersionRange::exact(rtemodel::parse_lenient(version)?),
            };
            (id, range)
        }
    };
    let Some((vendor, name)) = id.split_once("::") else {
        bail!("Invalid pack expression '{value}', expected 'vendor::name[@version]'");
    };
    ensure!(
        !vendor.is_empty() && !name.is_empty(),
        "Invalid pack expression '{value}', expected 'vendor::name[@version]'"
    );
    Ok(PackSpec {
        vendor: vendor.to_string(),
        name: name.to_string(),
        version_range: range,
    })
}

/// Context- and compiler-filter a group tree, resolving file paths
/// against its origin directory.
fn filter_group(
    group: &GroupNode,
    type_pair: &crate::context::TypePair,
    compiler_name: &str,
    base: &Path,
) -> Option<GroupNode> {
    if !context_filters_allow(&group.for_context, &group.not_for_context, type_pair) {
        return None;
    }
    let compiler_ok = group.for_compiler.is_empty()
        || group
            .for_compiler
            .iter()
            .any(|c| c.split('@').next() == Some(compiler_name));
    if !compiler_ok {
        return None;
    }
    let mut out = group.clone();
    out.files = group
        .files
        .iter()
        .filter(|file| {
            context_filters_allow(&file.for_context, &file.not_for_context, type_pair)
        })
        .filter(|file| {
            file.for_compiler.is_empty()
                || file
                    .for_compiler
                    .iter()
                    .any(|c| c.split('@').next() == Some(compiler_name))
        })
        .cloned()
        .map(|mut file: FileNode| {
            if !file.file.contains('$') {
                file.file =
                    crate::common::path_to_portable(&absolute_from(base, &file.file));
            }
            file
        })
        .collect();
    out.groups = group
        .groups
        .iter()
        .filter_map(|nested| filter_group(nested, type_pair, compiler_name, base))
        .collect();
    if out.files.is_empty() && out.groups.is_empty() {
        return None;
    }
    Some(out)
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("solution", &self.solution_name)
            .field("contexts", &self.ordered_contexts)
            .field("selected", &self.selected_contexts)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{fixture, fixture_with, write, PROJECT_YML, SOLUTION_YML};

    #[test]
    fn contexts_are_enumerated_in_source_order() {
        let fixture = fixture();
        let worker = Worker::new(fixture.worker_options()).unwrap();
        assert_eq!(
            worker.ordered_contexts,
            vec![
                "Hello.Debug+A",
                "Hello.Debug+B",
                "Hello.Release+A",
                "Hello.Release+B"
            ]
        );
    }

    #[test]
    fn context_selectors_filter_and_keep_order() {
        let fixture = fixture();
        let mut options = fixture.worker_options();
        options.context_selectors = vec!["+A".to_string()];
        let mut worker = Worker::new(options).unwrap();
        worker.parse_context_selection().unwrap();
        assert_eq!(
            worker.selected_contexts,
            vec!["Hello.Debug+A", "Hello.Release+A"]
        );

        let mut options = fixture.worker_options();
        options.context_selectors = vec!["Hello.Nope+A".to_string()];
        let mut worker = Worker::new(options).unwrap();
        assert!(worker.parse_context_selection().is_err());
    }

    #[test]
    fn convert_emits_artefacts_and_is_idempotent() {
        let fixture = fixture();
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        let ok = worker.convert().unwrap();
        assert!(ok, "first run reported errors");

        let idx = fixture.solution_dir.join("Hello.cbuild-idx.yml");
        let lock = fixture.solution_dir.join("Hello.cbuild-pack.yml");
        assert!(idx.is_file());
        assert!(lock.is_file());
        let cbuild = fixture
            .solution_dir
            .join("tmp/Hello/A/Debug/Hello.Debug+A.cbuild.yml");
        assert!(cbuild.is_file(), "missing {}", cbuild.display());

        let first_idx = std::fs::read_to_string(&idx).unwrap();
        let first_cbuild = std::fs::read_to_string(&cbuild).unwrap();
        let first_lock = std::fs::read_to_string(&lock).unwrap();

        // Re-running on its own output leaves every artefact byte-equal.
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        let ok = worker.convert().unwrap();
        assert!(ok);
        assert_eq!(std::fs::read_to_string(&idx).unwrap(), first_idx);
        assert_eq!(std::fs::read_to_string(&cbuild).unwrap(), first_cbuild);
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), first_lock);
    }

    #[test]
    fn context_filtered_file_appears_only_in_matching_cbuilds() {
        let fixture = fixture();
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        assert!(worker.convert().unwrap());

        let for_a = std::fs::read_to_string(
            fixture
                .solution_dir
                .join("tmp/Hello/A/Debug/Hello.Debug+A.cbuild.yml"),
        )
        .unwrap();
        let for_b = std::fs::read_to_string(
            fixture
                .solution_dir
                .join("tmp/Hello/B/Debug/Hello.Debug+B.cbuild.yml"),
        )
        .unwrap();
        assert!(for_a.contains("only_a.c"), "{for_a}");
        assert!(!for_b.contains("only_a.c"), "{for_b}");
        assert!(for_a.contains("main.c"));
        assert!(for_b.contains("main.c"));
    }

    #[test]
    fn selected_components_and_pack_lock() {
        let fixture = fixture();
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        assert!(worker.convert().unwrap());

        let context = &worker.contexts["Hello.Debug+A"];
        assert_eq!(context.components.len(), 2);
        assert!(context
            .components
            .values()
            .any(|e| e.selected.component.full_id() == "ARM::RteTest:CORE@0.1.1"));

        let lock = std::fs::read_to_string(
            fixture.solution_dir.join("Hello.cbuild-pack.yml"),
        )
        .unwrap();
        assert!(lock.contains("resolved-pack: ARM::RteTest_DFP@0.2.0"), "{lock}");
        assert!(lock.contains("- ARM::RteTest_DFP"), "{lock}");
    }

    #[test]
    fn rte_directory_is_updated() {
        let fixture = fixture();
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        assert!(worker.convert().unwrap());

        let rte = fixture.solution_dir.join("RTE");
        let config = rte.join("RteTest").join("system.c");
        assert!(config.is_file(), "config file was not deployed");
        assert!(
            config
                .with_file_name("system.c.base@1.0.0")
                .is_file(),
            "base side-car missing"
        );
        let header = rte.join("_Debug_A").join("RTE_Components.h");
        let content = std::fs::read_to_string(&header).unwrap();
        assert!(content.contains("#define RTE_TEST_CORE"), "{content}");
        assert!(content.contains("CMSIS_device_header"), "{content}");
    }

    #[test]
    fn misspelled_for_compiler_filter_warns() {
        let project = r#"
project:
  components:
    - component: RteTest:CORE
  groups:
    - group: Source
      files:
        - file: ./main.c
        - file: ./only_a.c
          for-compiler: IRA
  setups:
    - setup: AC6 options
      for-compiler: AC6
      misc:
        - C: [-fshort-enums]
"#;
        let fixture = fixture_with(SOLUTION_YML, project);
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        let ok = worker.convert().unwrap();
        // A misspelled filter only disables its node; the run succeeds.
        assert!(ok, "a misspelled for-compiler must not fail the run");

        let streams = worker
            .diagnostics
            .context_messages("Hello.Debug+A")
            .expect("context messages");
        assert!(
            streams
                .warnings
                .iter()
                .any(|w| w.contains("Compiler 'IRA' is not supported")),
            "{streams:?}"
        );
        // The registered compiler never trips the check.
        assert!(
            !streams.warnings.iter().any(|w| w.contains("'AC6'")),
            "{streams:?}"
        );
    }

    #[test]
    fn missing_device_is_a_context_error() {
        let solution = r#"
solution:
  compiler: AC6
  packs:
    - pack: ARM::RteTest_DFP
  target-types:
    - type: A
      device: NoSuchDevice
  build-types:
    - type: Debug
  projects:
    - project: ./Hello.cproject.yml
"#;
        let fixture = fixture_with(solution, PROJECT_YML);
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        let ok = worker.convert().unwrap();
        assert!(!ok);
        let streams = worker
            .diagnostics
            .context_messages("Hello.Debug+A")
            .unwrap();
        assert!(
            streams.errors.iter().any(|e| e.contains("NoSuchDevice")),
            "{streams:?}"
        );
    }

    #[test]
    fn board_based_target_resolution() {
        let solution = r#"
solution:
  compiler: AC6
  packs:
    - pack: ARM::RteTest_DFP
  target-types:
    - type: A
      board: Keil::RteTest board
  build-types:
    - type: Debug
  projects:
    - project: ./Hello.cproject.yml
"#;
        let fixture = fixture_with(solution, PROJECT_YML);
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        assert!(worker.convert().unwrap());
        let context = &worker.contexts["Hello.Debug+A"];
        assert_eq!(context.device_item.name, "RteTest_ARMCM3");
        assert_eq!(context.board, "Keil::RteTest board:Rev1");
    }

    #[test]
    fn cross_context_sequence_creates_dependency() {
        let solution = r#"
solution:
  compiler: AC6
  packs:
    - pack: ARM::RteTest_DFP
  target-types:
    - type: A
      device: RteTest_ARMCM3
  projects:
    - project: ./Boot.cproject.yml
    - project: ./Hello.cproject.yml
"#;
        let fixture = fixture_with(solution, PROJECT_YML);
        write(
            &fixture.solution_dir.join("Boot.cproject.yml"),
            r#"
project:
  components:
    - component: RteTest:CORE
  groups:
    - group: Source
      files:
        - file: ./main.c
"#,
        );
        // Reference the sibling's artefact from an executes node.
        write(
            &fixture.solution_dir.join("Hello.cproject.yml"),
            r#"
project:
  components:
    - component: RteTest:CORE
  groups:
    - group: Source
      files:
        - file: ./main.c
  executes:
    - execute: SignBoot
      run: sign $Elf(Boot+A)$
"#,
        );
        let mut worker = Worker::new(fixture.worker_options()).unwrap();
        assert!(worker.convert().unwrap());
        let context = &worker.contexts["Hello+A"];
        assert_eq!(context.depends_on, vec!["Boot+A"]);
        let run = &context.executes[0].run;
        assert!(run.contains("Boot.axf"), "{run}");
        assert!(!run.contains('$'), "unexpanded sequence in '{run}'");
    }

    #[test]
    fn pack_expression_forms() {
        let spec = parse_pack_expression("ARM::CMSIS").unwrap();
        assert!(spec.version_range.is_any());

        let spec = parse_pack_expression("ARM::CMSIS@>=5.5.0").unwrap();
        assert_eq!(spec.vendor, "ARM");
        assert_eq!(spec.name, "CMSIS");
        assert!(spec
            .version_range
            .contains(&semver::Version::new(6, 0, 0)));

        let spec = parse_pack_expression("ARM::CMSIS@5.9.0").unwrap();
        assert!(spec.version_range.is_exact());

        assert!(parse_pack_expression("CMSIS").is_err());
    }
}
