use crate::worker::{Worker, WorkerOptions};
use anyhow::{Context as _, Result};
use clap::Parser;
use rtemodel::{LoadPacksPolicy, PackFilter, PackRegistry, RteModel};
use std::path::PathBuf;

/// Options shared by listings that work on the installed environment and
/// optionally restrict to a solution.
#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Path to a `<name>.csolution.yml` file restricting the listing.
    pub solution: Option<PathBuf>,

    /// Words to filter the results.
    #[clap(long = "filter", short = 'f')]
    pub filter: Option<String>,

    /// Override the pack root directory.
    #[clap(long = "pack-root", env = "CMSIS_PACK_ROOT", hide_env_values = true)]
    pub pack_root: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum ListCommand {
    /// List installed packs.
    Packs(ListArgs),
    /// List devices of the installed packs.
    Devices(ListArgs),
    /// List boards of the installed packs.
    Boards(ListArgs),
    /// List components of the installed packs.
    Components(ListArgs),
    /// List unresolved dependencies of the selected contexts.
    Dependencies(ListArgs),
    /// List the contexts of a solution.
    Contexts(ListArgs),
    /// List generators used by the selected contexts.
    Generators(ListArgs),
    /// List compatible layers per context.
    Layers(ListArgs),
    /// List registered toolchains.
    Toolchains(ListArgs),
    /// List the environment configuration.
    Environment(ListArgs),
}

impl ListCommand {
    pub fn run(&self) -> Result<()> {
        match self {
            ListCommand::Packs(args) => list_packs(args),
            ListCommand::Devices(args) => list_devices(args),
            ListCommand::Boards(args) => list_boards(args),
            ListCommand::Components(args) => list_components(args),
            ListCommand::Dependencies(args) => list_dependencies(args),
            ListCommand::Contexts(args) => list_contexts(args),
            ListCommand::Generators(args) => list_generators(args),
            ListCommand::Layers(args) => list_layers(args),
            ListCommand::Toolchains(args) => list_toolchains(args),
            ListCommand::Environment(args) => list_environment(args),
        }
    }
}

fn print_filtered(lines: Vec<String>, filter: &Option<String>) {
    for line in lines {
        let matched = match filter {
            None => true,
            Some(filter) => filter
                .split_whitespace()
                .all(|word| line.contains(word)),
        };
        if matched {
            println!("{line}");
        }
    }
}

fn pack_root(args: &ListArgs) -> Result<PathBuf> {
    args.pack_root
        .clone()
        .or_else(|| std::env::var_os("CMSIS_PACK_ROOT").map(PathBuf::from))
        .context("CMSIS_PACK_ROOT is not set and no pack root was given")
}

/// Load the latest of every installed pack for environment listings.
fn environment_model(args: &ListArgs) -> Result<RteModel> {
    let registry = PackRegistry::new(pack_root(args)?);
    let packs = registry.load(LoadPacksPolicy::Latest, &[])?;
    Ok(RteModel::new(packs))
}

fn solution_worker(args: &ListArgs) -> Result<Option<Worker>> {
    let Some(solution) = &args.solution else {
        return Ok(None);
    };
    let mut options = WorkerOptions::new(solution);
    options.pack_root = args.pack_root.clone();
    options.update_rte = false;
    options.dry_run = true;
    let mut worker = Worker::new(options)?;
    worker.parse_context_selection()?;
    worker.load_packs()?;
    Ok(Some(worker))
}

fn list_packs(args: &ListArgs) -> Result<()> {
    let registry = PackRegistry::new(pack_root(args)?);
    let mut lines: Vec<String> = registry
        .installed_pdsc_files()?
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    lines.sort();
    lines.dedup();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_devices(args: &ListArgs) -> Result<()> {
    let model = environment_model(args)?;
    let mut lines = Vec::new();
    for device in model.devices() {
        for processor in &device.device.processors {
            let mut line =
                format!("{}::{}", device.device.vendor, device.device.name);
            if !processor.pname.is_empty() {
                line.push(':');
                line.push_str(&processor.pname);
            }
            line.push_str(&format!(" ({})", device.pack.id));
            lines.push(line);
        }
    }
    lines.sort();
    lines.dedup();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_boards(args: &ListArgs) -> Result<()> {
    let model = environment_model(args)?;
    let mut lines: Vec<String> = model
        .boards()
        .map(|b| format!("{} ({})", b.board.full_name(), b.pack.id))
        .collect();
    lines.sort();
    lines.dedup();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_components(args: &ListArgs) -> Result<()> {
    let lines = match solution_worker(args)? {
        Some(mut worker) => {
            let mut lines = Vec::new();
            let names = worker.selected_contexts.clone();
            worker.process_contexts();
            for name in &names {
                let Some(context) = worker.contexts.get(name) else {
                    continue;
                };
                let filter = PackFilter::restricted(
                    context.resolved_pack_ids.iter().cloned(),
                );
                for (id, component) in worker
                    .model()
                    .filtered_components(&context.target_attributes, &filter)
                {
                    lines.push(format!("{id} ({})", component.pack.id));
                }
            }
            lines
        }
        None => {
            let model = environment_model(args)?;
            model
                .filtered_components(&Default::default(), &PackFilter::all())
                .iter()
                .map(|(id, component)| format!("{id} ({})", component.pack.id))
                .collect()
        }
    };
    let mut lines = lines;
    lines.sort();
    lines.dedup();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_dependencies(args: &ListArgs) -> Result<()> {
    let Some(mut worker) = solution_worker(args)? else {
        anyhow::bail!("'list dependencies' needs a csolution file");
    };
    worker.process_contexts();
    let mut lines = Vec::new();
    for (name, context) in &worker.contexts {
        for result in &context.validation_results {
            if result.result >= rtemodel::ConditionResult::Fulfilled {
                continue;
            }
            lines.push(format!(
                "{name}: {} {:?} [{}]",
                result.component_id,
                result.result,
                result.expressions.join("; ")
            ));
        }
    }
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_contexts(args: &ListArgs) -> Result<()> {
    let Some(solution) = &args.solution else {
        anyhow::bail!("'list contexts' needs a csolution file");
    };
    let mut options = WorkerOptions::new(solution);
    options.pack_root = args.pack_root.clone();
    let worker = Worker::new(options)?;
    print_filtered(worker.ordered_contexts.clone(), &args.filter);
    Ok(())
}

fn list_generators(args: &ListArgs) -> Result<()> {
    let Some(mut worker) = solution_worker(args)? else {
        anyhow::bail!("'list generators' needs a csolution file");
    };
    worker.process_contexts();
    let mut lines = Vec::new();
    for context in worker.contexts.values() {
        for generator in context.generators.values() {
            lines.push(format!(
                "{} ({}) used by {}",
                generator.id,
                generator.from_pack,
                context.name
            ));
        }
    }
    lines.sort();
    lines.dedup();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_layers(args: &ListArgs) -> Result<()> {
    let Some(mut worker) = solution_worker(args)? else {
        anyhow::bail!("'list layers' needs a csolution file");
    };
    worker.process_contexts();
    let mut lines = Vec::new();
    for (name, context) in &worker.contexts {
        for (layer_type, layers) in &context.compatible_layers {
            for layer in layers {
                let sets = context
                    .layer_sets
                    .get(layer)
                    .map(|sets| {
                        sets.iter().cloned().collect::<Vec<_>>().join(", ")
                    })
                    .unwrap_or_default();
                let mut line = format!("{name}: {layer} (layer type: {layer_type})");
                if !sets.is_empty() {
                    line.push_str(&format!(" [{sets}]"));
                }
                lines.push(line);
            }
        }
    }
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_toolchains(args: &ListArgs) -> Result<()> {
    let compiler_root = std::env::var_os("CMSIS_COMPILER_ROOT")
        .map(PathBuf::from)
        .or_else(|| pack_root(args).ok().map(|root| root.join("..").join("etc")))
        .unwrap_or_default();
    let registry =
        crate::toolchain::ToolchainRegistry::discover(std::env::vars(), compiler_root);
    let lines: Vec<String> = registry
        .list()
        .iter()
        .map(|t| format!("{}@{} ({})", t.name, t.version, t.config))
        .collect();
    print_filtered(lines, &args.filter);
    Ok(())
}

fn list_environment(args: &ListArgs) -> Result<()> {
    let pack_root = pack_root(args)
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let compiler_root = std::env::var("CMSIS_COMPILER_ROOT").unwrap_or_default();
    println!("cmsis_pack_root={pack_root}");
    println!("cmsis_compiler_root={compiler_root}");
    Ok(())
}
