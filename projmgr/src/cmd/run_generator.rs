use crate::generator;
use crate::worker::{Worker, WorkerOptions};
use anyhow::{bail, ensure, Result};
use clap::Parser;
use std::path::PathBuf;

/// Run a generator for one context: emit the generator input artefacts
/// and launch the generator executable.
#[derive(Debug, Parser)]
pub struct RunGenerator {
    /// Path to the `<name>.csolution.yml` input file.
    pub solution: PathBuf,

    /// The generator identifier.
    #[clap(long = "generator", short = 'g')]
    pub generator: String,

    /// The context to run the generator for.
    #[clap(long = "context", short = 'c')]
    pub context: Vec<String>,

    /// Process everything but launch nothing.
    #[clap(long = "dry-run", short = 'n')]
    pub dry_run: bool,

    /// Override the pack root directory.
    #[clap(long = "pack-root", env = "CMSIS_PACK_ROOT", hide_env_values = true)]
    pub pack_root: Option<PathBuf>,
}

impl RunGenerator {
    pub fn run(&self) -> Result<()> {
        let mut options = WorkerOptions::new(&self.solution);
        options.context_selectors = self.context.clone();
        options.pack_root = self.pack_root.clone();
        options.update_rte = false;
        let mut worker = Worker::new(options)?;
        let ok = worker.convert()?;
        ensure!(ok, "Processing failed, see the error messages above");

        let selected = worker.selected_contexts.clone();
        for name in &selected {
            let Some(context) = worker.contexts.get(name) else {
                continue;
            };
            let Some(entry) = context.generators.get(&self.generator) else {
                continue;
            };
            if self.dry_run {
                log::info!(
                    "Would run generator '{}' for context '{name}'",
                    self.generator
                );
                return Ok(());
            }
            let run = generator::launch(
                &entry.command,
                &entry.arguments,
                &entry.working_dir,
            )?;
            ensure!(
                run.success(),
                "Generator '{}' failed with exit code {}:\n{}",
                self.generator,
                run.exit_code,
                run.output
            );
            return Ok(());
        }
        bail!(
            "Generator '{}' is not used by any selected context",
            self.generator
        );
    }
}
