use crate::worker::{Worker, WorkerOptions};
use anyhow::{ensure, Result};
use clap::Parser;
use std::path::PathBuf;

/// Update the RTE directory: deploy configuration files and regenerate
/// the derived headers, then refresh the build plans.
#[derive(Debug, Parser)]
pub struct UpdateRte {
    /// Path to the `<name>.csolution.yml` input file.
    pub solution: PathBuf,

    /// Process only the matching contexts.
    #[clap(long = "context", short = 'c')]
    pub context: Vec<String>,

    /// Override the pack root directory.
    #[clap(long = "pack-root", env = "CMSIS_PACK_ROOT", hide_env_values = true)]
    pub pack_root: Option<PathBuf>,
}

impl UpdateRte {
    pub fn run(&self) -> Result<()> {
        let mut options = WorkerOptions::new(&self.solution);
        options.context_selectors = self.context.clone();
        options.pack_root = self.pack_root.clone();
        options.update_rte = true;
        let mut worker = Worker::new(options)?;
        let ok = worker.convert()?;
        ensure!(ok, "Processing failed, see the error messages above");
        Ok(())
    }
}
