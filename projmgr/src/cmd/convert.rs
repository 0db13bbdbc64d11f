use crate::worker::{Worker, WorkerOptions};
use anyhow::{ensure, Result};
use clap::Parser;
use rtemodel::LoadPacksPolicy;
use std::path::PathBuf;

/// Convert a csolution into cbuild artefacts for the build backend.
#[derive(Debug, Parser)]
pub struct Convert {
    /// Path to the `<name>.csolution.yml` input file.
    pub solution: PathBuf,

    /// Process only the matching contexts; the glob form is
    /// `project[.build-type][+target-type]`. May be given multiple times.
    #[clap(long = "context", short = 'c')]
    pub context: Vec<String>,

    /// Persist and reuse the context selection through
    /// `<name>.cbuild-set.yml`.
    #[clap(long = "context-set", short = 'S')]
    pub context_set: bool,

    /// Select the toolchain, `name[@version | @>=version]`.
    #[clap(long = "toolchain", short = 't')]
    pub toolchain: Option<String>,

    /// The active target set, `<target-type>[@<set>]`, for the run/debug
    /// artefact.
    #[clap(long = "active", short = 'a')]
    pub active: Option<String>,

    /// Output directory for the generated artefacts.
    #[clap(long = "output", short = 'o')]
    pub output: Option<PathBuf>,

    /// Pack loading policy.
    #[clap(long = "load-packs-policy", short = 'l', default_value = "default")]
    pub load_packs_policy: String,

    /// Skip the structural schema check of the input files.
    #[clap(long = "no-check-schema")]
    pub no_check_schema: bool,

    /// Skip updating the RTE directory.
    #[clap(long = "no-update-rte")]
    pub no_update_rte: bool,

    /// Process everything but write no file.
    #[clap(long = "dry-run", short = 'n')]
    pub dry_run: bool,

    /// Require the pack versions recorded in `<name>.cbuild-pack.yml`.
    #[clap(long = "frozen-packs")]
    pub frozen_packs: bool,

    /// Search path for generic clayer files.
    #[clap(long = "clayer-path")]
    pub clayer_path: Option<PathBuf>,

    /// Override the pack root directory.
    #[clap(long = "pack-root", env = "CMSIS_PACK_ROOT", hide_env_values = true)]
    pub pack_root: Option<PathBuf>,
}

impl Convert {
    pub fn run(&self) -> Result<()> {
        let policy: LoadPacksPolicy = self
            .load_packs_policy
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;
        let mut options = WorkerOptions::new(&self.solution);
        options.context_selectors = self.context.clone();
        options.use_context_set = self.context_set;
        options.toolchain = self.toolchain.clone();
        options.active_target_set = self.active.clone();
        options.output_dir = self.output.clone();
        options.load_policy = policy;
        options.check_schema = !self.no_check_schema;
        options.update_rte = !self.no_update_rte;
        options.dry_run = self.dry_run;
        options.frozen_packs = self.frozen_packs;
        options.clayer_search_path = self.clayer_path.clone();
        options.pack_root = self.pack_root.clone();

        let mut worker = Worker::new(options)?;
        let ok = worker.convert()?;
        ensure!(ok, "Processing failed, see the error messages above");
        Ok(())
    }
}
