//! External generator invocation.
//!
//! Generators are opaque executables declared by packs. Launching one is a
//! blocking call; stdout and stderr are captured line-wise and handed back
//! together with the exit code.

use anyhow::{Context as _, Result};
use duct::cmd;
use log::{debug, info};
use std::path::Path;

/// Outcome of one generator run.
#[derive(Debug, Clone)]
pub struct GeneratorRun {
    pub exit_code: i32,
    /// Combined stdout/stderr.
    pub output: String,
}

impl GeneratorRun {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Launch a generator command in a working directory and capture its
/// output.
pub fn launch(command: &str, arguments: &[String], working_dir: &Path) -> Result<GeneratorRun> {
    debug!(
        "Launching generator '{command}' with arguments {arguments:?} in '{}'",
        working_dir.display()
    );
    std::fs::create_dir_all(working_dir).context(format!(
        "Unable to create generator working directory '{}'",
        working_dir.display()
    ))?;
    let output = cmd(command, arguments)
        .dir(working_dir)
        .stderr_to_stdout()
        .stdout_capture()
        .unchecked()
        .run()
        .context(format!("Unable to start generator '{command}'"))?;

    let text = String::from_utf8_lossy(&output.stdout).to_string();
    for line in text.lines() {
        info!("{command}: {line}");
    }
    Ok(GeneratorRun {
        exit_code: output.status.code().unwrap_or(-1),
        output: text,
    })
}
