//! External validation of generated config files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::io::pipeline_store::{CONFIG_DIR, CONFIG_EXTENSION, config_files};
use crate::io::process::run_command_with_timeout;
use crate::io::settings::EvalSettings;

/// Validator output kept per failure.
const VALIDATOR_OUTPUT_LIMIT_BYTES: usize = 256 * 1024;

/// One config file the validator rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub file: PathBuf,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.timed_out {
            write!(f, "validation of {} timed out", self.file.display())?;
        } else {
            write!(
                f,
                "validation of {} failed with status {:?}",
                self.file.display(),
                self.exit_code
            )?;
        }
        write!(f, "\noutput: {}", self.output)
    }
}

/// Validate every generated config under `workdir`.
///
/// Fails when there is nothing to validate or the validator cannot be launched.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn validate_configs(workdir: &Path, settings: &EvalSettings) -> Result<Vec<ValidationFailure>> {
    let files = config_files(workdir)?;
    if files.is_empty() {
        bail!(
            "no {CONFIG_DIR}/*.{CONFIG_EXTENSION} files found in {}",
            workdir.display()
        );
    }
    let mut failures = Vec::new();
    for file in &files {
        if let Some(failure) = validate_file(workdir, file, settings)? {
            warn!(%failure, "config failed validation");
            failures.push(failure);
        }
    }
    debug!(files = files.len(), failures = failures.len(), "validation finished");
    Ok(failures)
}

/// Run the validator on one file from `workdir`. `None` means it passed.
pub fn validate_file(
    workdir: &Path,
    file: &Path,
    settings: &EvalSettings,
) -> Result<Option<ValidationFailure>> {
    let (program, leading) = settings
        .validator_command
        .split_first()
        .context("validator command is empty")?;
    let mut cmd = Command::new(program);
    cmd.args(leading).arg(file).current_dir(workdir);

    let output = run_command_with_timeout(
        cmd,
        None,
        settings.validator_timeout,
        VALIDATOR_OUTPUT_LIMIT_BYTES,
    )
    .with_context(|| format!("run validator {program}"))?;

    if output.timed_out || !output.status.success() {
        return Ok(Some(ValidationFailure {
            file: file.to_path_buf(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
            output: output.combined_lossy(),
        }));
    }
    Ok(None)
}
