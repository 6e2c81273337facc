//! Discovery and loading of generated pipeline config files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::pipeline::PipelineConfig;

/// Directory, relative to the agent's working directory, holding generated configs.
pub const CONFIG_DIR: &str = ".rwx";
pub const CONFIG_EXTENSION: &str = "yml";

/// List `<workdir>/.rwx/*.yml`, sorted. Subdirectories are not searched.
pub fn config_files(workdir: &Path) -> Result<Vec<PathBuf>> {
    let dir = workdir.join(CONFIG_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == CONFIG_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse one config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let config = PipelineConfig::parse(&contents)
        .with_context(|| format!("parse config {}", path.display()))?;
    debug!(path = %path.display(), tasks = config.tasks.len(), "loaded config");
    Ok(config)
}

/// Load every generated config and merge them into one task list.
///
/// Fails when no config exists or when any file does not parse.
pub fn load_merged(workdir: &Path) -> Result<PipelineConfig> {
    let files = config_files(workdir)?;
    if files.is_empty() {
        bail!(
            "no {CONFIG_DIR}/*.{CONFIG_EXTENSION} files found in {}",
            workdir.display()
        );
    }
    let configs = files
        .iter()
        .map(|path| load_config(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(PipelineConfig::merge(configs))
}
