//! Repository root discovery.
//!
//! The agent loads skills from the repository under test, so every run needs
//! a stable root regardless of the directory the harness was started from.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::io::settings::{ENV_REPO_ROOT, EvalSettings};

/// Top-level directories that together identify the repository root.
pub const WORKSPACE_MARKERS: [&str; 2] = ["skills", "eval"];

/// Locate the repository root starting from the current directory.
pub fn find_repo_root(settings: &EvalSettings) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("read current directory")?;
    find_repo_root_from(&cwd, settings.repo_root_override.as_deref())
}

/// Locate the repository root by walking up from `start`.
///
/// An explicit override wins but must itself look like a root.
pub fn find_repo_root_from(start: &Path, override_root: Option<&Path>) -> Result<PathBuf> {
    if let Some(root) = override_root {
        if looks_like_repo_root(root) {
            return Ok(root.to_path_buf());
        }
        bail!(
            "{ENV_REPO_ROOT}={} does not look like the skills repository root",
            root.display()
        );
    }

    for dir in start.ancestors() {
        if looks_like_repo_root(dir) {
            debug!(root = %dir.display(), "found repository root");
            return Ok(dir.to_path_buf());
        }
    }
    bail!(
        "could not find repository root from {} (looked for workspace markers: {} and .git)",
        start.display(),
        WORKSPACE_MARKERS.join("/ and ") + "/"
    )
}

/// Both workspace markers present, or a `.git` directory as a fallback.
pub fn looks_like_repo_root(dir: &Path) -> bool {
    WORKSPACE_MARKERS.iter().all(|marker| dir.join(marker).is_dir()) || dir.join(".git").is_dir()
}
