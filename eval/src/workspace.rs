//! Workspace creation and management.
//!
//! Each eval run gets an isolated copy of the case's fixture project.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::debug;

/// An isolated workspace for running a case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Absolute path to the workspace root.
    pub root: PathBuf,
    /// Workspace directory name (includes case id, timestamp, and random suffix).
    pub name: String,
    /// Timestamp and random suffix, shared with the run id.
    pub run_suffix: String,
}

/// Create an isolated workspace for running a case.
///
/// The fixture tree, when given, is copied into the workspace root.
pub fn create_workspace(base_dir: &Path, case_id: &str, fixture: Option<&Path>) -> Result<Workspace> {
    fs::create_dir_all(base_dir)
        .with_context(|| format!("create workspace dir {}", base_dir.display()))?;

    let run_suffix = format!("{}_{}", generate_timestamp(), generate_short_id());
    let name = build_workspace_name(case_id, &run_suffix);
    let root = base_dir.join(&name);
    if root.exists() {
        bail!("workspace {} already exists", root.display());
    }
    fs::create_dir_all(&root)
        .with_context(|| format!("create workspace root {}", root.display()))?;

    if let Some(fixture) = fixture {
        if !fixture.is_dir() {
            bail!("fixture {} not found", fixture.display());
        }
        copy_dir_recursive(fixture, &root)
            .with_context(|| format!("copy fixture {}", fixture.display()))?;
        debug!(fixture = %fixture.display(), root = %root.display(), "fixture copied");
    }

    Ok(Workspace {
        root,
        name,
        run_suffix,
    })
}

pub fn build_workspace_name(case_id: &str, run_suffix: &str) -> String {
    format!("{case_id}_{run_suffix}")
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read {}", src.display()))? {
        let entry = entry.context("read entry")?;
        let path = entry.path();
        let target = dst.join(entry.file_name());
        if path.is_dir() {
            copy_dir_recursive(&path, &target)?;
        } else {
            fs::copy(&path, &target).with_context(|| format!("copy {}", path.display()))?;
        }
    }
    Ok(())
}
