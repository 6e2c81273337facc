//! Result capture and persistence.
//!
//! Records run metadata next to the raw agent output and checks so runs can
//! be compared later.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use harness::core::baseline::Baseline;
use harness::core::trace::ResultEvent;

use crate::outcome::Outcome;

/// Input for recording a completed run.
#[derive(Debug)]
pub struct MetaInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub eval_run_id: &'a str,
    pub model: &'a str,
    pub outcome: Outcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub workspace_root: &'a Path,
    pub repo_root: &'a Path,
    pub summary: Option<&'a Baseline>,
    pub result_event: Option<&'a ResultEvent>,
    /// Non-fatal errors encountered while running.
    pub errors: Vec<String>,
}

/// Metadata for an eval run, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EvalMeta {
    pub case_id: String,
    pub eval_run_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// Git SHA of the repository under test at time of run.
    pub repo_git_sha: Option<String>,
    pub model: String,
    pub outcome: Outcome,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub workspace: String,
    /// Usage snapshot; absent when the agent produced no complete trace.
    pub summary: Option<Baseline>,
    pub cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
    pub errors: Vec<String>,
}

/// Write `meta.json` into `results_dir`.
#[instrument(skip_all, fields(case_id = %input.case_id, eval_run_id = %input.eval_run_id))]
pub fn record_meta(results_dir: &Path, input: MetaInput<'_>) -> Result<EvalMeta> {
    let mut errors = input.errors;

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let repo_git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("repo git sha: {err}"));
            None
        }
    };

    if !errors.is_empty() {
        warn!(errors = ?errors, "run had non-fatal errors");
    }

    let duration = input.finished_at - input.started_at;
    let meta = EvalMeta {
        case_id: input.case_id.to_string(),
        eval_run_id: input.eval_run_id.to_string(),
        case_hash,
        repo_git_sha,
        model: input.model.to_string(),
        outcome: input.outcome,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        workspace: input.workspace_root.display().to_string(),
        summary: input.summary.cloned(),
        cost_usd: input.result_event.and_then(|event| event.total_cost_usd),
        num_turns: input.result_event.and_then(|event| event.num_turns),
        errors,
    };

    write_meta(&results_dir.join("meta.json"), &meta)?;
    debug!(results_dir = %results_dir.display(), "meta recorded");
    Ok(meta)
}

pub fn load_meta(path: &Path) -> Result<EvalMeta> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse meta {}", path.display()))
}

pub fn results_dir(base_dir: &Path, case_id: &str, eval_run_id: &str) -> PathBuf {
    base_dir.join(case_id).join(eval_run_id)
}

fn write_meta(path: &Path, meta: &EvalMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
