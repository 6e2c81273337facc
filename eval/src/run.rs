//! Case execution orchestration.
//!
//! Coordinates workspace creation, the agent run, checks, baseline
//! comparison, and result capture.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use harness::core::baseline::{Baseline, DEFAULT_THRESHOLDS};
use harness::core::trace::ExecutionResult;
use harness::io::agent::{AgentRequest, AgentRunner};
use harness::io::artifacts::{save_raw_output, write_info};
use harness::io::baseline_store::BaselineStore;
use harness::io::settings::EvalSettings;

use crate::case::CaseFile;
use crate::judge::{
    CheckOutcome, Judgment, baseline_checks, config_checks, trace_checks, write_judgment,
};
use crate::outcome::{Outcome, classify_outcome};
use crate::paths::EvalPaths;
use crate::results::{MetaInput, record_meta, results_dir};
use crate::workspace::create_workspace;

/// Raw agent stdout inside a run's results directory.
pub const AGENT_OUTPUT_FILE: &str = "agent-output.json";

/// Result of running a single case.
#[derive(Debug)]
pub struct RunOutcome {
    /// Unique identifier for this eval run.
    pub eval_run_id: String,
    /// Path to the results directory.
    pub results_dir: PathBuf,
    /// Classified outcome.
    pub outcome: Outcome,
    /// Labels of the checks that failed.
    pub failed_checks: Vec<String>,
}

/// Run a case end-to-end: workspace creation, agent run, checks, result capture.
///
/// `settings` must already carry the case's overrides.
#[instrument(skip_all, fields(case_id = %case.case.id))]
pub fn run_case<A: AgentRunner>(
    paths: &EvalPaths,
    settings: &EvalSettings,
    case_path: &Path,
    case: &CaseFile,
    agent: &A,
) -> Result<RunOutcome> {
    info!("case run started");

    debug!("creating workspace");
    let fixture = case
        .case
        .fixture
        .as_deref()
        .map(|fixture| paths.fixture_dir(fixture));
    let workspace = create_workspace(&paths.workspaces_dir, &case.case.id, fixture.as_deref())
        .context("create workspace")?;
    debug!(workspace = %workspace.name, "workspace created");

    let eval_run_id = format!("eval-{}", workspace.run_suffix);
    let results_dir = results_dir(&paths.results_dir, &case.case.id, &eval_run_id);
    fs::create_dir_all(&results_dir)
        .with_context(|| format!("create results dir {}", results_dir.display()))?;

    debug!("running agent");
    let request = AgentRequest {
        workdir: workspace.root.clone(),
        prompt: case.case.prompt.clone(),
        timeout: settings.agent_timeout,
    };
    let started_at = Utc::now();
    let agent_result = agent.run(&request);
    let finished_at = Utc::now();

    let mut errors = Vec::new();
    let mut judgment = Judgment::default();
    let mut summary = None;

    let result = match agent_result {
        Ok(result) => Some(result),
        Err(err) => {
            warn!(err = %err, "agent run failed");
            judgment.checks.push(CheckOutcome::AgentCompleted {
                passed: false,
                detail: Some(err.to_string()),
            });
            None
        }
    };

    let mut agent_completed = false;
    if let Some(result) = &result {
        if let Err(err) = save_raw_output(&results_dir.join(AGENT_OUTPUT_FILE), result) {
            errors.push(format!("agent output: {err:#}"));
        }
        if let (Some(info_dir), Some(event)) = (&settings.info_dir, result.result_event())
            && let Err(err) = write_info(info_dir, &case.case.id, event, settings.report_cost)
        {
            errors.push(format!("info files: {err:#}"));
        }

        let (completed, snapshot) = completion_check(result, &mut judgment);
        agent_completed = completed;
        summary = snapshot;
        judgment.checks.extend(trace_checks(case, result));
    }

    debug!("running config checks");
    judgment
        .checks
        .extend(config_checks(case, &workspace.root, Some(settings)));

    if agent_completed && let Some(snapshot) = &summary {
        let store = BaselineStore::new(&paths.baselines_dir);
        match store.check(
            &case.case.id,
            snapshot,
            settings.record_baselines,
            &DEFAULT_THRESHOLDS,
        ) {
            Ok(check) => judgment.checks.extend(baseline_checks(&check)),
            Err(err) => errors.push(format!("baseline: {err:#}")),
        }
    }

    let outcome = classify_outcome(agent_completed, &judgment);
    write_judgment(&results_dir.join("checks.json"), &judgment).context("write checks")?;
    record_meta(
        &results_dir,
        MetaInput {
            case_id: &case.case.id,
            case_path,
            eval_run_id: &eval_run_id,
            model: &settings.model,
            outcome,
            started_at,
            finished_at,
            workspace_root: &workspace.root,
            repo_root: &paths.root,
            summary: summary.as_ref(),
            result_event: result.as_ref().and_then(ExecutionResult::result_event),
            errors,
        },
    )
    .context("record meta")?;

    let failed_checks = judgment.failures().map(CheckOutcome::label).collect();
    info!(outcome = ?outcome, results_dir = %results_dir.display(), "case run complete");

    Ok(RunOutcome {
        eval_run_id,
        results_dir,
        outcome,
        failed_checks,
    })
}

/// Record whether the trace is complete and successful; return its usage snapshot.
fn completion_check(
    result: &ExecutionResult,
    judgment: &mut Judgment,
) -> (bool, Option<Baseline>) {
    match result.summary() {
        Ok(snapshot) => {
            let reported_error = result
                .result_event()
                .filter(|event| event.is_error)
                .map(|event| {
                    format!(
                        "agent reported an error: {}",
                        event.result.as_deref().unwrap_or("(no message)")
                    )
                });
            let completed = reported_error.is_none();
            judgment.checks.push(CheckOutcome::AgentCompleted {
                passed: completed,
                detail: reported_error,
            });
            (completed, Some(snapshot))
        }
        Err(incomplete) => {
            warn!(tools = ?incomplete.partial.tools_used, "agent trace is incomplete");
            judgment.checks.push(CheckOutcome::AgentCompleted {
                passed: false,
                detail: Some(format!(
                    "{incomplete} (tools used: {:?})",
                    incomplete.partial.tools_used
                )),
            });
            (false, None)
        }
    }
}
