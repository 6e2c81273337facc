//! CLI command implementations.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use harness::core::trace::ExecutionResult;
use harness::io::agent::ClaudeRunner;
use harness::io::settings::EvalSettings;

use crate::case::{CaseFile, discover_cases, validate_case_id};
use crate::config::apply_case_config;
use crate::judge::config_checks;
use crate::outcome::Outcome;
use crate::paths::EvalPaths;
use crate::report::aggregate;
use crate::run::run_case;

/// List all available cases.
pub fn list_cases(paths: &EvalPaths) -> Result<()> {
    let cases = discover_cases(&paths.cases_dir)?;
    for case in cases {
        println!("{}", case.case.id);
    }
    Ok(())
}

fn load_case(paths: &EvalPaths, case_id: &str) -> Result<CaseFile> {
    validate_case_id(case_id)?;
    let case_path = paths.case_path(case_id);
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    CaseFile::load(&case_path).with_context(|| format!("load case {case_id}"))
}

/// Run cases by id, each `runs` times. Cases run concurrently.
///
/// Repeated ids run once per invocation. Fails when any run errors or does
/// not succeed.
pub fn run_cases_by_id(
    paths: &EvalPaths,
    settings: &EvalSettings,
    case_ids: &[String],
    runs: u32,
) -> Result<()> {
    let case_ids = unique_ids(case_ids);
    let cases = case_ids
        .iter()
        .map(|case_id| load_case(paths, case_id))
        .collect::<Result<Vec<_>>>()?;

    info!(cases = cases.len(), runs, "starting runs");
    let results: Vec<Result<u32>> = thread::scope(|scope| {
        let handles: Vec<_> = cases
            .iter()
            .map(|case| scope.spawn(move || run_repeated(paths, settings, case, runs)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("case thread panicked")))
            })
            .collect()
    });

    let mut unsuccessful = 0;
    let mut errors = Vec::new();
    for (case_id, result) in case_ids.iter().zip(results) {
        match result {
            Ok(count) => unsuccessful += count,
            Err(err) => errors.push(format!("{case_id}: {err:#}")),
        }
    }
    for error in &errors {
        eprintln!("error: {error}");
    }
    if !errors.is_empty() || unsuccessful > 0 {
        bail!(
            "{} unsuccessful run(s), {} case error(s)",
            unsuccessful,
            errors.len()
        );
    }
    Ok(())
}

/// First occurrence of each id, in order.
fn unique_ids(case_ids: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    case_ids
        .iter()
        .map(String::as_str)
        .filter(|case_id| seen.insert(*case_id))
        .collect()
}

/// Returns the number of runs that did not succeed.
fn run_repeated(
    paths: &EvalPaths,
    settings: &EvalSettings,
    case: &CaseFile,
    runs: u32,
) -> Result<u32> {
    let case_id = &case.case.id;
    let case_settings = apply_case_config(settings.clone(), &case.config)
        .with_context(|| format!("apply config for case {case_id}"))?;
    let agent = ClaudeRunner::new(case_settings.clone(), &paths.root);
    let case_path = paths.case_path(case_id);

    let mut unsuccessful = 0;
    for run_num in 1..=runs {
        debug!(case_id = %case_id, run_num, runs, "starting run");
        let outcome = run_case(paths, &case_settings, &case_path, case, &agent)
            .with_context(|| format!("run case {case_id}"))?;
        println!(
            "run: case={} eval_run_id={} outcome={:?} results={}",
            case_id,
            outcome.eval_run_id,
            outcome.outcome,
            outcome.results_dir.display()
        );
        for label in &outcome.failed_checks {
            println!("run: case={case_id} failed check {label}");
        }
        if outcome.outcome != Outcome::Success {
            unsuccessful += 1;
        }
    }
    Ok(unsuccessful)
}

/// Evaluate a case's config checks against an existing directory.
pub fn check_case(
    paths: &EvalPaths,
    settings: &EvalSettings,
    case_id: &str,
    workdir: &Path,
    validate: bool,
) -> Result<()> {
    let case = load_case(paths, case_id)?;
    let validator = if validate {
        Some(apply_case_config(settings.clone(), &case.config)?)
    } else {
        None
    };
    let checks = config_checks(&case, workdir, validator.as_ref());

    let mut failed = 0;
    for check in &checks {
        let status = if check.passed() { "pass" } else { "FAIL" };
        println!("check: {} {}", status, check.label());
        if !check.passed() {
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} checks failed", checks.len());
    }
    Ok(())
}

/// Parse a saved trace and print its tools, skills and usage.
pub fn inspect_trace(trace_path: &Path, prompt: &str) -> Result<()> {
    let raw = fs::read(trace_path).with_context(|| format!("read {}", trace_path.display()))?;
    let result = ExecutionResult::parse(prompt, raw)
        .with_context(|| format!("parse trace {}", trace_path.display()))?;

    println!("inspect: events={}", result.events().len());
    println!("inspect: tools={}", result.tool_names().join(","));
    println!("inspect: skills={}", result.skill_uses().join(","));
    match result.summary() {
        Ok(summary) => {
            println!(
                "inspect: input_tokens={} output_tokens={} cache_creation_input_tokens={} cache_read_input_tokens={}",
                summary.input_tokens,
                summary.output_tokens,
                summary.cache_creation_input_tokens,
                summary.cache_read_input_tokens
            );
            println!("inspect: execution_time_ms={}", summary.execution_time_ms);
        }
        Err(incomplete) => println!("inspect: incomplete ({incomplete})"),
    }
    if let Some(event) = result.result_event() {
        if let Some(turns) = event.num_turns {
            println!("inspect: num_turns={turns}");
        }
        if let Some(cost) = event.total_cost_usd {
            println!("inspect: cost_usd={cost:.4}");
        }
        if event.is_error {
            println!("inspect: agent reported an error");
        }
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(paths: &EvalPaths, case_id: &str) -> Result<()> {
    validate_case_id(case_id)?;
    let (summary, warnings) = aggregate(&paths.case_results_dir(case_id))?;
    println!("report: case={} runs={}", case_id, summary.runs);
    println!(
        "report: success={} fail={} error={} regressed={}",
        summary.success, summary.fail, summary.error, summary.regressed
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={avg:.2}");
    }
    if let Some(avg) = summary.avg_input_tokens {
        println!("report: avg_input_tokens={avg:.0}");
    }
    if let Some(avg) = summary.avg_output_tokens {
        println!("report: avg_output_tokens={avg:.0}");
    }
    if let Some(avg) = summary.avg_cost_usd {
        println!("report: avg_cost_usd={avg:.4}");
    }
    for (label, (passed, total)) in summary.check_pass_rates {
        println!("report: check {label} {passed}/{total}");
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

/// Remove workspaces and results for a case.
pub fn clean_case(paths: &EvalPaths, case_id: &str) -> Result<()> {
    validate_case_id(case_id)?;
    let prefix = format!("{case_id}_");
    let mut removed = 0;
    if paths.workspaces_dir.exists() {
        for entry in fs::read_dir(&paths.workspaces_dir)
            .with_context(|| format!("read {}", paths.workspaces_dir.display()))?
        {
            let entry = entry.context("read entry")?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_dir_all(entry.path())
                    .with_context(|| format!("remove {}", entry.path().display()))?;
                removed += 1;
            }
        }
    }

    let case_results = paths.case_results_dir(case_id);
    if case_results.exists() {
        fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }

    println!(
        "clean: case={} workspaces_removed={} results={}",
        case_id,
        removed,
        case_results.display()
    );
    Ok(())
}
