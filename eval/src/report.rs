//! Aggregation of stored runs for one case.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::judge::{CheckOutcome, Judgment};
use crate::outcome::Outcome;
use crate::results::{EvalMeta, load_meta};

/// One stored run: its metadata and checks.
#[derive(Debug)]
pub struct RunRecord {
    pub meta: EvalMeta,
    pub judgment: Judgment,
}

impl RunRecord {
    pub fn load(dir: &Path) -> Result<Self> {
        let meta = load_meta(&dir.join("meta.json"))?;
        let checks_path = dir.join("checks.json");
        let contents = fs::read_to_string(&checks_path)
            .with_context(|| format!("read {}", checks_path.display()))?;
        let judgment = serde_json::from_str(&contents)
            .with_context(|| format!("parse checks {}", checks_path.display()))?;
        Ok(Self {
            meta,
            judgment,
        })
    }

    /// Whether any baseline check failed.
    pub fn regressed(&self) -> bool {
        self.judgment
            .checks
            .iter()
            .any(|check| matches!(check, CheckOutcome::Baseline { passed: false, .. }))
    }
}

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub runs: usize,
    pub success: usize,
    pub fail: usize,
    pub error: usize,
    /// Runs with at least one baseline regression.
    pub regressed: usize,
    pub avg_duration_secs: Option<f64>,
    pub avg_input_tokens: Option<f64>,
    pub avg_output_tokens: Option<f64>,
    pub avg_cost_usd: Option<f64>,
    /// Check label to (passed, total).
    pub check_pass_rates: BTreeMap<String, (usize, usize)>,
}

impl ReportSummary {
    pub fn from_runs(records: &[RunRecord]) -> Self {
        let mut summary = ReportSummary {
            runs: records.len(),
            ..ReportSummary::default()
        };
        for record in records {
            match record.meta.outcome {
                Outcome::Success => summary.success += 1,
                Outcome::Fail => summary.fail += 1,
                Outcome::Error => summary.error += 1,
            }
            if record.regressed() {
                summary.regressed += 1;
            }
            for check in &record.judgment.checks {
                let entry = summary.check_pass_rates.entry(check.label()).or_insert((0, 0));
                if check.passed() {
                    entry.0 += 1;
                }
                entry.1 += 1;
            }
        }

        let metas = || records.iter().map(|record| &record.meta);
        summary.avg_duration_secs = mean(metas().map(|meta| meta.duration_secs));
        summary.avg_input_tokens = mean(
            metas().filter_map(|meta| meta.summary.as_ref().map(|s| s.input_tokens as f64)),
        );
        summary.avg_output_tokens = mean(
            metas().filter_map(|meta| meta.summary.as_ref().map(|s| s.output_tokens as f64)),
        );
        summary.avg_cost_usd = mean(metas().filter_map(|meta| meta.cost_usd));
        summary
    }
}

/// Run directories under a case's results directory, sorted by name.
pub fn run_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let path = entry.context("read entry")?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Load every readable run; unreadable ones become warnings.
pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    for dir in run_dirs(case_results_dir)? {
        match RunRecord::load(&dir) {
            Ok(record) => records.push(record),
            Err(err) => warnings.push(format!("skip {}: {err:#}", dir.display())),
        }
    }
    Ok((ReportSummary::from_runs(&records), warnings))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        return None;
    }
    Some(sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness::core::baseline::{Baseline, Metric};
    use tempfile::tempdir;

    fn write_run(
        dir: &Path,
        outcome: Outcome,
        duration: f64,
        input_tokens: Option<u64>,
        checks: Vec<CheckOutcome>,
    ) {
        fs::create_dir_all(dir).expect("run dir");
        let meta = EvalMeta {
            case_id: "case".to_string(),
            eval_run_id: "run".to_string(),
            case_hash: "hash".to_string(),
            repo_git_sha: None,
            model: "sonnet".to_string(),
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            workspace: "/tmp".to_string(),
            summary: input_tokens.map(|input_tokens| Baseline {
                input_tokens,
                output_tokens: input_tokens / 10,
                ..Baseline::default()
            }),
            cost_usd: input_tokens.map(|_| 0.10),
            num_turns: None,
            errors: Vec::new(),
        };
        let meta = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join("meta.json"), format!("{meta}\n")).expect("write meta");
        let judgment = serde_json::to_string_pretty(&Judgment { checks }).expect("checks json");
        fs::write(dir.join("checks.json"), format!("{judgment}\n")).expect("write checks");
    }

    fn assertion(passed: bool) -> CheckOutcome {
        CheckOutcome::Assertion {
            name: "has_task_test".to_string(),
            passed,
            messages: Vec::new(),
        }
    }

    #[test]
    fn aggregates_runs() {
        let temp = tempdir().expect("tempdir");
        write_run(
            &temp.path().join("run1"),
            Outcome::Success,
            5.0,
            Some(1000),
            vec![assertion(true)],
        );
        write_run(
            &temp.path().join("run2"),
            Outcome::Fail,
            15.0,
            Some(3000),
            vec![
                assertion(false),
                CheckOutcome::Baseline {
                    passed: false,
                    metric: Some(Metric::InputTokens),
                    detail: "input_tokens regressed".to_string(),
                },
            ],
        );
        write_run(
            &temp.path().join("run3"),
            Outcome::Error,
            10.0,
            None,
            vec![assertion(false)],
        );

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.runs, 3);
        assert_eq!((summary.success, summary.fail, summary.error), (1, 1, 1));
        assert_eq!(summary.regressed, 1);
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.avg_input_tokens, Some(2000.0));
        assert_eq!(summary.avg_output_tokens, Some(200.0));
        assert_eq!(summary.avg_cost_usd, Some(0.10));
        assert_eq!(
            summary.check_pass_rates.get("assertion(has_task_test)"),
            Some(&(1, 3))
        );
        assert_eq!(
            summary.check_pass_rates.get("baseline(input_tokens)"),
            Some(&(0, 1))
        );
    }

    #[test]
    fn unreadable_runs_become_warnings() {
        let temp = tempdir().expect("tempdir");
        let broken = temp.path().join("broken");
        fs::create_dir_all(&broken).expect("run dir");
        fs::write(broken.join("meta.json"), "{").expect("meta");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert_eq!(summary.avg_duration_secs, None);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("parse meta"), "{}", warnings[0]);
    }

    #[test]
    fn missing_results_dir_is_empty() {
        let temp = tempdir().expect("tempdir");
        let (summary, warnings) = aggregate(&temp.path().join("absent")).expect("aggregate");
        assert_eq!(summary.runs, 0);
        assert!(warnings.is_empty());
    }
}
