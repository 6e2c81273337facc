//! Check execution and outcome recording.
//!
//! Evaluates a finished run against its case: what the trace shows the agent
//! did, what the generated configs contain, and how the run's usage compares
//! with the stored baseline.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use harness::core::assertions::run_assertions;
use harness::core::baseline::{BaselineCheck, Metric};
use harness::core::trace::ExecutionResult;
use harness::io::pipeline_store::{config_files, load_merged};
use harness::io::settings::EvalSettings;
use harness::io::validator::{ValidationFailure, validate_configs};

use crate::case::CaseFile;

/// Collected check outcomes for a run.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Judgment {
    pub checks: Vec<CheckOutcome>,
}

impl Judgment {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(CheckOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|check| !check.passed())
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// The agent exited cleanly with a complete trace.
    AgentCompleted {
        passed: bool,
        detail: Option<String>,
    },
    SkillInvoked {
        skill: String,
        passed: bool,
        skills_used: Vec<String>,
    },
    ToolUsed {
        tool: String,
        passed: bool,
    },
    Mention {
        text: String,
        passed: bool,
    },
    ConfigPresent {
        passed: bool,
        files: Vec<String>,
        error: Option<String>,
    },
    ConfigValid {
        passed: bool,
        failures: Vec<ValidationFailure>,
        error: Option<String>,
    },
    Assertion {
        name: String,
        passed: bool,
        messages: Vec<String>,
    },
    /// One entry per regressed metric, or a single passing entry.
    Baseline {
        passed: bool,
        metric: Option<Metric>,
        detail: String,
    },
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::AgentCompleted { passed, .. }
            | CheckOutcome::SkillInvoked { passed, .. }
            | CheckOutcome::ToolUsed { passed, .. }
            | CheckOutcome::Mention { passed, .. }
            | CheckOutcome::ConfigPresent { passed, .. }
            | CheckOutcome::ConfigValid { passed, .. }
            | CheckOutcome::Assertion { passed, .. }
            | CheckOutcome::Baseline { passed, .. } => *passed,
        }
    }

    /// Stable label used to aggregate pass rates across runs.
    pub fn label(&self) -> String {
        match self {
            CheckOutcome::AgentCompleted { .. } => "agent_completed".to_string(),
            CheckOutcome::SkillInvoked { skill, .. } => format!("skill_invoked({skill})"),
            CheckOutcome::ToolUsed { tool, .. } => format!("tool_used({tool})"),
            CheckOutcome::Mention { text, .. } => format!("mention({text})"),
            CheckOutcome::ConfigPresent { .. } => "config_present".to_string(),
            CheckOutcome::ConfigValid { .. } => "config_valid".to_string(),
            CheckOutcome::Assertion { name, .. } => format!("assertion({name})"),
            CheckOutcome::Baseline { metric, .. } => match metric {
                Some(metric) => format!("baseline({})", metric.name()),
                None => "baseline".to_string(),
            },
        }
    }
}

/// Checks derived from the trace: expected skill, tools, and mentions.
pub fn trace_checks(case: &CaseFile, result: &ExecutionResult) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::new();

    if let Some(skill) = &case.case.skill {
        let skills_used = result.skill_uses();
        let passed = skills_used.iter().any(|used| used == skill);
        debug!(check = "skill_invoked", skill = %skill, passed, "check result");
        outcomes.push(CheckOutcome::SkillInvoked {
            skill: skill.clone(),
            passed,
            skills_used,
        });
    }

    let tool_names = result.tool_names();
    for tool in &case.tools {
        let passed = tool_names.iter().any(|used| used == tool);
        debug!(check = "tool_used", tool = %tool, passed, "check result");
        outcomes.push(CheckOutcome::ToolUsed {
            tool: tool.clone(),
            passed,
        });
    }

    let text = result.text_output().to_lowercase();
    for mention in &case.mentions {
        let passed = text.contains(&mention.to_lowercase());
        debug!(check = "mention", mention = %mention, passed, "check result");
        outcomes.push(CheckOutcome::Mention {
            text: mention.clone(),
            passed,
        });
    }

    outcomes
}

/// Checks over the generated configs in `workdir`.
///
/// The external validator only runs when `validator` is given. Without any
/// config the remaining checks cannot be evaluated and are omitted.
#[instrument(skip_all, fields(case_id = %case.case.id, workdir = %workdir.display()))]
pub fn config_checks(
    case: &CaseFile,
    workdir: &Path,
    validator: Option<&EvalSettings>,
) -> Vec<CheckOutcome> {
    let files: Vec<String> = match config_files(workdir) {
        Ok(files) => files
            .iter()
            .map(|path| {
                path.strip_prefix(workdir)
                    .unwrap_or(path.as_path())
                    .display()
                    .to_string()
            })
            .collect(),
        Err(err) => {
            return vec![CheckOutcome::ConfigPresent {
                passed: false,
                files: Vec::new(),
                error: Some(format!("{err:#}")),
            }];
        }
    };

    let config = match load_merged(workdir) {
        Ok(config) => config,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "configs could not be loaded");
            return vec![CheckOutcome::ConfigPresent {
                passed: false,
                files,
                error: Some(format!("{err:#}")),
            }];
        }
    };
    let mut outcomes = vec![CheckOutcome::ConfigPresent {
        passed: true,
        files,
        error: None,
    }];

    if let Some(settings) = validator {
        let outcome = match validate_configs(workdir, settings) {
            Ok(failures) => CheckOutcome::ConfigValid {
                passed: failures.is_empty(),
                failures,
                error: None,
            },
            Err(err) => CheckOutcome::ConfigValid {
                passed: false,
                failures: Vec::new(),
                error: Some(format!("{err:#}")),
            },
        };
        outcomes.push(outcome);
    }

    for outcome in run_assertions(&config, &case.config_assertions()) {
        debug!(check = "assertion", name = %outcome.name, passed = outcome.passed, "check result");
        outcomes.push(CheckOutcome::Assertion {
            name: outcome.name,
            passed: outcome.passed,
            messages: outcome.messages,
        });
    }
    outcomes
}

/// One failing entry per regressed metric; otherwise a single passing entry.
pub fn baseline_checks(check: &BaselineCheck) -> Vec<CheckOutcome> {
    let passing = |detail: &str| {
        vec![CheckOutcome::Baseline {
            passed: true,
            metric: None,
            detail: detail.to_string(),
        }]
    };
    match check {
        BaselineCheck::Recorded => passing("baseline recorded"),
        BaselineCheck::Missing => passing("no baseline recorded"),
        BaselineCheck::Compared(regressions) if regressions.is_empty() => {
            passing("within thresholds")
        }
        BaselineCheck::Compared(regressions) => regressions
            .iter()
            .map(|regression| CheckOutcome::Baseline {
                passed: false,
                metric: Some(regression.metric),
                detail: regression.to_string(),
            })
            .collect(),
    }
}

pub fn write_judgment(path: &Path, judgment: &Judgment) -> Result<()> {
    let contents = serde_json::to_string_pretty(judgment).context("serialize checks")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
