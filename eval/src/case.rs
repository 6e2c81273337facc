//! Case file parsing and validation.
//!
//! Cases are TOML files defining a prompt, the fixture project it runs
//! against, and the checks its output must satisfy. See `eval/cases/` for
//! examples.

use std::fs;
use std::path::{Component, Path};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use harness::core::assertions::{self, ConfigAssertion};

/// A parsed case file containing prompt, config overrides, and checks.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    /// Tools the agent must have used.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Case-insensitive substrings required in the assistant's text output.
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
}

/// Case metadata: identifier, prompt, fixture, and expected skill.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    /// Prompt delivered to the agent.
    pub prompt: String,
    /// Directory under `eval/fixtures/projects/` copied into the workspace.
    pub fixture: Option<String>,
    /// Skill the agent is expected to invoke.
    pub skill: Option<String>,
}

/// Settings overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CaseConfig {
    /// Agent deadline in seconds.
    pub timeout_secs: Option<u64>,
    /// Spend cap passed to the agent.
    pub max_budget_usd: Option<String>,
    pub model: Option<String>,
    /// Validator command override (default: `["rwx", "lint"]`).
    pub validator: Option<ValidatorOverride>,
}

/// Custom validator command configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ValidatorOverride {
    /// Command run with each config path appended.
    pub command: Vec<String>,
}

/// Declarative form of a config assertion.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionSpec {
    HasTask { key: String },
    HasPackage { prefix: String },
    HasRunContaining { substring: String },
    TaskDependsOn { task: String, dependency: String },
    HasService { name: String },
    HasEnvVar { name: String },
    HasSecretRef { name: String },
    HasConditional { task: String },
    MinTaskCount { count: usize },
    /// Passes when any alternative passes.
    Either {
        name: String,
        alternatives: Vec<AssertionSpec>,
    },
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        Self::parse_str(&contents).with_context(|| format!("load case {}", path.display()))
    }

    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    /// Build the runtime assertions, in declaration order.
    pub fn config_assertions(&self) -> Vec<ConfigAssertion> {
        self.assertions
            .iter()
            .map(AssertionSpec::to_assertion)
            .collect()
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.prompt.trim().is_empty() {
            bail!("case.prompt must be non-empty");
        }
        if let Some(fixture) = &self.case.fixture {
            validate_fixture(fixture)?;
        }
        if let Some(skill) = &self.case.skill
            && skill.trim().is_empty()
        {
            bail!("case.skill must be non-empty when set");
        }
        if let Some(timeout_secs) = self.config.timeout_secs
            && timeout_secs == 0
        {
            bail!("config.timeout_secs must be > 0");
        }
        if let Some(validator) = &self.config.validator
            && (validator.command.is_empty() || validator.command[0].trim().is_empty())
        {
            bail!("config.validator.command must be a non-empty array");
        }
        if self.tools.iter().any(|tool| tool.trim().is_empty()) {
            bail!("tools entries must be non-empty");
        }
        if self.mentions.iter().any(|text| text.trim().is_empty()) {
            bail!("mentions entries must be non-empty");
        }
        for (index, assertion) in self.assertions.iter().enumerate() {
            assertion
                .validate()
                .with_context(|| format!("assertions[{}] invalid", index))?;
        }
        Ok(())
    }
}

impl AssertionSpec {
    pub fn to_assertion(&self) -> ConfigAssertion {
        match self {
            AssertionSpec::HasTask { key } => assertions::has_task(key),
            AssertionSpec::HasPackage { prefix } => assertions::has_package(prefix),
            AssertionSpec::HasRunContaining { substring } => {
                assertions::has_run_containing(substring)
            }
            AssertionSpec::TaskDependsOn { task, dependency } => {
                assertions::task_depends_on(task, dependency)
            }
            AssertionSpec::HasService { name } => assertions::has_service(name),
            AssertionSpec::HasEnvVar { name } => assertions::has_env_var(name),
            AssertionSpec::HasSecretRef { name } => assertions::has_secret_ref(name),
            AssertionSpec::HasConditional { task } => assertions::has_conditional(task),
            AssertionSpec::MinTaskCount { count } => assertions::min_task_count(*count),
            AssertionSpec::Either { name, alternatives } => assertions::either(
                name,
                alternatives.iter().map(AssertionSpec::to_assertion).collect(),
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        let require = |field: &str, value: &str| {
            if value.trim().is_empty() {
                Err(anyhow!("{field} must be non-empty"))
            } else {
                Ok(())
            }
        };
        match self {
            AssertionSpec::HasTask { key } => require("has_task.key", key),
            AssertionSpec::HasPackage { prefix } => require("has_package.prefix", prefix),
            AssertionSpec::HasRunContaining { substring } => {
                require("has_run_containing.substring", substring)
            }
            AssertionSpec::TaskDependsOn { task, dependency } => {
                require("task_depends_on.task", task)?;
                require("task_depends_on.dependency", dependency)
            }
            AssertionSpec::HasService { name } => require("has_service.name", name),
            AssertionSpec::HasEnvVar { name } => require("has_env_var.name", name),
            AssertionSpec::HasSecretRef { name } => require("has_secret_ref.name", name),
            AssertionSpec::HasConditional { task } => require("has_conditional.task", task),
            AssertionSpec::MinTaskCount { count } => {
                if *count == 0 {
                    bail!("min_task_count.count must be > 0");
                }
                Ok(())
            }
            AssertionSpec::Either { name, alternatives } => {
                require("either.name", name)?;
                if alternatives.is_empty() {
                    bail!("either.alternatives must be a non-empty array");
                }
                for (index, alternative) in alternatives.iter().enumerate() {
                    alternative
                        .validate()
                        .with_context(|| format!("either.alternatives[{}] invalid", index))?;
                }
                Ok(())
            }
        }
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

/// Reject ids that are not slugs, so they are safe as path components.
pub(crate) fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

fn validate_fixture(fixture: &str) -> Result<()> {
    if fixture.trim().is_empty() {
        bail!("case.fixture must be non-empty when set");
    }
    let escapes = Path::new(fixture)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        bail!("case.fixture must be a relative path without '..'");
    }
    Ok(())
}
