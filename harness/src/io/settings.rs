//! Evaluation settings derived from the environment.
//!
//! All environment reads happen here, once per process. The resulting
//! [`EvalSettings`] is threaded explicitly into the agent runner, validator
//! and artifact writers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

/// Default spend cap per agent invocation, in USD.
pub const DEFAULT_MAX_BUDGET_USD: &str = "5.00";
pub const DEFAULT_MODEL: &str = "sonnet";
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_VALIDATOR_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Agent stdout is one JSON document, so the limit is generous.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 64 * 1024 * 1024;

pub const ENV_CI: &str = "CI";
pub const ENV_SKIP_PERMISSIONS: &str = "EVALS_SKIP_PERMISSIONS";
pub const ENV_REPO_ROOT: &str = "SKILLS_REPO_ROOT";
pub const ENV_MAX_BUDGET_USD: &str = "EVALS_MAX_BUDGET_USD";
pub const ENV_MODEL: &str = "EVALS_MODEL";
pub const ENV_TIMEOUT_SECS: &str = "EVALS_TIMEOUT_SECS";
pub const ENV_INFO_DIR: &str = "RWX_INFO";
pub const ENV_API_KEY: &str = "ANTHROPIC_API_KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalSettings {
    /// Running under continuous integration.
    pub ci: bool,
    /// Explicit opt-in to bypass agent permission prompts outside CI.
    pub skip_permissions: bool,
    pub repo_root_override: Option<PathBuf>,
    /// Passed verbatim to the agent's budget flag.
    pub max_budget_usd: String,
    pub model: String,
    pub agent_timeout: Duration,
    /// Program and leading arguments used to launch the agent.
    pub agent_command: Vec<String>,
    /// Program and leading arguments of the external config validator.
    pub validator_command: Vec<String>,
    pub validator_timeout: Duration,
    pub output_limit_bytes: usize,
    /// Receives one file per usage metric when set.
    pub info_dir: Option<PathBuf>,
    /// Cost is only meaningful for API-key runs.
    pub report_cost: bool,
    /// Overwrite stored baselines instead of comparing.
    pub record_baselines: bool,
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            ci: false,
            skip_permissions: false,
            repo_root_override: None,
            max_budget_usd: DEFAULT_MAX_BUDGET_USD.to_string(),
            model: DEFAULT_MODEL.to_string(),
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            agent_command: vec!["claude".to_string()],
            validator_command: vec!["rwx".to_string(), "lint".to_string()],
            validator_timeout: DEFAULT_VALIDATOR_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            info_dir: None,
            report_cost: false,
            record_baselines: false,
        }
    }
}

impl EvalSettings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut settings = Self {
            ci: get(ENV_CI).is_some(),
            skip_permissions: get(ENV_SKIP_PERMISSIONS).is_some(),
            repo_root_override: get(ENV_REPO_ROOT).map(PathBuf::from),
            info_dir: get(ENV_INFO_DIR).map(PathBuf::from),
            report_cost: get(ENV_API_KEY).is_some(),
            ..Self::default()
        };
        if let Some(budget) = get(ENV_MAX_BUDGET_USD) {
            settings.max_budget_usd = budget.trim().to_string();
        }
        if let Some(model) = get(ENV_MODEL) {
            settings.model = model.trim().to_string();
        }
        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_TIMEOUT_SECS}={secs:?}"))?;
            settings.agent_timeout = Duration::from_secs(secs);
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Whether the agent may run without permission prompts.
    pub fn permission_bypass(&self) -> bool {
        self.ci || self.skip_permissions
    }

    pub fn validate(&self) -> Result<()> {
        let budget: f64 = self
            .max_budget_usd
            .parse()
            .with_context(|| format!("max budget {:?} is not a number", self.max_budget_usd))?;
        if !budget.is_finite() || budget <= 0.0 {
            bail!("max budget must be > 0, got {}", self.max_budget_usd);
        }
        if self.model.trim().is_empty() {
            bail!("model must be non-empty");
        }
        if self.agent_timeout.is_zero() {
            bail!("agent timeout must be > 0");
        }
        if self.validator_timeout.is_zero() {
            bail!("validator timeout must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        if self.agent_command.is_empty() || self.agent_command[0].trim().is_empty() {
            bail!("agent command must be a non-empty array");
        }
        if self.validator_command.is_empty() || self.validator_command[0].trim().is_empty() {
            bail!("validator command must be a non-empty array");
        }
        Ok(())
    }
}
