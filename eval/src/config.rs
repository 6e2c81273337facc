//! Settings merging.
//!
//! Applies case-specific overrides to the environment-derived settings.

use std::time::Duration;

use anyhow::Result;
use harness::io::settings::EvalSettings;

use crate::case::CaseConfig;

/// Apply case configuration overrides to the base settings.
pub fn apply_case_config(mut base: EvalSettings, overrides: &CaseConfig) -> Result<EvalSettings> {
    if let Some(timeout_secs) = overrides.timeout_secs {
        base.agent_timeout = Duration::from_secs(timeout_secs);
    }
    if let Some(budget) = &overrides.max_budget_usd {
        base.max_budget_usd = budget.trim().to_string();
    }
    if let Some(model) = &overrides.model {
        base.model = model.trim().to_string();
    }
    if let Some(validator) = &overrides.validator {
        base.validator_command = validator.command.clone();
    }
    base.validate()?;
    Ok(base)
}
