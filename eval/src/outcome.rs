use serde::{Deserialize, Serialize};

use crate::judge::Judgment;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Error,
}

/// A run without a complete trace is an error regardless of its checks.
pub fn classify_outcome(agent_completed: bool, judgment: &Judgment) -> Outcome {
    if !agent_completed {
        return Outcome::Error;
    }
    if judgment.all_passed() {
        Outcome::Success
    } else {
        Outcome::Fail
    }
}
