//! Performance snapshots and regression comparison.
//!
//! A [`Baseline`] records what one past run of a named evaluation cost.
//! [`compare`] checks a fresh snapshot against it metric by metric and
//! reports every metric that grew beyond its allowed relative increase.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Point-in-time performance snapshot for one evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    pub input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    pub output_tokens: u64,
    pub execution_time_ms: u64,
    /// Distinct tool names, in order of first use.
    #[serde(default)]
    pub tools_used: Vec<String>,
    /// Distinct skill names, in order of first use.
    #[serde(default)]
    pub skills_used: Vec<String>,
}

/// Metrics that participate in regression checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    InputTokens,
    OutputTokens,
    ExecutionTimeMs,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::InputTokens => "input_tokens",
            Metric::OutputTokens => "output_tokens",
            Metric::ExecutionTimeMs => "execution_time_ms",
        }
    }

    pub fn value(self, snapshot: &Baseline) -> u64 {
        match self {
            Metric::InputTokens => snapshot.input_tokens,
            Metric::OutputTokens => snapshot.output_tokens,
            Metric::ExecutionTimeMs => snapshot.execution_time_ms,
        }
    }
}

/// Maximum allowed relative increase for one metric (`0.2` = +20%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub metric: Metric,
    pub max_increase: f64,
}

/// Default thresholds: input tokens +20%, output tokens +30%, wall clock +50%.
pub const DEFAULT_THRESHOLDS: [Threshold; 3] = [
    Threshold {
        metric: Metric::InputTokens,
        max_increase: 0.20,
    },
    Threshold {
        metric: Metric::OutputTokens,
        max_increase: 0.30,
    },
    Threshold {
        metric: Metric::ExecutionTimeMs,
        max_increase: 0.50,
    },
];

/// One metric that exceeded its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    pub metric: Metric,
    pub baseline: u64,
    pub current: u64,
    /// Relative increase over the baseline (`0.5` = +50%).
    pub increase: f64,
    pub max_increase: f64,
}

impl fmt::Display for Regression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} regressed: baseline={}, current={} ({:.0}% increase, max allowed {:.0}%)",
            self.metric.name(),
            self.baseline,
            self.current,
            self.increase * 100.0,
            self.max_increase * 100.0
        )
    }
}

/// Outcome of the per-test baseline state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineCheck {
    /// Record mode: the current snapshot replaced the stored one.
    Recorded,
    /// Nothing stored yet; the run passes with a warning.
    Missing,
    /// Compared against a stored snapshot. Empty means no regression.
    Compared(Vec<Regression>),
}

impl BaselineCheck {
    pub fn regressions(&self) -> &[Regression] {
        match self {
            BaselineCheck::Compared(regressions) => regressions,
            BaselineCheck::Recorded | BaselineCheck::Missing => &[],
        }
    }
}

/// Compare `current` against `baseline`, returning every regressed metric.
///
/// A zero baseline value has no meaningful relative increase and is skipped.
pub fn compare(baseline: &Baseline, current: &Baseline, thresholds: &[Threshold]) -> Vec<Regression> {
    thresholds
        .iter()
        .filter_map(|threshold| check_threshold(baseline, current, *threshold))
        .collect()
}

fn check_threshold(baseline: &Baseline, current: &Baseline, threshold: Threshold) -> Option<Regression> {
    let before = threshold.metric.value(baseline);
    if before == 0 {
        return None;
    }
    let after = threshold.metric.value(current);
    let increase = (after as f64 - before as f64) / before as f64;
    if increase > threshold.max_increase {
        Some(Regression {
            metric: threshold.metric,
            baseline: before,
            current: after,
            increase,
            max_increase: threshold.max_increase,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(input: u64, output: u64, time_ms: u64) -> Baseline {
        Baseline {
            input_tokens: input,
            output_tokens: output,
            execution_time_ms: time_ms,
            ..Baseline::default()
        }
    }

    #[test]
    fn within_thresholds_reports_nothing() {
        let prev = snapshot(1000, 100, 10_000);
        let current = snapshot(1200, 130, 15_000);
        assert!(compare(&prev, &current, &DEFAULT_THRESHOLDS).is_empty());
    }

    #[test]
    fn reports_every_regressed_metric() {
        let prev = snapshot(1000, 100, 10_000);
        let current = snapshot(1300, 200, 16_000);
        let regressions = compare(&prev, &current, &DEFAULT_THRESHOLDS);
        let metrics: Vec<Metric> = regressions.iter().map(|r| r.metric).collect();
        assert_eq!(
            metrics,
            vec![
                Metric::InputTokens,
                Metric::OutputTokens,
                Metric::ExecutionTimeMs
            ]
        );
        assert!((regressions[1].increase - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_baseline_is_skipped() {
        let prev = snapshot(0, 0, 0);
        let current = snapshot(5000, 5000, 5000);
        assert!(compare(&prev, &current, &DEFAULT_THRESHOLDS).is_empty());
    }

    #[test]
    fn decrease_is_not_a_regression() {
        let prev = snapshot(1000, 100, 10_000);
        let current = snapshot(10, 1, 100);
        assert!(compare(&prev, &current, &DEFAULT_THRESHOLDS).is_empty());
    }

    #[test]
    fn regression_message_names_metric_and_amount() {
        let prev = snapshot(0, 100, 0);
        let current = snapshot(0, 150, 0);
        let regressions = compare(&prev, &current, &DEFAULT_THRESHOLDS);
        assert_eq!(regressions.len(), 1);
        assert_eq!(
            regressions[0].to_string(),
            "output_tokens regressed: baseline=100, current=150 (50% increase, max allowed 30%)"
        );
    }

    #[test]
    fn reads_snapshot_without_cache_fields() {
        let json = r#"{
  "input_tokens": 10,
  "output_tokens": 20,
  "execution_time_ms": 30,
  "tools_used": ["Read"],
  "skills_used": []
}"#;
        let parsed: Baseline = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed.cache_read_input_tokens, 0);
        assert_eq!(parsed.tools_used, vec!["Read"]);
    }
}
