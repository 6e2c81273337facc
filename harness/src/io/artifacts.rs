//! Run artifacts: the raw agent trace and per-metric info files for the CI UI.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::trace::{ExecutionResult, ResultEvent};

/// Write the agent's raw stdout verbatim.
pub fn save_raw_output(path: &Path, result: &ExecutionResult) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, result.raw_output())
        .with_context(|| format!("write agent output {}", path.display()))?;
    debug!(path = %path.display(), bytes = result.raw_output().len(), "saved agent output");
    Ok(())
}

/// Metric name and display value pairs for one run.
///
/// Cost is included only when `report_cost` is set.
pub fn info_entries(event: &ResultEvent, report_cost: bool) -> Vec<(&'static str, String)> {
    let usage = event.usage.unwrap_or_default();
    let mut entries = vec![
        ("input_tokens", usage.input_tokens.to_string()),
        ("output_tokens", usage.output_tokens.to_string()),
        (
            "cache_creation_input_tokens",
            usage.cache_creation_input_tokens.to_string(),
        ),
        (
            "cache_read_input_tokens",
            usage.cache_read_input_tokens.to_string(),
        ),
        (
            "duration_seconds",
            format!("{:.1}", event.duration_ms / 1000.0),
        ),
    ];
    if let Some(turns) = event.num_turns {
        entries.push(("num_turns", turns.to_string()));
    }
    if report_cost {
        entries.push((
            "total_cost_usd",
            format!("${:.4}", event.total_cost_usd.unwrap_or_default()),
        ));
    }
    entries
}

/// Write one `<test>-<metric>` file per entry into `info_dir`, each containing `<metric>: <value>`.
pub fn write_info(
    info_dir: &Path,
    test_name: &str,
    event: &ResultEvent,
    report_cost: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(info_dir)
        .with_context(|| format!("create directory {}", info_dir.display()))?;
    let stem = test_name.replace(['/', '\\'], "__");
    let mut written = Vec::new();
    for (metric, value) in info_entries(event, report_cost) {
        let path = info_dir.join(format!("{stem}-{metric}"));
        fs::write(&path, format!("{metric}: {value}"))
            .with_context(|| format!("write info {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trace::TokenUsage;
    use tempfile::tempdir;

    fn event() -> ResultEvent {
        ResultEvent {
            duration_ms: 12_345.0,
            num_turns: Some(7),
            total_cost_usd: Some(0.123456),
            usage: Some(TokenUsage {
                input_tokens: 1200,
                output_tokens: 340,
                cache_creation_input_tokens: 10,
                cache_read_input_tokens: 20,
            }),
            ..ResultEvent::default()
        }
    }

    #[test]
    fn cost_only_when_enabled() {
        let without = info_entries(&event(), false);
        assert!(without.iter().all(|(metric, _)| *metric != "total_cost_usd"));

        let with = info_entries(&event(), true);
        assert!(with.contains(&("total_cost_usd", "$0.1235".to_string())));
    }

    #[test]
    fn writes_one_file_per_metric() {
        let temp = tempdir().expect("tempdir");
        let written = write_info(temp.path(), "go_basic", &event(), false).expect("write");
        assert_eq!(written.len(), 6);

        let input = fs::read_to_string(temp.path().join("go_basic-input_tokens")).expect("read");
        assert_eq!(input, "input_tokens: 1200");
        let duration =
            fs::read_to_string(temp.path().join("go_basic-duration_seconds")).expect("read");
        assert_eq!(duration, "duration_seconds: 12.3");
    }

    #[test]
    fn cost_file_uses_result_event_key() {
        let temp = tempdir().expect("tempdir");
        let written = write_info(temp.path(), "go_basic", &event(), true).expect("write");
        assert_eq!(written.len(), 7);
        let cost =
            fs::read_to_string(temp.path().join("go_basic-total_cost_usd")).expect("read");
        assert_eq!(cost, "total_cost_usd: $0.1235");
        assert!(!temp.path().join("go_basic-cost_usd").exists());
    }

    #[test]
    fn raw_output_is_saved_verbatim() {
        let temp = tempdir().expect("tempdir");
        let raw = br#"[{"type":"result","duration_ms":1}]"#.to_vec();
        let result = ExecutionResult::parse("prompt", raw.clone()).expect("parse");
        let path = temp.path().join("run/agent-output.json");
        save_raw_output(&path, &result).expect("save");
        assert_eq!(fs::read(path).expect("read"), raw);
    }
}
