//! Process-level tests for the agent runner.
//!
//! A shell script stands in for the agent binary: it drains the prompt from
//! stdin and prints a canned trace, exits non-zero, hangs, or prints garbage.

use std::time::{Duration, Instant};

use harness::io::agent::{AgentError, AgentRequest, AgentRunner, ClaudeRunner};
use harness::io::settings::EvalSettings;
use harness::test_support::sample_trace;
use tempfile::tempdir;

fn runner_with_script(script: &str) -> ClaudeRunner {
    let settings = EvalSettings {
        agent_command: vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ],
        ..EvalSettings::default()
    };
    ClaudeRunner::new(settings, "/repo")
}

fn request(workdir: &std::path::Path, timeout: Duration) -> AgentRequest {
    AgentRequest {
        workdir: workdir.to_path_buf(),
        prompt: "generate a CI config".to_string(),
        timeout,
    }
}

#[test]
fn parses_trace_from_stdout() {
    let temp = tempdir().expect("tempdir");
    let trace_path = temp.path().join("trace.json");
    std::fs::write(&trace_path, sample_trace("rwx", 1200, 300, 4500)).expect("write trace");
    let script = format!("cat >/dev/null; cat '{}'", trace_path.display());

    let result = runner_with_script(&script)
        .run(&request(temp.path(), Duration::from_secs(10)))
        .expect("agent run");

    assert_eq!(result.prompt(), "generate a CI config");
    assert_eq!(result.skill_uses(), vec!["rwx"]);
    let summary = result.summary().expect("summary");
    assert_eq!(summary.input_tokens, 1200);
    assert_eq!(summary.output_tokens, 300);
    assert_eq!(summary.execution_time_ms, 4500);
}

#[test]
fn receives_prompt_on_stdin_and_runs_in_workdir() {
    let temp = tempdir().expect("tempdir");
    let script = r#"prompt=$(cat); printf '%s' "$prompt" > prompt.txt; printf '%s' "$*" > args.txt; printf '[]'"#;

    runner_with_script(script)
        .run(&request(temp.path(), Duration::from_secs(10)))
        .expect("agent run");

    let prompt = std::fs::read_to_string(temp.path().join("prompt.txt")).expect("prompt");
    assert_eq!(prompt, "generate a CI config");
    let args = std::fs::read_to_string(temp.path().join("args.txt")).expect("args");
    assert!(args.starts_with("--print --output-format json"));
    assert!(args.contains("--plugin-dir /repo"));
}

#[test]
fn non_zero_exit_carries_both_streams() {
    let temp = tempdir().expect("tempdir");
    let err = runner_with_script("cat >/dev/null; echo partial; echo boom >&2; exit 3")
        .run(&request(temp.path(), Duration::from_secs(10)))
        .expect_err("agent fails");

    match &err {
        AgentError::Exited { code, stderr, stdout } => {
            assert_eq!(*code, Some(3));
            assert!(stderr.contains("boom"));
            assert!(stdout.contains("partial"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let message = err.to_string();
    assert!(message.contains("stderr: boom"));
    assert!(message.contains("stdout: partial"));
}

#[test]
fn hung_agent_times_out() {
    let temp = tempdir().expect("tempdir");
    let err = runner_with_script("cat >/dev/null; exec sleep 5")
        .run(&request(temp.path(), Duration::from_millis(300)))
        .expect_err("agent times out");
    assert!(matches!(err, AgentError::TimedOut { .. }), "got {err:?}");
}

#[test]
fn agent_with_spawned_children_times_out_promptly() {
    let temp = tempdir().expect("tempdir");
    let started = Instant::now();
    let err = runner_with_script("cat >/dev/null; sleep 5; echo late")
        .run(&request(temp.path(), Duration::from_millis(300)))
        .expect_err("agent times out");
    assert!(matches!(err, AgentError::TimedOut { .. }), "got {err:?}");
    assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
}

#[test]
fn undecodable_output_embeds_raw_text() {
    let temp = tempdir().expect("tempdir");
    let err = runner_with_script("cat >/dev/null; echo 'Error: not logged in'")
        .run(&request(temp.path(), Duration::from_secs(10)))
        .expect_err("decode fails");
    assert!(matches!(err, AgentError::Decode { .. }), "got {err:?}");
    assert!(err.to_string().contains("raw output: Error: not logged in"));
}

#[test]
fn missing_binary_is_a_launch_error() {
    let temp = tempdir().expect("tempdir");
    let settings = EvalSettings {
        agent_command: vec!["definitely-not-an-agent-7731".to_string()],
        ..EvalSettings::default()
    };
    let err = ClaudeRunner::new(settings, "/repo")
        .run(&request(temp.path(), Duration::from_secs(5)))
        .expect_err("launch fails");
    assert!(matches!(err, AgentError::Launch { .. }), "got {err:?}");
}
