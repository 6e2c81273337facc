//! Composable assertions over a [`PipelineConfig`].
//!
//! An assertion is a name plus a check that reports failures through the
//! narrow [`Reporter`] capability. Because a reporter only records failure,
//! the same assertion works as a hard check (a [`Recorder`] whose messages
//! end up in the run judgment) and as a soft probe (a [`Probe`] that only
//! flips a flag). [`either`] uses probes to try alternatives without
//! leaking a failing candidate into the outer result.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::pipeline::PipelineConfig;

/// The only capability a check gets: mark failure with a message.
pub trait Reporter {
    fn fail(&mut self, message: String);
}

/// Records failure as a flag and discards the message.
#[derive(Debug, Default)]
pub struct Probe {
    failed: bool,
}

impl Probe {
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Reporter for Probe {
    fn fail(&mut self, _message: String) {
        self.failed = true;
    }
}

/// Keeps every failure message.
#[derive(Debug, Default)]
pub struct Recorder {
    messages: Vec<String>,
}

impl Recorder {
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }
}

impl Reporter for Recorder {
    fn fail(&mut self, message: String) {
        self.messages.push(message);
    }
}

type CheckFn = dyn Fn(&mut dyn Reporter, &PipelineConfig) + Send + Sync;

/// A named check against a parsed config. Never mutates the config.
#[derive(Clone)]
pub struct ConfigAssertion {
    name: String,
    check: Arc<CheckFn>,
}

impl fmt::Debug for ConfigAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigAssertion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ConfigAssertion {
    pub fn new<F>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&mut dyn Reporter, &PipelineConfig) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn check(&self, reporter: &mut dyn Reporter, config: &PipelineConfig) {
        (self.check)(reporter, config);
    }

    /// Run against a probe and report whether nothing failed.
    pub fn passes(&self, config: &PipelineConfig) -> bool {
        let mut probe = Probe::default();
        self.check(&mut probe, config);
        !probe.failed()
    }
}

/// Result of one assertion inside [`run_assertions`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub name: String,
    pub passed: bool,
    pub messages: Vec<String>,
}

/// Evaluate every assertion independently; no short-circuiting.
pub fn run_assertions(config: &PipelineConfig, assertions: &[ConfigAssertion]) -> Vec<AssertionOutcome> {
    assertions
        .iter()
        .map(|assertion| {
            let mut recorder = Recorder::default();
            assertion.check(&mut recorder, config);
            let messages = recorder.into_messages();
            AssertionOutcome {
                name: assertion.name().to_string(),
                passed: messages.is_empty(),
                messages,
            }
        })
        .collect()
}

/// A task with the given key exists.
pub fn has_task(key: &str) -> ConfigAssertion {
    let key = key.to_string();
    ConfigAssertion::new(format!("has_task_{key}"), move |t, cfg| {
        if cfg.task(&key).is_none() {
            t.fail(format!(
                "expected task {key:?} to exist, got tasks: {:?}",
                cfg.task_keys()
            ));
        }
    })
}

/// Some task calls a package with the given prefix, optionally versioned.
pub fn has_package(call_prefix: &str) -> ConfigAssertion {
    let prefix = call_prefix.to_string();
    ConfigAssertion::new(format!("has_package_{}", sanitize_name(call_prefix)), move |t, cfg| {
        if !cfg.has_task_with_call(&prefix) {
            t.fail(format!(
                "expected a task calling {prefix:?}, got calls: {:?}",
                cfg.calls()
            ));
        }
    })
}

/// Some task's inline script contains the substring.
pub fn has_run_containing(substr: &str) -> ConfigAssertion {
    let needle = substr.to_string();
    ConfigAssertion::new(format!("has_run_{}", sanitize_name(substr)), move |t, cfg| {
        if cfg.tasks_with_run(&needle).is_empty() {
            let runs: Vec<String> = cfg
                .tasks
                .iter()
                .filter(|task| !task.run_script().is_empty())
                .map(|task| format!("{}: {}", task.key, first_line(task.run_script())))
                .collect();
            t.fail(format!(
                "expected a task with run containing {needle:?}, got: {runs:?}"
            ));
        }
    })
}

/// The task `task_key` lists `dep` in its `use` field.
pub fn task_depends_on(task_key: &str, dep: &str) -> ConfigAssertion {
    let task_key = task_key.to_string();
    let dep = dep.to_string();
    ConfigAssertion::new(format!("task_{task_key}_depends_on_{dep}"), move |t, cfg| {
        let Some(task) = cfg.task(&task_key) else {
            t.fail(format!("task {task_key:?} does not exist"));
            return;
        };
        if !cfg.depends_on(&task_key, &dep) {
            t.fail(format!(
                "expected task {task_key:?} to depend on {dep:?}, got use: {:?}",
                task.uses.0
            ));
        }
    })
}

/// Some task has a background process whose key or command contains the substring.
pub fn has_service(substr: &str) -> ConfigAssertion {
    let needle = substr.to_string();
    ConfigAssertion::new(format!("has_service_{}", sanitize_name(substr)), move |t, cfg| {
        if !cfg.has_background_process(&needle) {
            let services: Vec<&str> = cfg
                .tasks
                .iter()
                .flat_map(|task| task.background_processes.iter())
                .map(|process| process.key.as_str())
                .collect();
            t.fail(format!(
                "expected a background process matching {needle:?}, got: {services:?}"
            ));
        }
    })
}

/// Some task sets the env var, either in `env` or as `KEY=` inside its script.
pub fn has_env_var(env_key: &str) -> ConfigAssertion {
    let env_key = env_key.to_string();
    ConfigAssertion::new(format!("has_env_{}", sanitize_name(&env_key)), move |t, cfg| {
        let assignment = format!("{env_key}=");
        let found = cfg.tasks.iter().any(|task| {
            task.env.contains_key(&env_key) || task.run_script().contains(&assignment)
        });
        if !found {
            let keys: Vec<&str> = cfg
                .tasks
                .iter()
                .flat_map(|task| task.env.keys())
                .map(String::as_str)
                .collect();
            t.fail(format!(
                "expected some task to have env var {env_key:?}, got env keys: {keys:?}"
            ));
        }
    })
}

/// Some task references `secrets.<name>` in its script, env or `with` values.
///
/// Covers both `${{ secrets.NAME }}` and `${{ vaults.<vault>.secrets.NAME }}`.
pub fn has_secret_ref(secret_name: &str) -> ConfigAssertion {
    let needle = format!("secrets.{secret_name}");
    ConfigAssertion::new(format!("has_secret_{}", sanitize_name(secret_name)), move |t, cfg| {
        let found = cfg.tasks.iter().any(|task| {
            task.run_script().contains(&needle)
                || task.env.values().any(|value| value.contains(&needle))
                || task
                    .with
                    .values()
                    .any(|value| value.as_str().is_some_and(|text| text.contains(&needle)))
        });
        if !found {
            t.fail(format!("expected some task to reference {needle:?}, found none"));
        }
    })
}

/// The task `task_key` has a non-empty `if` expression.
pub fn has_conditional(task_key: &str) -> ConfigAssertion {
    let task_key = task_key.to_string();
    ConfigAssertion::new(format!("task_{task_key}_has_conditional"), move |t, cfg| {
        let Some(task) = cfg.task(&task_key) else {
            t.fail(format!("task {task_key:?} does not exist"));
            return;
        };
        if task.condition().is_none() {
            t.fail(format!(
                "expected task {task_key:?} to have a conditional (if field), but it was empty"
            ));
        }
    })
}

/// The config has at least `n` tasks.
pub fn min_task_count(n: usize) -> ConfigAssertion {
    ConfigAssertion::new(format!("min_task_count_{n}"), move |t, cfg| {
        if cfg.tasks.len() < n {
            t.fail(format!(
                "expected at least {n} tasks, got {}: {:?}",
                cfg.tasks.len(),
                cfg.task_keys()
            ));
        }
    })
}

/// Passes if at least one alternative passes.
///
/// Each alternative runs against its own [`Probe`], so a failing candidate
/// never reaches the outer reporter. When all fail, one failure lists the
/// names that were tried.
pub fn either(name: &str, alternatives: Vec<ConfigAssertion>) -> ConfigAssertion {
    ConfigAssertion::new(name, move |t, cfg| {
        let mut tried = Vec::with_capacity(alternatives.len());
        for alternative in &alternatives {
            if alternative.passes(cfg) {
                return;
            }
            tried.push(alternative.name());
        }
        t.fail(format!("none of the alternatives passed: {tried:?}"));
    })
}

/// Turn a free-form argument into an identifier-safe assertion name fragment.
pub fn sanitize_name(s: &str) -> String {
    s.chars()
        .filter_map(|ch| match ch {
            '/' | ' ' | '.' | '-' => Some('_'),
            '$' | '{' | '}' => None,
            other => Some(other),
        })
        .collect()
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}
