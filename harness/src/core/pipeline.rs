//! Pipeline configuration model.
//!
//! The agent writes declarative pipeline configs: a top-level `tasks` list
//! where each task may call a package, run an inline script, depend on other
//! tasks, set environment, run conditionally and start background
//! processes. Parsing is permissive so that malformed agent output can still
//! be inspected; referential checks (dependencies that exist, unique keys)
//! belong to assertions, not to the parser.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

/// A field that accepts either one scalar or a list of scalars.
///
/// Both encodings normalize to a list. Order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FlexStrings(pub Vec<String>);

impl FlexStrings {
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|item| item == value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a FlexStrings {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for FlexStrings {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(FlexStringsVisitor)
    }
}

struct FlexStringsVisitor;

impl<'de> Visitor<'de> for FlexStringsVisitor {
    type Value = FlexStrings;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or a list of strings")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            let text = scalar_text(&item)
                .ok_or_else(|| de::Error::custom("expected a list of scalars"))?;
            items.push(text);
        }
        Ok(FlexStrings(items))
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value.to_string()]))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value.to_string()]))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value.to_string()]))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value.to_string()]))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value.to_string()]))
    }

    fn visit_string<E: de::Error>(self, value: String) -> Result<Self::Value, E> {
        Ok(FlexStrings(vec![value]))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(FlexStrings::default())
    }
}

/// A long-running auxiliary process started alongside a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundProcess {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(
        default,
        rename = "ready-check",
        skip_serializing_if = "Option::is_none"
    )]
    pub ready_check: Option<String>,
}

/// One unit of work in a pipeline config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    /// Package reference such as `git/clone 2.0.2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
    /// Inline script body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "FlexStrings::is_empty")]
    pub uses: FlexStrings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, Value>,
    #[serde(
        default,
        deserialize_with = "env_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "FlexStrings::is_empty")]
    pub filter: FlexStrings,
    #[serde(
        default,
        rename = "background-processes",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub background_processes: Vec<BackgroundProcess>,
    /// Passed through uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<Value>,
    /// Passed through uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
}

impl Task {
    /// Split `call` into package name and optional version.
    pub fn package(&self) -> Option<(&str, Option<&str>)> {
        let call = self.call.as_deref()?.trim();
        if call.is_empty() {
            return None;
        }
        match call.split_once(' ') {
            Some((name, version)) => Some((name, Some(version.trim()))),
            None => Some((call, None)),
        }
    }

    /// Whether `call` is exactly `prefix` or `prefix` followed by a version.
    pub fn calls_package(&self, prefix: &str) -> bool {
        self.call.as_deref().is_some_and(|call| {
            call == prefix
                || call
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(' '))
        })
    }

    pub fn run_script(&self) -> &str {
        self.run.as_deref().unwrap_or_default()
    }

    /// Conditional expression, if present and non-empty.
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|expr| !expr.is_empty())
    }
}

/// A parsed pipeline config: tasks in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl PipelineConfig {
    /// Parse one config document.
    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        let config: Option<PipelineConfig> = serde_yaml::from_str(data)?;
        Ok(config.unwrap_or_default())
    }

    /// Concatenate the task lists of several configs. Key uniqueness is not enforced.
    pub fn merge<I>(configs: I) -> Self
    where
        I: IntoIterator<Item = PipelineConfig>,
    {
        let tasks = configs
            .into_iter()
            .flat_map(|config| config.tasks)
            .collect();
        Self { tasks }
    }

    /// First task with the given key.
    pub fn task(&self, key: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.key == key)
    }

    pub fn task_keys(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.key.as_str()).collect()
    }

    /// Whether any task calls `prefix`, optionally versioned.
    ///
    /// `git/clone` matches `git/clone 2.0.2` but not `git/clone-extra 1.0.0`.
    pub fn has_task_with_call(&self, prefix: &str) -> bool {
        self.tasks.iter().any(|task| task.calls_package(prefix))
    }

    pub fn calls(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter_map(|task| task.call.as_deref())
            .filter(|call| !call.is_empty())
            .collect()
    }

    /// Tasks whose inline script contains `substr`.
    pub fn tasks_with_run(&self, substr: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.run.as_deref().is_some_and(|run| run.contains(substr)))
            .collect()
    }

    /// Whether any background process key or command contains `substr`.
    pub fn has_background_process(&self, substr: &str) -> bool {
        self.tasks
            .iter()
            .flat_map(|task| task.background_processes.iter())
            .any(|process| {
                process.key.contains(substr)
                    || process
                        .run
                        .as_deref()
                        .is_some_and(|run| run.contains(substr))
            })
    }

    /// Whether `task_key` lists `dep` in `use`. Unknown tasks yield `false`.
    pub fn depends_on(&self, task_key: &str, dep: &str) -> bool {
        self.task(task_key).is_some_and(|task| task.uses.contains(dep))
    }

    /// Dependencies that name no task in this config, as `(task, dep)` pairs.
    pub fn dangling_dependencies(&self) -> Vec<(&str, &str)> {
        self.tasks
            .iter()
            .flat_map(|task| {
                task.uses
                    .iter()
                    .filter(|dep| self.task(dep).is_none())
                    .map(move |dep| (task.key.as_str(), dep.as_str()))
            })
            .collect()
    }
}

/// Env values may be scalars of any kind or `{ value: .., cache-key: .. }` maps.
fn env_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Value>> = Option::deserialize(deserializer)?;
    let mut env = BTreeMap::new();
    for (key, value) in raw.unwrap_or_default() {
        let text = env_value(&value)
            .ok_or_else(|| de::Error::custom(format!("env {key}: expected a scalar value")))?;
        env.insert(key, text);
    }
    Ok(env)
}

/// Text of a plain YAML scalar; `None` for null, mappings and sequences.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn env_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Null => Some(String::new()),
        Value::Mapping(map) => map.get("value").and_then(env_value),
        Value::Tagged(tagged) => env_value(&tagged.value),
        Value::Sequence(_) => None,
    }
}
