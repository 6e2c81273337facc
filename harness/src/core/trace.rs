//! Agent execution trace model.
//!
//! The agent prints its whole session as one JSON array of events on stdout.
//! Events are tagged by `type`; message-bearing events carry an ordered list
//! of content blocks. Decoding is tolerant below the event level: content
//! blocks that do not match a known shape are skipped instead of failing
//! the parse, and unknown event or block types decode to `Other`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::core::baseline::Baseline;

/// Tool name the agent uses to invoke a skill.
pub const SKILL_TOOL: &str = "Skill";

/// Prompts starting with this character are expanded as skill commands by the host.
pub const SLASH_COMMAND: char = '/';

/// One element of the agent's output array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    System(SystemEvent),
    Assistant(MessageEvent),
    User(MessageEvent),
    Result(ResultEvent),
    #[serde(other)]
    Other,
}

impl TraceEvent {
    pub fn message(&self) -> Option<&Message> {
        match self {
            TraceEvent::Assistant(event) | TraceEvent::User(event) => Some(&event.message),
            TraceEvent::System(_) | TraceEvent::Result(_) | TraceEvent::Other => None,
        }
    }
}

/// `system` event. The `init` subtype lists the skills the host registered.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skills: Vec<String>,
}

impl SystemEvent {
    pub fn is_init(&self) -> bool {
        self.subtype.as_deref() == Some("init")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageEvent {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "lenient_blocks")]
    pub content: Vec<ContentBlock>,
}

/// A typed element of a message's content.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

/// Decoded input of a [`SKILL_TOOL`] invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SkillInvocation {
    pub skill: String,
    #[serde(default)]
    pub args: Option<String>,
}

/// Borrowed view of a `tool_use` block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolUse<'a> {
    pub name: &'a str,
    pub input: &'a Value,
}

impl ToolUse<'_> {
    /// Decode the input as a skill invocation when this is the skill tool.
    pub fn skill_invocation(&self) -> Option<SkillInvocation> {
        if self.name != SKILL_TOOL {
            return None;
        }
        SkillInvocation::deserialize(self.input).ok()
    }
}

/// Token counts reported by the agent. Accepts snake_case and camelCase keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default, alias = "inputTokens", deserialize_with = "null_as_default")]
    pub input_tokens: u64,
    #[serde(default, alias = "cacheCreationInputTokens", deserialize_with = "null_as_default")]
    pub cache_creation_input_tokens: u64,
    #[serde(default, alias = "cacheReadInputTokens", deserialize_with = "null_as_default")]
    pub cache_read_input_tokens: u64,
    #[serde(default, alias = "outputTokens", deserialize_with = "null_as_default")]
    pub output_tokens: u64,
}

/// Terminal `result` event of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResultEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_error: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub duration_ms: f64,
    #[serde(default)]
    pub num_turns: Option<u32>,
    /// Final assistant answer.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default, alias = "modelUsage", deserialize_with = "null_as_default")]
    pub model_usage: BTreeMap<String, TokenUsage>,
}

/// Summary extraction found no terminal event. Carries what could be derived.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no result event found in agent output (agent may have crashed mid-run)")]
pub struct IncompleteRun {
    pub partial: Baseline,
}

/// Parsed output of one headless agent run. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    prompt: String,
    events: Vec<TraceEvent>,
    raw_output: Vec<u8>,
}

impl ExecutionResult {
    /// Decode raw agent stdout. Fails only when the bytes are not a JSON array of events.
    pub fn parse(prompt: impl Into<String>, raw_output: Vec<u8>) -> Result<Self, serde_json::Error> {
        let events: Vec<TraceEvent> = serde_json::from_slice(&raw_output)?;
        Ok(Self {
            prompt: prompt.into(),
            events,
            raw_output,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn raw_output(&self) -> &[u8] {
        &self.raw_output
    }

    /// The last `result` event, scanning backwards.
    pub fn result_event(&self) -> Option<&ResultEvent> {
        self.events.iter().rev().find_map(|event| match event {
            TraceEvent::Result(result) => Some(result),
            _ => None,
        })
    }

    /// The first `system`/`init` event.
    pub fn init_event(&self) -> Option<&SystemEvent> {
        self.events.iter().find_map(|event| match event {
            TraceEvent::System(system) if system.is_init() => Some(system),
            _ => None,
        })
    }

    /// All `tool_use` blocks across all messages, in trace order.
    pub fn tool_uses(&self) -> impl Iterator<Item = ToolUse<'_>> {
        self.events
            .iter()
            .filter_map(TraceEvent::message)
            .flat_map(|message| message.content.iter())
            .filter_map(|block| match block {
                ContentBlock::ToolUse { name, input } => Some(ToolUse { name, input }),
                _ => None,
            })
    }

    /// Distinct tool names in order of first use.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for tool in self.tool_uses() {
            push_unique(&mut names, tool.name);
        }
        names
    }

    /// Distinct skill names in order of first use.
    ///
    /// Merges skills invoked through [`SKILL_TOOL`] with a slash-command
    /// prompt, which the host expands without going through the tool. The
    /// slash form only counts when the `init` event registered that skill.
    pub fn skill_uses(&self) -> Vec<String> {
        let mut skills = Vec::new();
        for invocation in self.tool_uses().filter_map(|tool| tool.skill_invocation()) {
            if !invocation.skill.is_empty() {
                push_unique(&mut skills, &invocation.skill);
            }
        }
        if let Some(name) = slash_command(&self.prompt)
            && self.is_registered_skill(name)
        {
            push_unique(&mut skills, name);
        }
        skills
    }

    /// Whether the `init` event advertised a skill with this name.
    pub fn is_registered_skill(&self, name: &str) -> bool {
        self.init_event()
            .is_some_and(|init| init.skills.iter().any(|skill| skill == name))
    }

    /// Non-empty assistant text blocks joined by newlines.
    pub fn text_output(&self) -> String {
        let mut parts = Vec::new();
        for event in &self.events {
            let TraceEvent::Assistant(event) = event else {
                continue;
            };
            for block in &event.message.content {
                if let ContentBlock::Text { text } = block
                    && !text.is_empty()
                {
                    parts.push(text.as_str());
                }
            }
        }
        parts.join("\n")
    }

    /// Performance snapshot of this run.
    ///
    /// Without a terminal event the error still carries the tool and skill
    /// names derived from the partial trace.
    pub fn summary(&self) -> Result<Baseline, IncompleteRun> {
        let mut snapshot = Baseline {
            tools_used: self.tool_names(),
            skills_used: self.skill_uses(),
            ..Baseline::default()
        };
        let Some(result) = self.result_event() else {
            return Err(IncompleteRun { partial: snapshot });
        };
        snapshot.execution_time_ms = result.duration_ms as u64;
        if let Some(usage) = result.usage {
            snapshot.input_tokens = usage.input_tokens;
            snapshot.cache_creation_input_tokens = usage.cache_creation_input_tokens;
            snapshot.cache_read_input_tokens = usage.cache_read_input_tokens;
            snapshot.output_tokens = usage.output_tokens;
        }
        Ok(snapshot)
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !name.is_empty() && !list.iter().any(|existing| existing == name) {
        list.push(name.to_string());
    }
}

/// Leading token of a slash-command prompt, up to the first whitespace.
fn slash_command(prompt: &str) -> Option<&str> {
    let rest = prompt.strip_prefix(SLASH_COMMAND)?;
    let name = rest.split(char::is_whitespace).next().unwrap_or_default();
    (!name.is_empty()).then_some(name)
}

/// Explicit `null` decodes like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Keep the blocks that decode; a bare string becomes one text block.
fn lenient_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let blocks = match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Value::String(text) => vec![ContentBlock::Text { text }],
        _ => Vec::new(),
    };
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"[
  {"type": "system", "subtype": "init", "model": "sonnet", "skills": ["rwx:rwx", "rwx:migrate-from-gha"]},
  {"type": "user", "message": {"role": "user", "content": "/rwx:migrate-from-gha .github/workflows/ci.yml"}},
  {"type": "assistant", "message": {"role": "assistant", "content": [
    {"type": "text", "text": "Reading the workflow."},
    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "ci.yml"}},
    {"type": "thinking", "thinking": "hmm"}
  ]}},
  {"type": "user", "message": {"role": "user", "content": [
    {"type": "tool_result", "tool_use_id": "t1", "content": "name: CI"}
  ]}},
  {"type": "assistant", "message": {"role": "assistant", "content": [
    {"type": "tool_use", "id": "t2", "name": "Skill", "input": {"skill": "rwx:rwx", "args": "docs"}},
    {"type": "tool_use", "id": "t3", "name": "Write", "input": {"file_path": ".rwx/ci.yml"}},
    {"type": "tool_use", "id": "t4", "name": "Read", "input": {}},
    {"type": "tool_use", "id": "t5"}
  ]}},
  {"type": "assistant", "message": {"role": "assistant", "content": [
    {"type": "text", "text": ""},
    {"type": "text", "text": "Done."}
  ]}},
  {"type": "rate_limit", "retry_after": 3},
  {"type": "result", "subtype": "success", "is_error": false, "duration_ms": 4521.7, "num_turns": 6,
   "result": "Done.", "total_cost_usd": 0.42,
   "usage": {"input_tokens": 120, "cache_creation_input_tokens": 30, "cache_read_input_tokens": 900, "output_tokens": 55, "service_tier": "standard"},
   "modelUsage": {"claude-sonnet": {"inputTokens": 120, "outputTokens": 55, "costUSD": 0.42}}}
]"#;

    fn parse(prompt: &str, raw: &str) -> ExecutionResult {
        ExecutionResult::parse(prompt, raw.as_bytes().to_vec()).expect("parse trace")
    }

    #[test]
    fn parses_heterogeneous_events() {
        let result = parse("/rwx:migrate-from-gha .github/workflows/ci.yml", TRACE);
        assert_eq!(result.events().len(), 8);
        assert!(matches!(result.events()[6], TraceEvent::Other));
        assert_eq!(result.raw_output(), TRACE.as_bytes());

        let init = result.init_event().expect("init");
        assert_eq!(init.skills.len(), 2);

        let first_assistant = result.events()[2].message().expect("message");
        assert_eq!(first_assistant.content.len(), 3);
        assert_eq!(first_assistant.content[2], ContentBlock::Other);
    }

    #[test]
    fn string_content_becomes_text_block() {
        let result = parse("", TRACE);
        let user = result.events()[1].message().expect("message");
        assert_eq!(
            user.content,
            vec![ContentBlock::Text {
                text: "/rwx:migrate-from-gha .github/workflows/ci.yml".to_string()
            }]
        );
    }

    #[test]
    fn malformed_blocks_are_skipped() {
        let result = parse("", TRACE);
        // The tool_use block without a name is dropped.
        assert_eq!(result.tool_uses().count(), 4);
    }

    #[test]
    fn tool_names_are_distinct_in_first_use_order() {
        let result = parse("", TRACE);
        assert_eq!(result.tool_names(), vec!["Read", "Skill", "Write"]);
    }

    #[test]
    fn skill_uses_merge_tool_and_registered_slash_command() {
        let result = parse("/rwx:migrate-from-gha .github/workflows/ci.yml", TRACE);
        assert_eq!(result.skill_uses(), vec!["rwx:rwx", "rwx:migrate-from-gha"]);
    }

    #[test]
    fn slash_command_requires_registered_skill() {
        let result = parse("/tmp/ci.yml is broken, fix it", TRACE);
        assert_eq!(result.skill_uses(), vec!["rwx:rwx"]);
    }

    #[test]
    fn slash_command_is_deduplicated_against_tool_invocation() {
        let result = parse("/rwx:rwx", TRACE);
        assert_eq!(result.skill_uses(), vec!["rwx:rwx"]);
    }

    #[test]
    fn slash_command_without_init_event_is_ignored() {
        let raw = r#"[{"type": "result", "duration_ms": 1}]"#;
        let result = parse("/rwx:rwx", raw);
        assert!(result.skill_uses().is_empty());
    }

    #[test]
    fn skill_invocation_decodes_args() {
        let input = serde_json::json!({"skill": "rwx:rwx", "args": "--fast"});
        let tool = ToolUse {
            name: SKILL_TOOL,
            input: &input,
        };
        assert_eq!(
            tool.skill_invocation(),
            Some(SkillInvocation {
                skill: "rwx:rwx".to_string(),
                args: Some("--fast".to_string()),
            })
        );
        let other = ToolUse {
            name: "Read",
            input: &input,
        };
        assert_eq!(other.skill_invocation(), None);
    }

    #[test]
    fn text_output_joins_assistant_text() {
        let result = parse("", TRACE);
        assert_eq!(result.text_output(), "Reading the workflow.\nDone.");
    }

    #[test]
    fn summary_reads_terminal_event() {
        let result = parse("/rwx:migrate-from-gha x", TRACE);
        let event = result.result_event().expect("result event");
        assert_eq!(event.num_turns, Some(6));
        assert_eq!(event.model_usage["claude-sonnet"].output_tokens, 55);

        let summary = result.summary().expect("summary");
        assert_eq!(summary.execution_time_ms, 4521);
        assert_eq!(summary.input_tokens, 120);
        assert_eq!(summary.cache_creation_input_tokens, 30);
        assert_eq!(summary.cache_read_input_tokens, 900);
        assert_eq!(summary.output_tokens, 55);
        assert_eq!(summary.skills_used, vec!["rwx:rwx", "rwx:migrate-from-gha"]);
    }

    #[test]
    fn result_event_is_found_from_the_end() {
        let raw = r#"[
  {"type": "result", "duration_ms": 1},
  {"type": "assistant", "message": {"role": "assistant", "content": []}},
  {"type": "result", "duration_ms": 2}
]"#;
        let result = parse("", raw);
        assert_eq!(result.result_event().expect("result").duration_ms, 2.0);
    }

    #[test]
    fn truncated_run_reports_incomplete_with_partial_names() {
        let raw = r#"[
  {"type": "system", "subtype": "init", "skills": ["rwx:rwx"]},
  {"type": "assistant", "message": {"role": "assistant", "content": [
    {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}}
  ]}}
]"#;
        let result = parse("/rwx:rwx", raw);
        let err = result.summary().expect_err("incomplete");
        assert_eq!(err.partial.tools_used, vec!["Bash"]);
        assert_eq!(err.partial.skills_used, vec!["rwx:rwx"]);
        assert_eq!(err.partial.input_tokens, 0);
        assert!(err.to_string().contains("no result event"));
    }

    #[test]
    fn result_without_usage_has_zero_tokens() {
        let raw = r#"[{"type": "result", "duration_ms": 10}]"#;
        let summary = parse("", raw).summary().expect("summary");
        assert_eq!(summary.execution_time_ms, 10);
        assert_eq!(summary.output_tokens, 0);
    }

    #[test]
    fn null_fields_decode_as_zero_values() {
        let raw = br#"[
  {"type": "system", "subtype": "init", "skills": null},
  {"type": "assistant", "message": null},
  {"type": "assistant", "message": {"role": null, "content": null}},
  {"type": "assistant", "message": {"role": "assistant", "content": [{"type": "text", "text": null}]}},
  {"type": "result", "subtype": "success", "is_error": null, "duration_ms": null,
   "num_turns": null, "total_cost_usd": null, "modelUsage": null,
   "usage": {"input_tokens": 12, "output_tokens": null,
             "cache_creation_input_tokens": null, "cache_read_input_tokens": null}}
]"#;
        let result = ExecutionResult::parse("", raw.to_vec()).expect("nulls parse");
        assert!(result.init_event().expect("init").skills.is_empty());
        assert_eq!(result.text_output(), "");

        let event = result.result_event().expect("result");
        assert!(!event.is_error);
        assert_eq!(event.duration_ms, 0.0);
        assert!(event.model_usage.is_empty());

        let summary = result.summary().expect("complete run");
        assert_eq!(summary.input_tokens, 12);
        assert_eq!(summary.output_tokens, 0);
        assert_eq!(summary.execution_time_ms, 0);
    }

    #[test]
    fn non_array_output_is_a_decode_error() {
        let err = ExecutionResult::parse("", b"{\"type\": \"result\"}".to_vec()).expect_err("object");
        assert!(err.is_data());
        let err = ExecutionResult::parse("", b"[{\"type\": \"result\"".to_vec()).expect_err("eof");
        assert!(err.is_eof());
    }

    #[test]
    fn slash_command_token_stops_at_whitespace() {
        assert_eq!(slash_command("/rwx:rwx\nplease"), Some("rwx:rwx"));
        assert_eq!(slash_command("/ spaced"), None);
        assert_eq!(slash_command("rwx:rwx"), None);
    }
}
