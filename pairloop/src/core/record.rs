//! Normalization of reassembled records into a [`ParsedOutput`].
//!
//! Structured records come from an external process whose field names drift
//! between versions, so every logical field is looked up through a short list
//! of aliases and silently defaults to absent. Plain-text records are scanned
//! line by line for session markers, file mentions and shell commands.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::core::patterns::{PhraseCategory, matches};
use crate::core::reassembler::Record;
use crate::core::types::{ParsedOutput, push_unique, truncate_chars};

const RESULT_KEYS: &[&str] = &["result", "response", "content", "text", "output"];
const SESSION_KEYS: &[&str] = &["session_id", "sessionId", "session"];
const COST_KEYS: &[&str] = &["total_cost_usd", "cost_usd", "cost"];
const ERROR_KEYS: &[&str] = &["error", "error_message", "errorMessage"];
const TOOL_KEYS: &[&str] = &["tools", "tools_used", "tool_calls"];
const FILE_KEYS: &[&str] = &["files", "files_modified", "modified_files"];
const COMMAND_KEYS: &[&str] = &["commands", "commands_run"];
const TOOL_PATH_KEYS: &[&str] = &["file_path", "path", "notebook_path"];

const MAX_SIGNAL_CHARS: usize = 200;

static SESSION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bsession[ _-]?id\s*[:=]\s*([A-Za-z0-9._-]+)").unwrap()
});

static FILE_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)(?:\bfile\s+(?:created|modified|updated|written)|\b(?:created|modified|updated|wrote)\s+file)\s*:?\s*["'`]([^"'`\n]+)["'`]"#,
    )
    .unwrap()
});

static SHELL_PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[$❯]\s+(\S.*?)\s*$").unwrap());

/// Normalized output plus the human-readable text it was derived from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub output: ParsedOutput,
    /// Every prose fragment in arrival order, newline-joined; the input for
    /// phrase matching and work-item extraction.
    pub narrative: String,
}

#[derive(Default)]
struct Accumulator {
    output: ParsedOutput,
    structured_result: Option<String>,
    assistant_text: Vec<String>,
    plain_text: Vec<String>,
    narrative: Vec<String>,
    /// Tool failures not yet superseded by a later successful step.
    open_tool_failures: Vec<String>,
}

/// Fold a record sequence into one [`Extraction`].
///
/// The result text is the last structured result when one exists, else the
/// assistant message text, else the plain-text lines.
pub fn extract(records: &[Record]) -> Extraction {
    let mut acc = Accumulator::default();
    for record in records {
        match record {
            Record::Structured(value) => acc.absorb_structured(value),
            Record::Text(line) => acc.absorb_text(line),
        }
    }
    acc.finish()
}

impl Accumulator {
    fn absorb_structured(&mut self, value: &Value) {
        let Some(object) = value.as_object() else {
            return;
        };

        if let Some(token) = first_string(value, SESSION_KEYS) {
            self.output.continuation_token = Some(token.to_string());
        }
        // Init events list every available tool; only the session id matters.
        if object.get("type").and_then(Value::as_str) == Some("system") {
            return;
        }

        if let Some(cost) = first_number(value, COST_KEYS) {
            self.output.cost_usd = Some(cost);
        }

        let result = first_string(value, RESULT_KEYS);
        if let Some(result) = result {
            self.structured_result = Some(result.to_string());
            self.narrative.push(result.to_string());
        }

        if let Some(error) = first_error(value) {
            self.push_error(&error);
        }
        match object.get("is_error").and_then(Value::as_bool) {
            Some(true) => {
                let detail = result
                    .or_else(|| object.get("subtype").and_then(Value::as_str))
                    .unwrap_or("process reported an error");
                self.push_error(detail);
            }
            Some(false) => self.recover_tool_failures(),
            None => {}
        }

        for key in TOOL_KEYS {
            collect_names(object.get(*key), "name", &mut self.output.tools);
        }
        for key in FILE_KEYS {
            collect_names(object.get(*key), "path", &mut self.output.files);
        }
        for key in COMMAND_KEYS {
            collect_names(object.get(*key), "command", &mut self.output.commands);
        }

        if let Some(blocks) = object
            .get("message")
            .and_then(|message| message.get("content"))
            .and_then(Value::as_array)
        {
            for block in blocks {
                self.absorb_content_block(block);
            }
        }
    }

    fn absorb_content_block(&mut self, block: &Value) {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    self.assistant_text.push(text.to_string());
                    self.narrative.push(text.to_string());
                }
            }
            Some("tool_use") => {
                if let Some(name) = block.get("name").and_then(Value::as_str) {
                    push_unique(&mut self.output.tools, name);
                }
                let input = block.get("input");
                if let Some(command) = input
                    .and_then(|input| input.get("command"))
                    .and_then(Value::as_str)
                {
                    push_unique(&mut self.output.commands, command);
                }
                if let Some(input) = input
                    && let Some(path) = first_string(input, TOOL_PATH_KEYS)
                {
                    push_unique(&mut self.output.files, path);
                }
            }
            Some("tool_result") => {
                if block.get("is_error").and_then(Value::as_bool) == Some(true) {
                    let detail = tool_result_text(block.get("content"))
                        .unwrap_or_else(|| "tool call failed".to_string());
                    let line = self.push_error(&detail);
                    push_unique(&mut self.open_tool_failures, &line);
                } else {
                    self.recover_tool_failures();
                }
            }
            _ => {}
        }
    }

    fn absorb_text(&mut self, line: &str) {
        if let Some(caps) = SESSION_MARKER.captures(line) {
            self.output.continuation_token = Some(caps[1].to_string());
        }
        for caps in FILE_MENTION.captures_iter(line) {
            push_unique(&mut self.output.files, &caps[1]);
        }
        if let Some(caps) = SHELL_PROMPT.captures(line) {
            push_unique(&mut self.output.commands, &caps[1]);
        }
        self.plain_text.push(line.to_string());
        self.narrative.push(line.to_string());
    }

    fn push_error(&mut self, detail: &str) -> String {
        let line = first_line(detail);
        if self.output.error.is_none() && !line.is_empty() {
            self.output.error = Some(line.clone());
        }
        push_unique(&mut self.output.errors, &line);
        line
    }

    /// A later successful step supersedes earlier tool failures: they move
    /// from `errors` to `recovered`.
    fn recover_tool_failures(&mut self) {
        for failure in self.open_tool_failures.drain(..) {
            self.output.errors.retain(|error| *error != failure);
            push_unique(&mut self.output.recovered, &failure);
        }
        if self
            .output
            .error
            .as_ref()
            .is_some_and(|error| !self.output.errors.contains(error))
        {
            self.output.error = self.output.errors.first().cloned();
        }
    }

    fn finish(mut self) -> Extraction {
        let narrative = self.narrative.join("\n");
        for line in narrative.lines() {
            if matches(PhraseCategory::Error, line) {
                push_unique(
                    &mut self.output.errors,
                    &truncate_chars(line.trim(), MAX_SIGNAL_CHARS),
                );
            }
            if matches(PhraseCategory::Success, line) {
                push_unique(
                    &mut self.output.successes,
                    &truncate_chars(line.trim(), MAX_SIGNAL_CHARS),
                );
            }
        }

        self.output.result = match self.structured_result {
            Some(result) => result,
            None if !self.assistant_text.is_empty() => self.assistant_text.join("\n"),
            None => self.plain_text.join("\n"),
        };

        Extraction {
            output: self.output,
            narrative,
        }
    }
}

fn first_string<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(Value::as_str)
        .filter(|text| !text.trim().is_empty())
}

fn first_number(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find_map(|field| match field {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
}

fn first_error(value: &Value) -> Option<String> {
    ERROR_KEYS
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|field| match field {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            Value::Object(_) => field
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
}

/// Accept either an array of strings or an array of objects carrying `field`.
fn collect_names(list: Option<&Value>, field: &str, into: &mut Vec<String>) {
    let Some(items) = list.and_then(Value::as_array) else {
        return;
    };
    for item in items {
        let name = match item {
            Value::String(text) => Some(text.as_str()),
            Value::Object(_) => item.get(field).and_then(Value::as_str),
            _ => None,
        };
        if let Some(name) = name {
            push_unique(into, name);
        }
    }
}

fn tool_result_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}

fn first_line(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    truncate_chars(line, MAX_SIGNAL_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(line: &str) -> Record {
        Record::Text(line.to_string())
    }

    #[test]
    fn aliases_fill_normalized_fields() {
        let records = vec![Record::Structured(json!({
            "response": "done",
            "sessionId": "abc-123",
            "cost": "0.25",
            "tools_used": ["Edit", {"name": "Bash"}],
            "modified_files": ["src/lib.rs"],
            "commands_run": ["cargo fmt"],
        }))];

        let output = extract(&records).output;
        assert_eq!(output.result, "done");
        assert_eq!(output.continuation_token.as_deref(), Some("abc-123"));
        assert_eq!(output.cost_usd, Some(0.25));
        assert_eq!(output.tools, vec!["Edit", "Bash"]);
        assert_eq!(output.files, vec!["src/lib.rs"]);
        assert_eq!(output.commands, vec!["cargo fmt"]);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let output = extract(&[Record::Structured(json!({"unrelated": 1}))]).output;
        assert_eq!(output, ParsedOutput::default());
    }

    #[test]
    fn stream_events_contribute_text_tools_and_cost() {
        let records = vec![
            Record::Structured(json!({
                "type": "system", "subtype": "init", "session_id": "s-1",
                "tools": ["Bash", "Edit", "Read"]
            })),
            Record::Structured(json!({
                "type": "assistant",
                "message": {"content": [
                    {"type": "text", "text": "Running the tests."},
                    {"type": "tool_use", "name": "Bash", "input": {"command": "cargo test"}},
                    {"type": "tool_use", "name": "Edit", "input": {"file_path": "src/main.rs"}}
                ]}
            })),
            Record::Structured(json!({
                "type": "result", "subtype": "success", "is_error": false,
                "result": "All tests passed", "session_id": "s-1", "total_cost_usd": 0.12
            })),
        ];

        let output = extract(&records).output;
        assert_eq!(output.result, "All tests passed");
        assert_eq!(output.tools, vec!["Bash", "Edit"]);
        assert_eq!(output.commands, vec!["cargo test"]);
        assert_eq!(output.files, vec!["src/main.rs"]);
        assert_eq!(output.cost_usd, Some(0.12));
        assert_eq!(output.continuation_token.as_deref(), Some("s-1"));
        assert_eq!(output.successes, vec!["All tests passed"]);
        assert!(output.errors.is_empty());
    }

    #[test]
    fn error_flags_and_failed_tool_results_become_errors() {
        let records = vec![
            Record::Structured(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "is_error": true, "content": "command exited 101\nmore"}
                ]}
            })),
            Record::Structured(json!({"error": {"message": "rate limited"}})),
        ];

        let output = extract(&records).output;
        assert_eq!(output.error.as_deref(), Some("command exited 101"));
        assert_eq!(output.errors, vec!["command exited 101", "rate limited"]);
    }

    #[test]
    fn later_success_supersedes_tool_failures() {
        let records = vec![
            Record::Structured(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "is_error": true, "content": "File does not exist."}
                ]}
            })),
            Record::Structured(json!({"error": "rate limited"})),
            Record::Structured(json!({
                "type": "user",
                "message": {"content": [
                    {"type": "tool_result", "content": "fn main() {}"}
                ]}
            })),
        ];

        let output = extract(&records).output;
        assert_eq!(output.errors, vec!["rate limited"]);
        assert_eq!(output.error.as_deref(), Some("rate limited"));
        assert_eq!(output.recovered, vec!["File does not exist."]);
    }

    #[test]
    fn assistant_text_is_result_without_result_record() {
        let records = vec![Record::Structured(json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": "Plan drafted."}]}
        }))];
        assert_eq!(extract(&records).output.result, "Plan drafted.");
    }

    #[test]
    fn text_lines_yield_markers_files_and_commands() {
        let records = vec![
            text("Session ID: 7f3a-beta"),
            text("$ cargo build --release"),
            text("File created: \"src/cache.rs\""),
            text("Modified file 'src/lib.rs'"),
            text("Error: connection refused"),
        ];

        let extraction = extract(&records);
        let output = extraction.output;
        assert_eq!(output.continuation_token.as_deref(), Some("7f3a-beta"));
        assert_eq!(output.commands, vec!["cargo build --release"]);
        assert_eq!(output.files, vec!["src/cache.rs", "src/lib.rs"]);
        assert_eq!(output.errors, vec!["Error: connection refused"]);
        assert!(output.successes.is_empty());
        assert!(output.result.starts_with("Session ID: 7f3a-beta\n"));
        assert!(extraction.narrative.ends_with("Error: connection refused"));
    }

    #[test]
    fn markdown_headings_are_not_commands() {
        let output = extract(&[text("# Summary"), text("> quoted")]).output;
        assert!(output.commands.is_empty());
    }
}
