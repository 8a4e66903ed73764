//! The fixed tool set: manifest entries and typed call parsing.
//!
//! Model replies name tools by string. [`ToolCall::parse`] turns a name plus a
//! JSON input into one of four closed variants, validating the input against
//! the same JSON Schema the model was shown.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Placeholder logged instead of `write_file` content.
pub const HIDDEN_CONTENT: &str = "[content hidden]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    RunShell,
    ReadFile,
    WriteFile,
    EditFile,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::RunShell,
        ToolKind::ReadFile,
        ToolKind::WriteFile,
        ToolKind::EditFile,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::RunShell => "run_shell",
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::EditFile => "edit_file",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::RunShell => {
                "Execute a shell command in the working directory. Returns combined stdout/stderr and the exit code."
            }
            ToolKind::ReadFile => {
                "Read the full contents of a file. Relative paths resolve against the working directory."
            }
            ToolKind::WriteFile => {
                "Create or overwrite a file with the given content. Parent directories are created."
            }
            ToolKind::EditFile => {
                "Replace a specific block of text in a file. Every occurrence of old_str is replaced, so pick a unique anchor."
            }
        }
    }

    pub fn input_schema(self) -> Value {
        match self {
            ToolKind::RunShell => string_args_schema(&["command"]),
            ToolKind::ReadFile => string_args_schema(&["path"]),
            ToolKind::WriteFile => string_args_schema(&["path", "content"]),
            ToolKind::EditFile => string_args_schema(&["path", "old_str", "new_str"]),
        }
    }

    pub fn spec(self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }

    fn validator(self) -> &'static Validator {
        match self {
            ToolKind::RunShell => &VALIDATORS[0],
            ToolKind::ReadFile => &VALIDATORS[1],
            ToolKind::WriteFile => &VALIDATORS[2],
            ToolKind::EditFile => &VALIDATORS[3],
        }
    }
}

static VALIDATORS: LazyLock<[Validator; 4]> =
    LazyLock::new(|| ToolKind::ALL.map(|kind| compile_schema(&kind.input_schema())));

fn compile_schema(schema: &Value) -> Validator {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .expect("tool input schema should be valid")
}

fn string_args_schema(required: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = required
        .iter()
        .map(|name| (name.to_string(), json!({"type": "string"})))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Manifest entry sent to the model provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Manifest for all four tools, in a stable order.
pub fn tool_manifest() -> Vec<ToolSpec> {
    ToolKind::ALL.into_iter().map(ToolKind::spec).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: &'static str, message: String },
}

/// A parsed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    RunShell {
        command: String,
    },
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        old_str: String,
        new_str: String,
    },
}

#[derive(Deserialize)]
struct RunShellArgs {
    command: String,
}

#[derive(Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct EditFileArgs {
    path: String,
    old_str: String,
    new_str: String,
}

impl ToolCall {
    pub fn parse(name: &str, input: &Value) -> Result<Self, ToolCallError> {
        let kind =
            ToolKind::from_name(name).ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;

        let messages: Vec<String> = kind
            .validator()
            .iter_errors(input)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(ToolCallError::InvalidInput {
                tool: kind.name(),
                message: messages.join("; "),
            });
        }

        let call = match kind {
            ToolKind::RunShell => {
                let args: RunShellArgs = decode(kind, input)?;
                ToolCall::RunShell {
                    command: args.command,
                }
            }
            ToolKind::ReadFile => {
                let args: ReadFileArgs = decode(kind, input)?;
                ToolCall::ReadFile { path: args.path }
            }
            ToolKind::WriteFile => {
                let args: WriteFileArgs = decode(kind, input)?;
                ToolCall::WriteFile {
                    path: args.path,
                    content: args.content,
                }
            }
            ToolKind::EditFile => {
                let args: EditFileArgs = decode(kind, input)?;
                ToolCall::EditFile {
                    path: args.path,
                    old_str: args.old_str,
                    new_str: args.new_str,
                }
            }
        };
        Ok(call)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::RunShell { .. } => ToolKind::RunShell,
            ToolCall::ReadFile { .. } => ToolKind::ReadFile,
            ToolCall::WriteFile { .. } => ToolKind::WriteFile,
            ToolCall::EditFile { .. } => ToolKind::EditFile,
        }
    }

    /// Arguments as recorded in the audit log (file content is hidden).
    pub fn audit_args(&self) -> Value {
        match self {
            ToolCall::RunShell { command } => json!({ "command": command }),
            ToolCall::ReadFile { path } => json!({ "path": path }),
            ToolCall::WriteFile { path, .. } => json!({ "path": path, "content": HIDDEN_CONTENT }),
            ToolCall::EditFile {
                path,
                old_str,
                new_str,
            } => json!({ "path": path, "old_str": old_str, "new_str": new_str }),
        }
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, input: &Value) -> Result<T, ToolCallError> {
    serde_json::from_value(input.clone()).map_err(|err| ToolCallError::InvalidInput {
        tool: kind.name(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lists_four_tools_with_required_args() {
        let manifest = tool_manifest();
        let names: Vec<&str> = manifest.iter().map(|spec| spec.name.as_str()).collect();
        assert_eq!(names, vec!["run_shell", "read_file", "write_file", "edit_file"]);

        let edit = &manifest[3];
        assert_eq!(
            edit.input_schema["required"],
            json!(["path", "old_str", "new_str"])
        );
        assert_eq!(
            edit.input_schema["properties"]["old_str"],
            json!({"type": "string"})
        );
    }

    #[test]
    fn parses_each_tool() {
        assert_eq!(
            ToolCall::parse("run_shell", &json!({"command": "pytest"})).expect("parse"),
            ToolCall::RunShell {
                command: "pytest".to_string()
            }
        );
        assert_eq!(
            ToolCall::parse("write_file", &json!({"path": "a.py", "content": "x"}))
                .expect("parse")
                .kind(),
            ToolKind::WriteFile
        );
        assert_eq!(
            ToolCall::parse(
                "edit_file",
                &json!({"path": "a.py", "old_str": "a", "new_str": "b"})
            )
            .expect("parse"),
            ToolCall::EditFile {
                path: "a.py".to_string(),
                old_str: "a".to_string(),
                new_str: "b".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_tool_by_name() {
        let err = ToolCall::parse("delete_everything", &json!({})).expect_err("unknown");
        assert_eq!(
            err,
            ToolCallError::UnknownTool("delete_everything".to_string())
        );
    }

    #[test]
    fn rejects_input_that_misses_required_fields() {
        let err = ToolCall::parse("read_file", &json!({"file": "a.py"})).expect_err("invalid");
        match err {
            ToolCallError::InvalidInput { tool, message } => {
                assert_eq!(tool, "read_file");
                assert!(message.contains("path"), "message: {message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_wrongly_typed_input() {
        let err = ToolCall::parse("run_shell", &json!({"command": 42})).expect_err("invalid");
        assert!(matches!(err, ToolCallError::InvalidInput { tool: "run_shell", .. }));
    }

    #[test]
    fn audit_args_hide_written_content() {
        let call = ToolCall::WriteFile {
            path: "a.py".to_string(),
            content: "secret body".to_string(),
        };
        assert_eq!(
            call.audit_args(),
            json!({"path": "a.py", "content": HIDDEN_CONTENT})
        );
    }
}
