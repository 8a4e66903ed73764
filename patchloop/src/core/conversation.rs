//! Append-only conversation model shared by the loop controller and the gateway.
//!
//! The serialized form of [`Turn`] and [`ContentBlock`] matches the provider's
//! message format, so a conversation can be sent as-is and dumped verbatim
//! into the session transcript.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One item of structured turn content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// A tool call requested by the model.
    #[serde(rename = "tool_use")]
    ToolInvocation {
        id: String,
        name: String,
        input: Value,
    },
    /// The answer to a [`ContentBlock::ToolInvocation`] with the same id.
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn invocation(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::ToolInvocation {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Turn payload: plain text or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(text.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Blocks(blocks),
        }
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Blocks(blocks),
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match &self.content {
            TurnContent::Text(_) => &[],
            TurnContent::Blocks(blocks) => blocks,
        }
    }

    /// Tool invocations in the order the model listed them.
    pub fn tool_invocations(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.blocks().iter().filter_map(|block| match block {
            ContentBlock::ToolInvocation { id, name, input } => {
                Some((id.as_str(), name.as_str(), input))
            }
            _ => None,
        })
    }

    /// Concatenated text blocks (or the plain text payload).
    pub fn text(&self) -> String {
        match &self.content {
            TurnContent::Text(text) => text.clone(),
            TurnContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("conversation must start with a user turn")]
    MustStartWithUser,
    #[error("turn {index} repeats role '{role}'")]
    RoleNotAlternating { index: usize, role: &'static str },
}

/// Ordered, append-only sequence of turns with strictly alternating roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Start a conversation with the initial user message.
    pub fn seeded(text: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user_text(text)],
        }
    }

    /// Append a turn. Rejects turns that would break role alternation.
    pub fn push(&mut self, turn: Turn) -> Result<(), ConversationError> {
        match self.turns.last() {
            None if turn.role != Role::User => return Err(ConversationError::MustStartWithUser),
            Some(last) if last.role == turn.role => {
                return Err(ConversationError::RoleNotAlternating {
                    index: self.turns.len(),
                    role: turn.role.as_str(),
                });
            }
            _ => {}
        }
        self.turns.push(turn);
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}

/// Check that every tool invocation is answered exactly once, by id, in the
/// immediately following user turn, and that no result is orphaned.
///
/// An invocation in the final turn has no following turn and is reported.
pub fn validate_tool_pairing(conversation: &Conversation) -> Vec<String> {
    let mut errors = Vec::new();
    let turns = conversation.turns();

    for (index, turn) in turns.iter().enumerate() {
        let expected: Vec<&str> = turn.tool_invocations().map(|(id, _, _)| id).collect();
        let results = turns
            .get(index + 1)
            .map(result_ids)
            .unwrap_or_default();

        if expected.is_empty() {
            continue;
        }
        if index + 1 == turns.len() {
            errors.push(format!("turn {index}: invocations have no following turn"));
            continue;
        }

        let mut seen = HashSet::new();
        for id in &results {
            if !seen.insert(*id) {
                errors.push(format!("turn {}: duplicate result for '{id}'", index + 1));
            }
        }
        for id in &expected {
            if !seen.contains(id) {
                errors.push(format!("turn {}: missing result for '{id}'", index + 1));
            }
        }
        for id in &results {
            if !expected.contains(id) {
                errors.push(format!("turn {}: result '{id}' answers nothing", index + 1));
            }
        }
    }

    // Results in a turn that does not follow any invocation.
    for (index, turn) in turns.iter().enumerate() {
        let previous_has_calls = index > 0 && turns[index - 1].tool_invocations().next().is_some();
        if !previous_has_calls && !result_ids(turn).is_empty() {
            errors.push(format!("turn {index}: results without invocations"));
        }
    }

    errors
}

fn result_ids(turn: &Turn) -> Vec<&str> {
    turn.blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str) -> ContentBlock {
        ContentBlock::ToolResult {
            tool_use_id: id.to_string(),
            content: "ok".to_string(),
            is_error: false,
        }
    }

    #[test]
    fn push_rejects_repeated_role() {
        let mut conversation = Conversation::seeded("fix it");
        let err = conversation
            .push(Turn::user_text("again"))
            .expect_err("same role twice");
        assert_eq!(
            err,
            ConversationError::RoleNotAlternating {
                index: 1,
                role: "user"
            }
        );
        assert_eq!(conversation.len(), 1);
    }

    #[test]
    fn push_rejects_assistant_first() {
        let mut conversation = Conversation::default();
        let err = conversation
            .push(Turn::assistant_blocks(Vec::new()))
            .expect_err("assistant first");
        assert_eq!(err, ConversationError::MustStartWithUser);
    }

    #[test]
    fn blocks_serialize_in_provider_shape() {
        let turn = Turn::assistant_blocks(vec![
            ContentBlock::text("looking"),
            ContentBlock::invocation("tu_1", "read_file", json!({"path": "a.py"})),
        ]);
        let value = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(
            value,
            json!({
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "looking"},
                    {"type": "tool_use", "id": "tu_1", "name": "read_file", "input": {"path": "a.py"}}
                ]
            })
        );

        let plain = serde_json::to_value(Turn::user_text("hi")).expect("serialize");
        assert_eq!(plain, json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn error_flag_is_omitted_unless_set() {
        let ok = serde_json::to_value(result("tu_1")).expect("serialize");
        assert!(ok.get("is_error").is_none());

        let failed = ContentBlock::ToolResult {
            tool_use_id: "tu_2".to_string(),
            content: "file x not found".to_string(),
            is_error: true,
        };
        let value = serde_json::to_value(failed).expect("serialize");
        assert_eq!(value["is_error"], json!(true));
    }

    #[test]
    fn pairing_accepts_answered_invocations() {
        let mut conversation = Conversation::seeded("fix it");
        conversation
            .push(Turn::assistant_blocks(vec![
                ContentBlock::invocation("a", "read_file", json!({})),
                ContentBlock::invocation("b", "read_file", json!({})),
            ]))
            .expect("push");
        conversation
            .push(Turn::user_blocks(vec![result("a"), result("b")]))
            .expect("push");
        conversation
            .push(Turn::assistant_blocks(vec![ContentBlock::text("done")]))
            .expect("push");

        assert!(validate_tool_pairing(&conversation).is_empty());
    }

    #[test]
    fn pairing_reports_missing_duplicate_and_orphan_results() {
        let mut conversation = Conversation::seeded("fix it");
        conversation
            .push(Turn::assistant_blocks(vec![
                ContentBlock::invocation("a", "read_file", json!({})),
                ContentBlock::invocation("b", "read_file", json!({})),
            ]))
            .expect("push");
        conversation
            .push(Turn::user_blocks(vec![result("a"), result("a"), result("z")]))
            .expect("push");

        let errors = validate_tool_pairing(&conversation);
        assert!(errors.iter().any(|e| e.contains("duplicate result for 'a'")));
        assert!(errors.iter().any(|e| e.contains("missing result for 'b'")));
        assert!(errors.iter().any(|e| e.contains("result 'z' answers nothing")));
    }

    #[test]
    fn pairing_reports_trailing_invocations() {
        let mut conversation = Conversation::seeded("fix it");
        conversation
            .push(Turn::assistant_blocks(vec![ContentBlock::invocation(
                "a",
                "run_shell",
                json!({"command": "ls"}),
            )]))
            .expect("push");

        let errors = validate_tool_pairing(&conversation);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no following turn"));
    }

    #[test]
    fn turn_text_joins_text_blocks() {
        let turn = Turn::assistant_blocks(vec![
            ContentBlock::text("a"),
            ContentBlock::invocation("x", "read_file", json!({})),
            ContentBlock::text("b"),
        ]);
        assert_eq!(turn.text(), "ab");
        assert_eq!(turn.tool_invocations().count(), 1);
    }
}
