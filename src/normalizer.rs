//! Message normalizer - turns the backend's message log into conversation turns.
//!
//! The backend stores one row per SDK message. Tool calls and their results
//! arrive as separate assistant/user rows, which would render as a noisy
//! ping-pong. This pass folds them into the assistant turn that issued them:
//!
//! ```text
//! user "hi"                 ──▶  User "hi"
//! assistant [ToolUse X]     ──▶  Assistant [ToolUse X,
//! user [ToolResult X]                        ToolResult X,
//! assistant "done"                           Text "done"]
//! ```
//!
//! The only state is whether an assistant turn is still open, held as an index
//! into the output so the turn can keep growing after it has been emitted.

use crate::sessions::{ContentBlock, MessageContent, RawMessage, Role};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

/// A block inside an assistant turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_type")]
pub enum TurnBlock {
    TextBlock {
        text: String,
    },
    ToolUseBlock {
        id: String,
        name: String,
        input: Value,
    },
    ToolResultBlock {
        tool_use_id: String,
        /// Always text; structured results are serialized to JSON.
        content: String,
        is_error: bool,
    },
}

/// One renderable turn. `id` and `created_at` come from the row that opened it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationTurn {
    User {
        id: String,
        created_at: Option<String>,
        text: String,
    },
    Assistant {
        id: String,
        created_at: Option<String>,
        blocks: Vec<TurnBlock>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OpenTurn {
    #[default]
    None,
    /// Index of the assistant turn still absorbing blocks.
    Assistant(usize),
}

#[derive(Debug, Default)]
struct Normalizer {
    turns: Vec<ConversationTurn>,
    open: OpenTurn,
}

/// Normalize a chronologically ordered message log into turns.
pub fn normalize(messages: &[RawMessage]) -> Vec<ConversationTurn> {
    let mut normalizer = Normalizer::default();
    for message in messages {
        normalizer.push(message);
    }
    normalizer.turns
}

impl Normalizer {
    fn push(&mut self, message: &RawMessage) {
        let (text, blocks) = match MessageContent::parse(&message.content) {
            MessageContent::SystemInit => return,
            MessageContent::Payload { text, blocks } => (text, blocks),
        };

        match message.role {
            Role::Assistant => {
                let tool_uses: Vec<TurnBlock> = blocks.iter().filter_map(tool_use).collect();
                if !tool_uses.is_empty() {
                    self.append_to_open(message, tool_uses);
                    return;
                }
            }
            Role::User => {
                let results: Vec<TurnBlock> = blocks.iter().filter_map(tool_result).collect();
                if !results.is_empty() {
                    match self.open_blocks() {
                        Some(open) => open.extend(results),
                        None => debug!(
                            message_id = %message.id_string(),
                            "Dropping {} tool result(s) with no open assistant turn",
                            results.len()
                        ),
                    }
                    return;
                }
            }
            Role::Other => {
                debug!(message_id = %message.id_string(), "Skipping message with unknown role");
                return;
            }
        }

        let Some(text) = extract_text(text, &blocks, message.text_preview.as_deref()) else {
            return;
        };

        if message.role == Role::User {
            self.open = OpenTurn::None;
            self.turns.push(ConversationTurn::User {
                id: message.id_string(),
                created_at: message.created_at.clone(),
                text,
            });
        } else {
            self.append_to_open(message, [TurnBlock::TextBlock { text }]);
        }
    }

    /// Blocks of the open assistant turn, if there is one.
    fn open_blocks(&mut self) -> Option<&mut Vec<TurnBlock>> {
        let OpenTurn::Assistant(index) = self.open else {
            return None;
        };
        match self.turns.get_mut(index)? {
            ConversationTurn::Assistant { blocks, .. } => Some(blocks),
            ConversationTurn::User { .. } => None,
        }
    }

    /// Append to the open assistant turn, opening one at `message` if needed.
    fn append_to_open(&mut self, message: &RawMessage, new_blocks: impl IntoIterator<Item = TurnBlock>) {
        if let Some(blocks) = self.open_blocks() {
            blocks.extend(new_blocks);
            return;
        }
        self.turns.push(ConversationTurn::Assistant {
            id: message.id_string(),
            created_at: message.created_at.clone(),
            blocks: new_blocks.into_iter().collect(),
        });
        self.open = OpenTurn::Assistant(self.turns.len() - 1);
    }
}

fn tool_use(block: &ContentBlock) -> Option<TurnBlock> {
    match block {
        ContentBlock::ToolUseBlock { id, name, input } => Some(TurnBlock::ToolUseBlock {
            id: id.clone().unwrap_or_default(),
            name: name.clone().unwrap_or_default(),
            input: input
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default())),
        }),
        _ => None,
    }
}

fn tool_result(block: &ContentBlock) -> Option<TurnBlock> {
    match block {
        ContentBlock::ToolResultBlock {
            tool_use_id,
            content,
            is_error,
        } => Some(TurnBlock::ToolResultBlock {
            tool_use_id: tool_use_id.clone().unwrap_or_default(),
            content: match content {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            },
            is_error: is_error.unwrap_or(false),
        }),
        _ => None,
    }
}

/// Explicit text, else the first text block, else the row's preview.
/// Empty strings count as missing.
fn extract_text(explicit: Option<String>, blocks: &[ContentBlock], preview: Option<&str>) -> Option<String> {
    explicit
        .filter(|t| !t.is_empty())
        .or_else(|| {
            blocks
                .iter()
                .find_map(|b| match b {
                    ContentBlock::TextBlock { text } => Some(text.clone().unwrap_or_default()),
                    _ => None,
                })
                .filter(|t| !t.is_empty())
        })
        .or_else(|| preview.filter(|p| !p.is_empty()).map(str::to_string))
}
