//! Session and message shapes as the backend sends them.
//!
//! These are deliberately loose: every field has a default, and message
//! content stays a raw `serde_json::Value` until [`MessageContent::parse`]
//! classifies it. Malformed pieces degrade to "nothing here" instead of
//! failing the whole listing.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Read an explicit `null` the same as a missing field.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Author of a backend message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    #[default]
    #[serde(other)]
    Other,
}

/// One row of `GET /sessions/{id}/messages`, in chronological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: Role,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
}

impl RawMessage {
    /// Message id as text; the backend uses integers, strings are tolerated.
    pub fn id_string(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// A content block inside a message, tagged by `_type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "_type")]
pub enum ContentBlock {
    TextBlock {
        #[serde(default)]
        text: Option<String>,
    },
    ToolUseBlock {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        input: Option<Value>,
    },
    ToolResultBlock {
        #[serde(default)]
        tool_use_id: Option<String>,
        #[serde(default)]
        content: Option<Value>,
        #[serde(default)]
        is_error: Option<bool>,
    },
    /// Thinking blocks and anything newer than this client.
    #[serde(other)]
    Other,
}

/// Classified message content.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    /// `{"_type": "SystemMessage", "subtype": "init"}`; never rendered.
    SystemInit,
    Payload {
        /// Explicit top-level text, if any.
        text: Option<String>,
        blocks: Vec<ContentBlock>,
    },
}

impl MessageContent {
    /// Classify a raw `content` value.
    ///
    /// Accepts a bare string, a bare block array, or an object with optional
    /// `text` and `content` (block array). Blocks that fail to parse are skipped.
    pub fn parse(content: &Value) -> Self {
        match content {
            Value::String(text) => MessageContent::Payload {
                text: Some(text.clone()),
                blocks: Vec::new(),
            },
            Value::Array(items) => MessageContent::Payload {
                text: None,
                blocks: parse_blocks(items),
            },
            Value::Object(obj) => {
                let tag = obj.get("_type").and_then(|v| v.as_str());
                let subtype = obj.get("subtype").and_then(|v| v.as_str());
                if tag == Some("SystemMessage") && subtype == Some("init") {
                    return MessageContent::SystemInit;
                }

                let text = match obj.get("text") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Null) | None => None,
                    Some(other) => Some(other.to_string()),
                };
                let blocks = obj
                    .get("content")
                    .and_then(|v| v.as_array())
                    .map(|items| parse_blocks(items))
                    .unwrap_or_default();
                MessageContent::Payload { text, blocks }
            }
            _ => MessageContent::Payload {
                text: None,
                blocks: Vec::new(),
            },
        }
    }
}

fn parse_blocks(items: &[Value]) -> Vec<ContentBlock> {
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Session row from `GET /sessions/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionResponse {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub state_patch: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Accepted,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Anything the backend reports besides the three terminal/active states
    /// (pending, queued, ...) shows as accepted.
    pub fn from_backend(status: Option<&str>) -> Self {
        match status {
            Some("completed") => ExecutionStatus::Completed,
            Some("failed") => ExecutionStatus::Failed,
            Some("running") => ExecutionStatus::Running,
            _ => ExecutionStatus::Accepted,
        }
    }
}

/// Session summary the execution panel polls.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSession {
    pub session_id: String,
    pub time: String,
    pub status: ExecutionStatus,
    pub progress: u32,
    pub state_patch: Value,
}

impl ExecutionSession {
    pub fn from_response(session: SessionResponse, progress: u32) -> Self {
        Self {
            status: ExecutionStatus::from_backend(session.status.as_deref()),
            session_id: session.session_id,
            time: session.updated_at.unwrap_or_default(),
            progress,
            state_patch: session
                .state_patch
                .unwrap_or_else(|| Value::Object(Default::default())),
        }
    }

    /// Stand-in returned when the session cannot be fetched.
    pub fn placeholder(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            time: chrono::Utc::now().to_rfc3339(),
            status: ExecutionStatus::Accepted,
            progress: 0,
            state_patch: Value::Object(Default::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_init_detected() {
        let content = json!({"_type": "SystemMessage", "subtype": "init", "data": {}});
        assert_eq!(MessageContent::parse(&content), MessageContent::SystemInit);

        let other_system = json!({"_type": "SystemMessage", "subtype": "compact"});
        assert!(matches!(
            MessageContent::parse(&other_system),
            MessageContent::Payload { .. }
        ));
    }

    #[test]
    fn test_parse_object_with_blocks() {
        let content = json!({
            "_type": "AssistantMessage",
            "content": [
                {"_type": "TextBlock", "text": "hello"},
                {"_type": "ThinkingBlock", "thinking": "hmm"},
                {"_type": "ToolUseBlock", "id": "t1", "name": "Bash", "input": {"cmd": "ls"}},
                {"no_tag": true}
            ]
        });
        let MessageContent::Payload { text, blocks } = MessageContent::parse(&content) else {
            panic!("expected payload");
        };
        assert_eq!(text, None);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[1], ContentBlock::Other);
        assert!(matches!(&blocks[2], ContentBlock::ToolUseBlock { id: Some(id), .. } if id == "t1"));
    }

    #[test]
    fn test_parse_plain_shapes() {
        assert_eq!(
            MessageContent::parse(&json!("hi")),
            MessageContent::Payload { text: Some("hi".into()), blocks: vec![] }
        );
        assert_eq!(
            MessageContent::parse(&json!({"text": 42})),
            MessageContent::Payload { text: Some("42".into()), blocks: vec![] }
        );
        assert_eq!(
            MessageContent::parse(&Value::Null),
            MessageContent::Payload { text: None, blocks: vec![] }
        );
        let MessageContent::Payload { blocks, .. } =
            MessageContent::parse(&json!([{"_type": "TextBlock", "text": "x"}]))
        else {
            panic!("expected payload");
        };
        assert_eq!(blocks, vec![ContentBlock::TextBlock { text: Some("x".into()) }]);
    }

    #[test]
    fn test_raw_message_defaults() {
        let msg: RawMessage = serde_json::from_value(json!({"id": 7, "role": "system"})).unwrap();
        assert_eq!(msg.role, Role::Other);
        assert_eq!(msg.id_string(), "7");
        assert_eq!(msg.content, Value::Null);

        let msg: RawMessage = serde_json::from_value(json!({"id": "m-1", "role": "user", "created_at": null})).unwrap();
        assert_eq!(msg.id_string(), "m-1");
        assert_eq!(msg.created_at, None);
    }

    #[test]
    fn test_null_role_is_unknown_not_fatal() {
        let rows: Vec<RawMessage> = serde_json::from_value(json!([
            {"id": 1, "role": "user", "content": {"text": "hi"}},
            {"id": 2, "role": null, "content": null}
        ]))
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, Role::User);
        assert_eq!(rows[1].role, Role::Other);
    }

    #[test]
    fn test_execution_status_mapping() {
        assert_eq!(ExecutionStatus::from_backend(Some("completed")), ExecutionStatus::Completed);
        assert_eq!(ExecutionStatus::from_backend(Some("failed")), ExecutionStatus::Failed);
        assert_eq!(ExecutionStatus::from_backend(Some("running")), ExecutionStatus::Running);
        assert_eq!(ExecutionStatus::from_backend(Some("pending")), ExecutionStatus::Accepted);
        assert_eq!(ExecutionStatus::from_backend(None), ExecutionStatus::Accepted);
    }

    #[test]
    fn test_execution_session_from_response() {
        let session: SessionResponse = serde_json::from_value(json!({
            "session_id": "s1",
            "status": "running",
            "updated_at": "2026-01-02T03:04:05Z",
            "state_patch": null
        }))
        .unwrap();
        let summary = ExecutionSession::from_response(session, 40);
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["progress"], 40);
        assert_eq!(value["state_patch"], json!({}));
        assert_eq!(value["time"], "2026-01-02T03:04:05Z");
    }
}
