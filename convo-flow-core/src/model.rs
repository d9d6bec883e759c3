use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    Task,
    Supervisor,
    System,
    CompressedGroup,
    /// Roles the engine does not classify; rendered as-is.
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Task => "task",
            Self::Supervisor => "supervisor",
            Self::System => "system",
            Self::CompressedGroup => "compressedGroup",
            Self::Other(role) => role,
        }
    }
}

impl From<String> for MessageRole {
    fn from(value: String) -> Self {
        match value.as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "tool" => Self::Tool,
            "task" => Self::Task,
            "supervisor" => Self::Supervisor,
            "system" => Self::System,
            "compressedGroup" => Self::CompressedGroup,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageRole> for String {
    fn from(value: MessageRole) -> Self {
        match value {
            MessageRole::Other(role) => role,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl MessageContent {
    /// Plain text of the content; image and unsupported parts are skipped.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } if !text.trim().is_empty() => {
                        Some(text.trim().to_string())
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    #[serde(default)]
    pub api_name: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(
        default,
        rename = "result_msg_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_msg_id: Option<String>,
}

/// Metadata keys the engine reads are typed; everything else (usage and
/// performance counters included) is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_branch_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_supervisor: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_column: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolCall>>,
    #[serde(
        default,
        rename = "tool_call_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_detail: Option<TaskDetail>,
}

impl Message {
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tools.as_deref().unwrap_or_default()
    }

    pub fn has_tools(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn is_supervisor(&self) -> bool {
        let flagged = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.is_supervisor)
            .unwrap_or(false);
        match self.role {
            MessageRole::Supervisor => true,
            MessageRole::Assistant => flagged,
            _ => false,
        }
    }

    pub fn active_branch_index(&self) -> Option<usize> {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.active_branch_index)
    }

    pub fn is_compare_anchor(&self) -> bool {
        self.role == MessageRole::User
            && self
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.compare)
                .unwrap_or(false)
    }

    pub fn is_active_column(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.active_column)
            .unwrap_or(false)
    }

    /// The message id a compressed group stands in for, if this is one.
    pub fn compressed_last_message_id(&self) -> Option<&str> {
        if self.role != MessageRole::CompressedGroup {
            return None;
        }
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.last_message_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupMode {
    Compare,
    Other(String),
}

impl From<String> for GroupMode {
    fn from(value: String) -> Self {
        if value == "compare" {
            Self::Compare
        } else {
            Self::Other(value)
        }
    }
}

impl From<GroupMode> for String {
    fn from(value: GroupMode) -> Self {
        match value {
            GroupMode::Compare => "compare".to_string(),
            GroupMode::Other(mode) => mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageGroupMetadata {
    pub id: String,
    pub mode: GroupMode,
}
