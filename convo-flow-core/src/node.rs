use std::mem;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{Message, MessageContent, MessageMetadata, MessageRole, ToolCall};

/// One render-ready entry of the flat list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowNode {
    Message(Message),
    AssistantGroup(AssistantGroup),
    Tasks(TaskGroup),
    GroupTasks(TaskGroup),
    Compare(CompareGroup),
    AgentCouncil(AgentCouncil),
    Supervisor(SupervisorTurn),
}

impl FlowNode {
    pub fn id(&self) -> &str {
        match self {
            Self::Message(message) => &message.id,
            Self::AssistantGroup(group) => &group.id,
            Self::Tasks(group) | Self::GroupTasks(group) => &group.id,
            Self::Compare(group) => &group.id,
            Self::AgentCouncil(council) => &council.id,
            Self::Supervisor(turn) => &turn.id,
        }
    }

    /// Role label of the node, as consumers key on it.
    pub fn role(&self) -> &str {
        match self {
            Self::Message(message) => message.role.as_str(),
            Self::AssistantGroup(group) => group.role.as_str(),
            Self::Tasks(group) | Self::GroupTasks(group) => group.role.as_str(),
            Self::Compare(group) => group.role.as_str(),
            Self::AgentCouncil(council) => council.role.as_str(),
            Self::Supervisor(turn) => turn.role.as_str(),
        }
    }

    /// Ids of every input message carried by this node, nested ones included.
    pub fn message_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_message_ids(&mut ids);
        ids
    }

    fn collect_message_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Self::Message(message) => ids.push(&message.id),
            Self::AssistantGroup(group) => {
                ids.extend(group.children.iter().map(|child| child.id.as_str()));
            }
            Self::Tasks(group) | Self::GroupTasks(group) => {
                ids.extend(group.tasks.iter().map(|task| task.id.as_str()));
            }
            Self::Compare(group) => {
                for node in group.columns.iter().flatten() {
                    node.collect_message_ids(ids);
                }
            }
            Self::AgentCouncil(council) => {
                for node in council.members.iter().flatten() {
                    node.collect_message_ids(ids);
                }
            }
            Self::Supervisor(turn) => ids.push(&turn.id),
        }
    }
}

/// Kind of an aggregate node. Serialized as the node's `role`, so consumers
/// keyed on roles never mistake an aggregate for a plain message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRole {
    AssistantGroup,
    Tasks,
    GroupTasks,
    Compare,
    AgentCouncil,
    Supervisor,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssistantGroup => "assistantGroup",
            Self::Tasks => "tasks",
            Self::GroupTasks => "groupTasks",
            Self::Compare => "compare",
            Self::AgentCouncil => "agentCouncil",
            Self::Supervisor => "supervisor",
        }
    }
}

/// Consecutive assistant turns chained through tool calls and their results.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantGroup {
    pub id: String,
    pub role: NodeRole,
    /// Role of the head turn: assistant, or supervisor for orchestration calls.
    pub author_role: MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub children: Vec<Message>,
    pub tools: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskGroup {
    pub id: String,
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Shared agent of the run; `None` for mixed-agent runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub tasks: Vec<Message>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareGroup {
    pub id: String,
    pub role: NodeRole,
    /// The message the columns reply to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub columns: Vec<Vec<FlowNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_column_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCouncil {
    pub id: String,
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub members: Vec<Vec<FlowNode>>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A supervisor turn without tool calls. The UI renders `children`, so the
/// turn's own content is always empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorTurn {
    pub id: String,
    pub role: NodeRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub content: MessageContent,
    pub children: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Summed usage and performance counters of a chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub usage: Map<String, Value>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub performance: Map<String, Value>,
}

impl UsageSummary {
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty() && self.performance.is_empty()
    }
}

/// Navigation tree entry; mirrors every branch, not just the active one.
///
/// Each fork nests one level deeper. Dropping is iterative, but serializing
/// recurses once per level: roughly 2,000 nested forks fit an 8 MiB stack in
/// debug builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContextNode {
    Message {
        id: String,
    },
    AssistantGroup {
        id: String,
        children: Vec<ContextNode>,
    },
    Tasks {
        id: String,
        children: Vec<ContextNode>,
    },
    GroupTasks {
        id: String,
        children: Vec<ContextNode>,
    },
    #[serde(rename_all = "camelCase")]
    Compare {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        columns: Vec<Vec<ContextNode>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_column_id: Option<String>,
    },
    AgentCouncil {
        id: String,
        members: Vec<Vec<ContextNode>>,
    },
    Supervisor {
        id: String,
    },
    #[serde(rename_all = "camelCase")]
    Branch {
        parent_message_id: String,
        active_branch_index: usize,
        branches: Vec<Vec<ContextNode>>,
    },
}

impl ContextNode {
    pub fn message(id: &str) -> Self {
        Self::Message { id: id.to_string() }
    }

    fn take_children(&mut self) -> Vec<ContextNode> {
        match self {
            Self::Message { .. } | Self::Supervisor { .. } => Vec::new(),
            Self::AssistantGroup { children, .. }
            | Self::Tasks { children, .. }
            | Self::GroupTasks { children, .. } => mem::take(children),
            Self::Compare { columns: lists, .. }
            | Self::AgentCouncil { members: lists, .. }
            | Self::Branch { branches: lists, .. } => {
                mem::take(lists).into_iter().flatten().collect()
            }
        }
    }
}

// Deep fork chains would overflow the stack with the derived recursive drop.
impl Drop for ContextNode {
    fn drop(&mut self) {
        let mut pending = self.take_children();
        while let Some(mut node) = pending.pop() {
            pending.extend(node.take_children());
        }
    }
}
