pub mod error;
pub mod flow;
pub mod input;
pub mod model;
pub mod node;
pub mod render;

pub use error::{FlowError, Result};
pub use flow::{ParseResult, parse};
pub use input::{ConversationInput, decode_document, read_document, read_groups};
pub use model::{
    ContentPart, GroupMode, Message, MessageContent, MessageGroupMetadata, MessageMetadata,
    MessageRole, TaskDetail, ToolCall,
};
pub use node::{
    AgentCouncil, AssistantGroup, CompareGroup, ContextNode, FlowNode, NodeRole, SupervisorTurn,
    TaskGroup, UsageSummary,
};
pub use render::{render_context_tree_markdown, render_flat_list_markdown};
