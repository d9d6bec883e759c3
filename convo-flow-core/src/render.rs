use crate::flow::ParseResult;
use crate::model::{Message, MessageRole};
use crate::node::{ContextNode, FlowNode};

const EMPTY_PLACEHOLDER: &str = "_No messages on the active path._";
const NO_TEXT: &str = "_(no text)_";

pub fn render_flat_list_markdown(result: &ParseResult) -> String {
    let mut output = String::new();
    output.push_str("# Conversation\n\n");

    if result.flat_list.is_empty() {
        output.push_str(EMPTY_PLACEHOLDER);
        output.push('\n');
        return output;
    }

    for (idx, node) in result.flat_list.iter().enumerate() {
        output.push_str(&format!("## {}. {}\n\n", idx + 1, node_title(node)));
        render_node_body(node, &mut output);
        output.push('\n');
    }

    output
}

fn node_title(node: &FlowNode) -> String {
    match node {
        FlowNode::Message(message) => role_title(&message.role),
        FlowNode::AssistantGroup(group) => match group.author_role {
            MessageRole::Supervisor => "Supervisor Tool Calls".to_string(),
            _ => "Assistant Tool Calls".to_string(),
        },
        FlowNode::Tasks(group) => format!("Tasks ({})", group.tasks.len()),
        FlowNode::GroupTasks(group) => format!("Group Tasks ({})", group.tasks.len()),
        FlowNode::Compare(group) => format!("Compare ({} columns)", group.columns.len()),
        FlowNode::AgentCouncil(council) => {
            format!("Agent Council ({} members)", council.members.len())
        }
        FlowNode::Supervisor(_) => "Supervisor".to_string(),
    }
}

fn role_title(role: &MessageRole) -> String {
    match role {
        MessageRole::User => "User".to_string(),
        MessageRole::Assistant => "Assistant".to_string(),
        MessageRole::Tool => "Tool Result".to_string(),
        MessageRole::Task => "Task".to_string(),
        MessageRole::Supervisor => "Supervisor".to_string(),
        MessageRole::System => "System".to_string(),
        MessageRole::CompressedGroup => "Compressed History".to_string(),
        MessageRole::Other(role) => role.clone(),
    }
}

fn render_node_body(node: &FlowNode, output: &mut String) {
    match node {
        FlowNode::Message(message) => push_text(message, output),
        FlowNode::AssistantGroup(group) => {
            for tool in &group.tools {
                let name = if tool.api_name.is_empty() {
                    tool.id.as_str()
                } else {
                    tool.api_name.as_str()
                };
                output.push_str(&format!("- tool `{name}`"));
                if !tool.identifier.is_empty() {
                    output.push_str(&format!(" ({})", tool.identifier));
                }
                output.push('\n');
            }
            if !group.tools.is_empty() {
                output.push('\n');
            }
            for child in group.children.iter().filter(|child| !child.content.is_empty()) {
                output.push_str(&format!("**{}**: ", role_title(&child.role)));
                push_text(child, output);
            }
        }
        FlowNode::Tasks(group) | FlowNode::GroupTasks(group) => {
            for task in &group.tasks {
                let status = task
                    .task_detail
                    .as_ref()
                    .and_then(|detail| detail.status.as_deref())
                    .unwrap_or("unknown");
                let agent = task.agent_id.as_deref().unwrap_or("-");
                output.push_str(&format!("- `{}` [{status}] agent `{agent}`\n", task.id));
            }
        }
        FlowNode::Compare(group) => {
            for (idx, column) in group.columns.iter().enumerate() {
                let active = column
                    .first()
                    .is_some_and(|head| Some(head.id()) == group.active_column_id.as_deref());
                let marker = if active { " (active)" } else { "" };
                output.push_str(&format!("### Column {}{marker}\n\n", idx + 1));
                for node in column {
                    render_node_body(node, output);
                }
            }
        }
        FlowNode::AgentCouncil(council) => {
            for (idx, member) in council.members.iter().enumerate() {
                let agent = member
                    .first()
                    .and_then(|node| match node {
                        FlowNode::Message(message) => message.agent_id.as_deref(),
                        FlowNode::AssistantGroup(group) => group.agent_id.as_deref(),
                        _ => None,
                    })
                    .unwrap_or("unknown");
                output.push_str(&format!("### Member {}: `{agent}`\n\n", idx + 1));
                for node in member {
                    render_node_body(node, output);
                }
            }
        }
        FlowNode::Supervisor(turn) => {
            for child in &turn.children {
                push_text(child, output);
            }
        }
    }
}

fn push_text(message: &Message, output: &mut String) {
    let text = message.content.text();
    let text = text.trim();
    output.push_str(if text.is_empty() { NO_TEXT } else { text });
    output.push_str("\n\n");
}

/// Indented outline of every branch, active ones marked.
pub fn render_context_tree_markdown(result: &ParseResult) -> String {
    let mut output = String::new();
    output.push_str("# Context Tree\n\n");

    if result.context_tree.is_empty() {
        output.push_str("_Empty conversation._\n");
        return output;
    }

    // (node, depth) pairs in reverse so the stack pops them in order.
    let mut stack = result
        .context_tree
        .iter()
        .rev()
        .map(|node| Entry::Node(node, 0))
        .collect::<Vec<_>>();

    while let Some(entry) = stack.pop() {
        match entry {
            Entry::Label(label, depth) => push_line(&mut output, depth, &label),
            Entry::Node(node, depth) => outline_node(node, depth, &mut output, &mut stack),
        }
    }

    output
}

enum Entry<'r> {
    Node(&'r ContextNode, usize),
    Label(String, usize),
}

fn outline_node<'r>(
    node: &'r ContextNode,
    depth: usize,
    output: &mut String,
    stack: &mut Vec<Entry<'r>>,
) {
    match node {
        ContextNode::Message { id } => push_line(output, depth, &format!("`{id}`")),
        ContextNode::Supervisor { id } => push_line(output, depth, &format!("supervisor `{id}`")),
        ContextNode::AssistantGroup { id, children } => {
            push_line(output, depth, &format!("assistant group `{id}`"));
            push_children(stack, children, depth + 1);
        }
        ContextNode::Tasks { id, children } => {
            push_line(output, depth, &format!("tasks `{id}`"));
            push_children(stack, children, depth + 1);
        }
        ContextNode::GroupTasks { id, children } => {
            push_line(output, depth, &format!("group tasks `{id}`"));
            push_children(stack, children, depth + 1);
        }
        ContextNode::Compare {
            id,
            columns,
            active_column_id,
            ..
        } => {
            push_line(output, depth, &format!("compare `{id}`"));
            for (idx, column) in columns.iter().enumerate().rev() {
                push_children(stack, column, depth + 2);
                let active = column
                    .first()
                    .and_then(column_head_id)
                    .is_some_and(|head| Some(head) == active_column_id.as_deref());
                let marker = if active { " (active)" } else { "" };
                stack.push(Entry::Label(format!("column {}{marker}", idx + 1), depth + 1));
            }
        }
        ContextNode::AgentCouncil { id, members } => {
            push_line(output, depth, &format!("agent council `{id}`"));
            for (idx, member) in members.iter().enumerate().rev() {
                push_children(stack, member, depth + 2);
                stack.push(Entry::Label(format!("member {}", idx + 1), depth + 1));
            }
        }
        ContextNode::Branch {
            parent_message_id,
            active_branch_index,
            branches,
        } => {
            push_line(output, depth, &format!("fork after `{parent_message_id}`"));
            for (idx, branch) in branches.iter().enumerate().rev() {
                push_children(stack, branch, depth + 2);
                let marker = if idx == *active_branch_index { " (active)" } else { "" };
                stack.push(Entry::Label(format!("branch {}{marker}", idx + 1), depth + 1));
            }
        }
    }
}

fn column_head_id(node: &ContextNode) -> Option<&str> {
    match node {
        ContextNode::Message { id }
        | ContextNode::Supervisor { id }
        | ContextNode::AssistantGroup { id, .. } => Some(id.as_str()),
        _ => None,
    }
}

fn push_children<'r>(stack: &mut Vec<Entry<'r>>, children: &'r [ContextNode], depth: usize) {
    stack.extend(children.iter().rev().map(|child| Entry::Node(child, depth)));
}

fn push_line(output: &mut String, depth: usize, text: &str) {
    output.push_str(&"  ".repeat(depth));
    output.push_str("- ");
    output.push_str(text);
    output.push('\n');
}
