pub mod branch;
pub mod collector;
pub mod context_tree;
pub mod flat_list;
pub mod indexer;
pub mod structurer;
pub mod transformer;
pub mod usage;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{FlowError, Result};
use crate::flow::context_tree::ContextTreeBuilder;
use crate::flow::flat_list::FlatListBuilder;
use crate::flow::indexer::build_helper_maps;
use crate::flow::structurer::build_id_tree;
use crate::flow::transformer::{MessageTransformer, normalize_map_entry};
use crate::model::{Message, MessageGroupMetadata};
use crate::node::{ContextNode, FlowNode};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseResult {
    pub context_tree: Vec<ContextNode>,
    pub flat_list: Vec<FlowNode>,
    pub message_map: BTreeMap<String, Message>,
}

impl ParseResult {
    pub fn to_json_pretty(&self) -> Result<String> {
        to_pretty_json(self)
    }

    pub fn flat_list_json(&self) -> Result<String> {
        to_pretty_json(&self.flat_list)
    }

    pub fn context_tree_json(&self) -> Result<String> {
        to_pretty_json(&self.context_tree)
    }

    pub fn message_map_json(&self) -> Result<String> {
        to_pretty_json(&self.message_map)
    }
}

fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|err| FlowError::Serialization(err.to_string()))
}

/// Builds the navigation tree, the active flat list and the normalized
/// message map for one snapshot of a conversation.
pub fn parse(messages: &[Message], message_groups: &[MessageGroupMetadata]) -> ParseResult {
    let maps = build_helper_maps(messages, message_groups);
    let tree = build_id_tree(&maps);
    let transformer = MessageTransformer::new(&maps, &tree);

    let flat_list = FlatListBuilder::new(&transformer).flatten();
    let context_tree = ContextTreeBuilder::new(&transformer).build();
    let message_map = maps
        .message_map
        .iter()
        .map(|(&id, &message)| (id.to_string(), normalize_map_entry(message)))
        .collect::<BTreeMap<_, _>>();

    debug!(
        messages = messages.len(),
        roots = tree.roots.len(),
        flat_list = flat_list.len(),
        "parsed conversation"
    );

    ParseResult {
        context_tree,
        flat_list,
        message_map,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    use serde_json::json;

    use crate::flow::{ParseResult, parse};
    use crate::model::{Message, MessageGroupMetadata, MessageRole};
    use crate::node::{ContextNode, FlowNode};

    fn messages(raw: &str) -> Vec<Message> {
        serde_json::from_str(raw).expect("decode messages")
    }

    fn parse_raw(raw: &str) -> ParseResult {
        parse(&messages(raw), &[])
    }

    fn ids(nodes: &[FlowNode]) -> Vec<&str> {
        nodes.iter().map(FlowNode::id).collect()
    }

    fn branching(index: usize) -> ParseResult {
        let raw = format!(
            r#"[{{"id":"msg-1","role":"user","metadata":{{"activeBranchIndex":{index}}}}},
                {{"id":"msg-2","role":"assistant","parentId":"msg-1"}},
                {{"id":"msg-3","role":"assistant","parentId":"msg-1"}}]"#
        );
        parse_raw(&raw)
    }

    #[test]
    fn linear_chain_flattens_without_grouping() {
        let result = parse_raw(
            r#"[{"id":"msg-1","role":"user"},{"id":"msg-2","role":"assistant","parentId":"msg-1"}]"#,
        );
        assert_eq!(ids(&result.flat_list), vec!["msg-1", "msg-2"]);
        assert!(
            result
                .flat_list
                .iter()
                .all(|node| matches!(node, FlowNode::Message(_)))
        );
    }

    #[test]
    fn tool_call_group_keeps_the_follow_up() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user","content":"weather?"},
                {"id":"a1","role":"assistant","parentId":"u1","tools":[{"id":"tool-1","apiName":"forecast","identifier":"weather"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"tool-1"},
                {"id":"a2","role":"assistant","parentId":"t1","content":"sunny"},
                {"id":"u2","role":"user","parentId":"a2","content":"thanks"}]"#,
        );

        assert_eq!(result.flat_list.len(), 3);
        assert_eq!(ids(&result.flat_list), vec!["u1", "a1", "u2"]);
        let FlowNode::AssistantGroup(group) = &result.flat_list[1] else {
            panic!("expected assistant group");
        };
        let children = group.children.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(children, vec!["a1", "t1", "a2"]);
        assert_eq!(group.tools[0].result_msg_id.as_deref(), Some("t1"));
    }

    #[test]
    fn active_branch_index_selects_the_child() {
        assert_eq!(branching(0).flat_list[1].id(), "msg-2");
        assert_eq!(branching(1).flat_list[1].id(), "msg-3");
    }

    #[test]
    fn pending_branch_stops_at_the_fork() {
        assert_eq!(ids(&branching(2).flat_list), vec!["msg-1"]);
        assert_eq!(ids(&branching(7).flat_list), vec!["msg-1"]);
    }

    #[test]
    fn context_tree_mirrors_both_branches() {
        let result = branching(1);
        assert_eq!(
            result.context_tree,
            vec![
                ContextNode::message("msg-1"),
                ContextNode::Branch {
                    parent_message_id: "msg-1".to_string(),
                    active_branch_index: 1,
                    branches: vec![
                        vec![ContextNode::message("msg-2")],
                        vec![ContextNode::message("msg-3")],
                    ],
                },
            ]
        );
    }

    #[test]
    fn same_agent_tasks_aggregate_as_tasks() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user"},
                {"id":"t1","role":"task","parentId":"u1","agentId":"agent-1"},
                {"id":"t2","role":"task","parentId":"u1","agentId":"agent-1"}]"#,
        );
        let FlowNode::Tasks(group) = &result.flat_list[1] else {
            panic!("expected tasks");
        };
        assert_eq!(result.flat_list[1].role(), "tasks");
        assert_eq!(group.tasks.len(), 2);
        assert_eq!(group.agent_id.as_deref(), Some("agent-1"));
    }

    #[test]
    fn mixed_agent_tasks_aggregate_as_group_tasks() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user"},
                {"id":"t1","role":"task","parentId":"u1","agentId":"agent-1","createdAt":300,"updatedAt":400},
                {"id":"t2","role":"task","parentId":"u1","agentId":"agent-2","createdAt":100,"updatedAt":900},
                {"id":"t3","role":"task","parentId":"u1","agentId":"agent-3","createdAt":200,"updatedAt":500}]"#,
        );
        let node = &result.flat_list[1];
        assert_eq!(node.role(), "groupTasks");
        assert!(node.id().contains("groupTasks-"));
        let FlowNode::GroupTasks(group) = node else {
            panic!("expected groupTasks");
        };
        assert_eq!(group.tasks.len(), 3);
        assert_eq!(group.created_at, 100);
        assert_eq!(group.updated_at, 900);
    }

    #[test]
    fn compare_group_renders_columns() {
        let input = messages(
            r#"[{"id":"a1","role":"assistant","groupId":"group-1"},
                {"id":"a2","role":"assistant","groupId":"group-1","metadata":{"activeColumn":true}}]"#,
        );
        let groups: Vec<MessageGroupMetadata> =
            serde_json::from_str(r#"[{"id":"group-1","mode":"compare"}]"#).expect("groups");

        let result = parse(&input, &groups);
        assert_eq!(result.flat_list.len(), 1);
        let FlowNode::Compare(compare) = &result.flat_list[0] else {
            panic!("expected compare");
        };
        assert_eq!(result.flat_list[0].role(), "compare");
        assert_eq!(compare.columns.len(), 2);
        assert_eq!(compare.active_column_id.as_deref(), Some("a2"));
    }

    #[test]
    fn compressed_group_adopts_escaped_children() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user"},
                {"id":"a1","role":"assistant","parentId":"u1"},
                {"id":"cg","role":"compressedGroup","parentId":"u1","metadata":{"lastMessageId":"a1"}},
                {"id":"u2","role":"user","parentId":"a1"}]"#,
        );
        // u1 forks into a1 and cg; the follow-up hangs off the group now.
        let cg_branch = result
            .context_tree
            .iter()
            .find_map(|node| match node {
                ContextNode::Branch { branches, .. } => branches.get(1).cloned(),
                _ => None,
            })
            .expect("branch");
        assert_eq!(
            cg_branch,
            vec![ContextNode::message("cg"), ContextNode::message("u2")]
        );
    }

    #[test]
    fn message_map_relabels_supervisors() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user"},
                {"id":"s1","role":"assistant","parentId":"u1","content":"plan","metadata":{"isSupervisor":true}}]"#,
        );
        assert_eq!(result.message_map["s1"].role, MessageRole::Supervisor);
        assert_eq!(result.message_map["u1"].role, MessageRole::User);
        let FlowNode::Supervisor(turn) = &result.flat_list[1] else {
            panic!("expected supervisor");
        };
        assert!(turn.content.is_empty());
        assert_eq!(turn.children[0].content.text(), "plan");
    }

    #[test]
    fn reparse_is_idempotent() {
        let input = messages(
            r#"[{"id":"u1","role":"user","metadata":{"activeBranchIndex":1}},
                {"id":"a1","role":"assistant","parentId":"u1","tools":[{"id":"c1"}],"metadata":{"totalTokens":3}},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"c1"},
                {"id":"a2","role":"assistant","parentId":"u1"},
                {"id":"k1","role":"task","parentId":"a2","agentId":"x"},
                {"id":"k2","role":"task","parentId":"a2","agentId":"y"}]"#,
        );

        let first = parse(&input, &[]);
        let second = parse(&input, &[]);
        assert_eq!(first, second);
        assert_eq!(
            first.to_json_pretty().expect("json"),
            second.to_json_pretty().expect("json")
        );
    }

    #[test]
    fn every_message_lands_once_on_a_linear_path() {
        let input = messages(
            r#"[{"id":"u1","role":"user"},
                {"id":"a1","role":"assistant","parentId":"u1","tools":[{"id":"c1"},{"id":"c2"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"c1"},
                {"id":"t2","role":"tool","parentId":"a1","tool_call_id":"c2"},
                {"id":"a2","role":"assistant","parentId":"t2"},
                {"id":"u2","role":"user","parentId":"a2"},
                {"id":"k1","role":"task","parentId":"u2","agentId":"x"},
                {"id":"k2","role":"task","parentId":"u2","agentId":"y"},
                {"id":"s1","role":"assistant","parentId":"u2","content":"summary"}]"#,
        );

        let result = parse(&input, &[]);
        assert_eq!(result.message_map.len(), input.len());

        let seen = result
            .flat_list
            .iter()
            .flat_map(FlowNode::message_ids)
            .collect::<Vec<_>>();
        let unique = seen.iter().copied().collect::<HashSet<_>>();
        assert_eq!(seen.len(), unique.len());
        for message in &input {
            assert!(unique.contains(message.id.as_str()), "missing {}", message.id);
        }
    }

    #[test]
    fn thread_messages_are_mapped_but_not_flattened() {
        let result = parse_raw(
            r#"[{"id":"u1","role":"user"},
                {"id":"a1","role":"assistant","parentId":"u1"},
                {"id":"t1","role":"user","parentId":"a1","threadId":"th"},
                {"id":"t2","role":"assistant","parentId":"t1","threadId":"th"}]"#,
        );

        assert!(result.message_map.contains_key("t1"));
        assert!(result.message_map.contains_key("t2"));
        assert_eq!(ids(&result.flat_list), vec!["u1", "a1"]);
        assert_eq!(
            result.context_tree,
            vec![ContextNode::message("u1"), ContextNode::message("a1")]
        );
    }

    #[test]
    fn regenerated_reply_outranks_compare_columns_when_selected() {
        let input = messages(
            r#"[{"id":"u1","role":"user","metadata":{"activeBranchIndex":2}},
                {"id":"a1","role":"assistant","parentId":"u1","groupId":"g1"},
                {"id":"a2","role":"assistant","parentId":"u1","groupId":"g1"},
                {"id":"a3","role":"assistant","parentId":"u1","content":"again"}]"#,
        );
        let groups: Vec<MessageGroupMetadata> =
            serde_json::from_str(r#"[{"id":"g1","mode":"compare"}]"#).expect("groups");

        let result = parse(&input, &groups);
        assert_eq!(ids(&result.flat_list), vec!["u1", "a3"]);

        let unselected = parse(
            &messages(
                r#"[{"id":"u1","role":"user"},
                    {"id":"a1","role":"assistant","parentId":"u1","groupId":"g1"},
                    {"id":"a2","role":"assistant","parentId":"u1","groupId":"g1"},
                    {"id":"a3","role":"assistant","parentId":"u1"}]"#,
            ),
            &groups,
        );
        assert_eq!(ids(&unselected.flat_list), vec!["u1", "g1"]);
    }

    #[test]
    fn aggregate_nodes_carry_their_kind_as_role() {
        let input = messages(
            r#"[{"id":"u1","role":"user"},
                {"id":"a1","role":"assistant","parentId":"u1","tools":[{"id":"c1"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"c1"},
                {"id":"u2","role":"user","parentId":"t1"},
                {"id":"k1","role":"task","parentId":"u2","agentId":"x"},
                {"id":"k2","role":"task","parentId":"u2","agentId":"x"},
                {"id":"g1a","role":"assistant","parentId":"k2","groupId":"g1"},
                {"id":"g1b","role":"assistant","parentId":"k2","groupId":"g1"}]"#,
        );
        let groups: Vec<MessageGroupMetadata> =
            serde_json::from_str(r#"[{"id":"g1","mode":"compare"}]"#).expect("groups");

        let value = serde_json::to_value(parse(&input, &groups)).expect("value");
        let flat = value["flatList"].as_array().expect("flat list");
        let roles = flat.iter().map(|node| node["role"].clone()).collect::<Vec<_>>();
        assert_eq!(
            roles,
            vec![
                json!("user"),
                json!("assistantGroup"),
                json!("user"),
                json!("tasks"),
                json!("compare")
            ]
        );
        assert_eq!(flat[1]["authorRole"], json!("assistant"));
        assert_eq!(flat[1]["type"], json!("assistantGroup"));
    }

    #[test]
    fn context_tree_covers_every_message() {
        let input = messages(
            r#"[{"id":"u1","role":"user"},
                {"id":"k1","role":"task","parentId":"u1","agentId":"x"},
                {"id":"k2","role":"task","parentId":"u1","agentId":"x"},
                {"id":"s1","role":"assistant","parentId":"u1"},
                {"id":"s2","role":"assistant","parentId":"u1"},
                {"id":"a1","role":"assistant","parentId":"s1","tools":[{"id":"c1"},{"id":"c2"}]},
                {"id":"r1","role":"tool","parentId":"a1","tool_call_id":"c1"},
                {"id":"r2","role":"tool","parentId":"a1","tool_call_id":"c2"},
                {"id":"x1","role":"assistant","parentId":"r1"},
                {"id":"x2","role":"assistant","parentId":"r2"}]"#,
        );
        let result = parse(&input, &[]);

        let tree = serde_json::to_string(&result.context_tree).expect("json");
        for message in &input {
            assert!(
                tree.contains(&format!("\"id\":\"{}\"", message.id)),
                "missing {}",
                message.id
            );
        }
        assert_eq!(ids(&result.flat_list), vec!["u1", "tasks-k1", "s1", "a1", "x2"]);
    }

    #[test]
    fn empty_input_gives_empty_result() {
        let result = parse(&[], &[]);
        assert!(result.flat_list.is_empty());
        assert!(result.context_tree.is_empty());
        assert!(result.message_map.is_empty());
    }

    #[test]
    fn serializes_with_camel_case_tags() {
        let result = parse_raw(r#"[{"id":"u1","role":"user","content":"hi"}]"#);
        let value = serde_json::to_value(&result).expect("value");
        assert_eq!(value["flatList"][0]["type"], json!("message"));
        assert_eq!(value["contextTree"][0], json!({"type": "message", "id": "u1"}));
        assert!(value["messageMap"]["u1"].is_object());
    }

    #[test]
    fn ten_thousand_roots_parse_within_budget() {
        let raw = (0..10_000)
            .map(|idx| {
                let role = if idx % 2 == 0 { "user" } else { "assistant" };
                json!({"id": format!("msg-{idx}"), "role": role, "content": "hello", "createdAt": idx})
            })
            .collect::<Vec<_>>();
        let input: Vec<Message> = serde_json::from_value(json!(raw)).expect("decode fixture");
        let budget = if cfg!(debug_assertions) {
            Duration::from_secs(1)
        } else {
            Duration::from_millis(100)
        };

        let started = Instant::now();
        let result = parse(&input, &[]);
        let elapsed = started.elapsed();

        assert_eq!(result.flat_list.len(), 10_000);
        assert!(elapsed < budget, "parse took {elapsed:?}");
    }
}
