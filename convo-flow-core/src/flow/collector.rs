use crate::flow::indexer::HelperMaps;
use crate::flow::structurer::IdTree;
use crate::flow::usage::UsageAccumulator;
use crate::model::{Message, MessageRole, ToolCall};
use crate::node::UsageSummary;

/// A non-branching run of assistant turns and their tool results.
#[derive(Debug)]
pub struct Chain<'a> {
    pub members: Vec<&'a Message>,
    /// Member the active path continues from once the chain is emitted.
    pub tail: &'a Message,
    pub tools: Vec<ToolCall>,
    pub usage: Option<UsageSummary>,
    /// Set when more than one tool result of the last call has replies.
    pub fork: Option<ResultFork<'a>>,
}

/// Tool results of one call that were each answered separately.
#[derive(Debug)]
pub struct ResultFork<'a> {
    pub caller: &'a Message,
    /// Answered results in input order; the last one is on the active path.
    pub results: Vec<&'a Message>,
}

impl Chain<'_> {
    /// True when the chain went through at least one tool call.
    pub fn is_tool_chain(&self) -> bool {
        !self.tools.is_empty()
    }
}

pub struct MessageCollector<'t, 'a> {
    maps: &'t HelperMaps<'a>,
    tree: &'t IdTree<'a>,
}

impl<'t, 'a> MessageCollector<'t, 'a> {
    pub fn new(maps: &'t HelperMaps<'a>, tree: &'t IdTree<'a>) -> Self {
        Self { maps, tree }
    }

    pub fn children(&self, id: &str) -> Vec<&'a Message> {
        self.tree
            .children(id)
            .iter()
            .filter_map(|child| self.maps.message(child))
            .collect()
    }

    /// Follows `head` through tool calls, tool results and single assistant
    /// replies until a fork, a role change or a dead end.
    pub fn collect_chain(&self, head: &'a Message) -> Chain<'a> {
        let mut members = vec![head];
        let mut tail = head;
        let mut tools = Vec::new();
        let mut usage = UsageAccumulator::default();
        let mut fork = None;
        usage.add(head.metadata.as_ref());

        let mut current = head;
        while current.has_tools() {
            let results = self
                .children(&current.id)
                .into_iter()
                .filter(|child| child.role == MessageRole::Tool)
                .collect::<Vec<_>>();
            tools.extend(current.tool_calls().iter().map(|call| {
                let mut call = call.clone();
                if call.result_msg_id.is_none() {
                    call.result_msg_id = results
                        .iter()
                        .find(|result| result.tool_call_id.as_deref() == Some(call.id.as_str()))
                        .map(|result| result.id.clone());
                }
                call
            }));
            let Some(&last_result) = results.last() else {
                break;
            };
            members.extend(results.iter().copied());

            // The reply hangs off whichever result the model answered last.
            let answered = results
                .iter()
                .copied()
                .filter(|result| !self.tree.children(&result.id).is_empty())
                .collect::<Vec<_>>();
            let anchor = answered.last().copied().unwrap_or(last_result);
            tail = anchor;
            if answered.len() > 1 {
                fork = Some(ResultFork {
                    caller: current,
                    results: answered,
                });
                break;
            }

            let next = match self.tree.children(&anchor.id) {
                [only] => self.maps.message(only),
                _ => None,
            };
            let Some(next) = next.filter(|next| continues_chain(head, next)) else {
                break;
            };

            members.push(next);
            usage.add(next.metadata.as_ref());
            tail = next;
            current = next;
        }

        Chain {
            members,
            tail,
            tools,
            usage: usage.finish(),
            fork,
        }
    }
}

fn continues_chain(head: &Message, next: &Message) -> bool {
    matches!(next.role, MessageRole::Assistant | MessageRole::Supervisor)
        && next.is_supervisor() == head.is_supervisor()
        && next.agent_id == head.agent_id
}

#[cfg(test)]
mod tests {
    use crate::flow::collector::MessageCollector;
    use crate::flow::indexer::build_helper_maps;
    use crate::flow::structurer::build_id_tree;
    use crate::model::Message;

    fn messages(raw: &str) -> Vec<Message> {
        serde_json::from_str(raw).expect("decode messages")
    }

    fn ids(members: &[&Message]) -> Vec<String> {
        members.iter().map(|member| member.id.clone()).collect()
    }

    #[test]
    fn follows_tool_results_into_the_reply() {
        let input = messages(
            r#"[{"id":"u1","role":"user"},
                {"id":"a1","role":"assistant","parentId":"u1","tools":[{"id":"call-1","apiName":"search","identifier":"web"}],"metadata":{"totalTokens":10}},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"call-1"},
                {"id":"a2","role":"assistant","parentId":"t1","metadata":{"totalTokens":4}},
                {"id":"u2","role":"user","parentId":"a2"}]"#,
        );
        let maps = build_helper_maps(&input, &[]);
        let tree = build_id_tree(&maps);
        let collector = MessageCollector::new(&maps, &tree);

        let chain = collector.collect_chain(maps.message("a1").expect("a1"));
        assert_eq!(ids(&chain.members), vec!["a1", "t1", "a2"]);
        assert_eq!(chain.tail.id, "a2");
        assert_eq!(chain.tools[0].result_msg_id.as_deref(), Some("t1"));
        let usage = chain.usage.expect("usage");
        assert_eq!(usage.usage.get("totalTokens"), Some(&serde_json::json!(14)));
    }

    #[test]
    fn stops_before_a_user_reply_to_a_tool_result() {
        let input = messages(
            r#"[{"id":"a1","role":"assistant","tools":[{"id":"call-1"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"call-1"},
                {"id":"u2","role":"user","parentId":"t1"}]"#,
        );
        let maps = build_helper_maps(&input, &[]);
        let tree = build_id_tree(&maps);
        let collector = MessageCollector::new(&maps, &tree);

        let chain = collector.collect_chain(maps.message("a1").expect("a1"));
        assert_eq!(ids(&chain.members), vec!["a1", "t1"]);
        assert_eq!(chain.tail.id, "t1");
    }

    #[test]
    fn stops_at_a_fork_after_tool_results() {
        let input = messages(
            r#"[{"id":"a1","role":"assistant","tools":[{"id":"call-1"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"call-1"},
                {"id":"r1","role":"assistant","parentId":"t1"},
                {"id":"r2","role":"assistant","parentId":"t1"}]"#,
        );
        let maps = build_helper_maps(&input, &[]);
        let tree = build_id_tree(&maps);
        let collector = MessageCollector::new(&maps, &tree);

        let chain = collector.collect_chain(maps.message("a1").expect("a1"));
        assert_eq!(ids(&chain.members), vec!["a1", "t1"]);
        assert!(chain.is_tool_chain());
    }

    #[test]
    fn separately_answered_results_end_the_chain_in_a_fork() {
        let input = messages(
            r#"[{"id":"a1","role":"assistant","tools":[{"id":"c1"},{"id":"c2"}]},
                {"id":"t1","role":"tool","parentId":"a1","tool_call_id":"c1"},
                {"id":"t2","role":"tool","parentId":"a1","tool_call_id":"c2"},
                {"id":"r1","role":"assistant","parentId":"t1"},
                {"id":"r2","role":"assistant","parentId":"t2"}]"#,
        );
        let maps = build_helper_maps(&input, &[]);
        let tree = build_id_tree(&maps);
        let collector = MessageCollector::new(&maps, &tree);

        let chain = collector.collect_chain(maps.message("a1").expect("a1"));
        assert_eq!(ids(&chain.members), vec!["a1", "t1", "t2"]);
        assert_eq!(chain.tail.id, "t2");
        let fork = chain.fork.expect("result fork");
        assert_eq!(fork.caller.id, "a1");
        assert_eq!(ids(&fork.results), vec!["t1", "t2"]);
    }

    #[test]
    fn plain_assistant_is_a_single_member_chain() {
        let input = messages(r#"[{"id":"a1","role":"assistant","content":"hi"}]"#);
        let maps = build_helper_maps(&input, &[]);
        let tree = build_id_tree(&maps);
        let collector = MessageCollector::new(&maps, &tree);

        let chain = collector.collect_chain(maps.message("a1").expect("a1"));
        assert_eq!(ids(&chain.members), vec!["a1"]);
        assert!(!chain.is_tool_chain());
        assert!(chain.usage.is_none());
    }
}
