use crate::flow::collector::{Chain, MessageCollector};
use crate::flow::indexer::HelperMaps;
use crate::flow::structurer::IdTree;
use crate::flow::usage::{aggregate_usage, strip_to_usage};
use crate::model::{GroupMode, Message, MessageContent, MessageRole};
use crate::node::{
    AgentCouncil, AssistantGroup, CompareGroup, FlowNode, NodeRole, SupervisorTurn, TaskGroup,
};

/// A single message position resolved to its semantic shape.
#[derive(Debug)]
pub enum Unit<'a> {
    Passthrough(&'a Message),
    Supervisor(&'a Message),
    AssistantGroup(Chain<'a>),
}

impl<'a> Unit<'a> {
    pub fn head(&self) -> &'a Message {
        match self {
            Self::Passthrough(message) | Self::Supervisor(message) => *message,
            Self::AssistantGroup(chain) => chain.members[0],
        }
    }

    /// Message the active path continues from after this unit.
    pub fn tail(&self) -> &'a Message {
        match self {
            Self::Passthrough(message) | Self::Supervisor(message) => *message,
            Self::AssistantGroup(chain) => chain.tail,
        }
    }

    pub fn members(&self) -> Vec<&'a Message> {
        match self {
            Self::Passthrough(message) | Self::Supervisor(message) => vec![*message],
            Self::AssistantGroup(chain) => chain.members.clone(),
        }
    }
}

/// One step along a path: a unit, or an aggregate over sibling messages.
#[derive(Debug)]
pub enum Step<'a> {
    Unit(Unit<'a>),
    Tasks {
        parent: Option<&'a Message>,
        tasks: Vec<&'a Message>,
        /// Non-task siblings of the run; the active one becomes `trailing`.
        summaries: Vec<&'a Message>,
        trailing: Option<Unit<'a>>,
        /// The parent's branch index points past its children.
        halted: bool,
    },
    Compare {
        id: String,
        anchor: Option<&'a Message>,
        columns: Vec<Unit<'a>>,
        active: usize,
        /// Siblings outside the group, such as a regenerated plain reply.
        alternatives: Vec<&'a Message>,
    },
    AgentCouncil {
        anchor: &'a Message,
        members: Vec<Unit<'a>>,
        supervisors: Vec<&'a Message>,
        trailing: Option<Unit<'a>>,
        alternatives: Vec<&'a Message>,
        halted: bool,
    },
}

/// Where the active path goes once a sibling pattern matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActiveSibling<'a> {
    Step,
    /// An explicit branch index selects a sibling the pattern leaves out.
    Other(&'a Message),
    /// The branch index points past the children.
    Pending,
}

impl<'a> Step<'a> {
    pub fn tail(&self) -> Option<&'a Message> {
        match self {
            Self::Unit(unit) => Some(unit.tail()),
            Self::Tasks { halted: true, .. } | Self::AgentCouncil { halted: true, .. } => None,
            Self::Tasks {
                tasks, trailing, ..
            } => trailing
                .as_ref()
                .map(Unit::tail)
                .or_else(|| tasks.last().copied()),
            Self::Compare {
                columns, active, ..
            } => columns.get(*active).map(Unit::tail),
            Self::AgentCouncil {
                members, trailing, ..
            } => trailing
                .as_ref()
                .or_else(|| members.last())
                .map(Unit::tail),
        }
    }

    /// Children of the same parent that compete with this step.
    pub fn alternatives(&self) -> &[&'a Message] {
        match self {
            Self::Compare { alternatives, .. } | Self::AgentCouncil { alternatives, .. } => {
                alternatives
            }
            Self::Unit(_) | Self::Tasks { .. } => &[],
        }
    }

    /// Resolves `parent`'s branch index against a matched pattern. Without
    /// an index the pattern stays on the active path.
    pub fn active_sibling(&self, parent: &Message, children: &[&'a Message]) -> ActiveSibling<'a> {
        let Some(selected) = indexed_child(parent, children) else {
            return ActiveSibling::Step;
        };
        match selected {
            Some(child) if self.alternatives().iter().any(|alt| alt.id == child.id) => {
                ActiveSibling::Other(child)
            }
            None if matches!(self, Self::Compare { .. }) => ActiveSibling::Pending,
            _ => ActiveSibling::Step,
        }
    }
}

/// The child an explicit branch index selects: `None` without an index,
/// `Some(None)` when the index is out of range.
fn indexed_child<'a>(parent: &Message, children: &[&'a Message]) -> Option<Option<&'a Message>> {
    parent
        .active_branch_index()
        .map(|index| children.get(index).copied())
}

fn is_council_member(message: &Message) -> bool {
    message.role == MessageRole::Assistant && !message.is_supervisor() && message.agent_id.is_some()
}

pub struct MessageTransformer<'t, 'a> {
    maps: &'t HelperMaps<'a>,
    tree: &'t IdTree<'a>,
    collector: MessageCollector<'t, 'a>,
}

impl<'t, 'a> MessageTransformer<'t, 'a> {
    pub fn new(maps: &'t HelperMaps<'a>, tree: &'t IdTree<'a>) -> Self {
        Self {
            maps,
            tree,
            collector: MessageCollector::new(maps, tree),
        }
    }

    pub fn maps(&self) -> &'t HelperMaps<'a> {
        self.maps
    }

    pub fn tree(&self) -> &'t IdTree<'a> {
        self.tree
    }

    pub fn children(&self, id: &str) -> Vec<&'a Message> {
        self.collector.children(id)
    }

    /// Classifies the message at one position. First match wins:
    /// compressed group, tool-less supervisor, tool chain, passthrough.
    pub fn build_unit(&self, message: &'a Message) -> Unit<'a> {
        if message.role == MessageRole::CompressedGroup {
            return Unit::Passthrough(message);
        }
        if message.is_supervisor() && !message.has_tools() {
            return Unit::Supervisor(message);
        }
        if matches!(message.role, MessageRole::Assistant | MessageRole::Supervisor)
            && message.has_tools()
        {
            return Unit::AssistantGroup(self.collector.collect_chain(message));
        }
        Unit::Passthrough(message)
    }

    /// Summary turn after a task run: tool-less assistant content is folded
    /// into a group of its own instead of passing through.
    pub fn build_trailing_unit(&self, message: &'a Message) -> Unit<'a> {
        if message.role == MessageRole::Assistant && !message.is_supervisor() && !message.has_tools()
        {
            return Unit::AssistantGroup(Chain {
                members: vec![message],
                tail: message,
                tools: Vec::new(),
                usage: aggregate_usage([message.metadata.as_ref()]),
                fork: None,
            });
        }
        self.build_unit(message)
    }

    /// Sibling patterns among the children of `parent`, in priority order:
    /// task runs, compare columns, agent council. `None` leaves the children
    /// to branch resolution.
    pub fn classify_children(
        &self,
        parent: &'a Message,
        messages: &[&'a Message],
    ) -> Option<Step<'a>> {
        if messages.is_empty() {
            return None;
        }

        if let Some(step) = self.tasks_step(Some(parent), messages) {
            return Some(step);
        }
        if let Some(step) = self.group_compare_step(Some(parent), messages) {
            return Some(step);
        }
        if parent.is_compare_anchor() {
            return Some(self.compare_step(
                format!("compare-{}", parent.id),
                Some(parent),
                messages,
                Vec::new(),
            ));
        }
        self.council_step(parent, messages)
    }

    /// Root-level messages are emitted in order; only task runs and compare
    /// clusters are recognised among them.
    pub fn segment_roots(&self, roots: &[&'a str]) -> Vec<Step<'a>> {
        let messages = roots
            .iter()
            .filter_map(|root| self.maps.message(root))
            .collect::<Vec<_>>();

        let mut steps = Vec::new();
        let mut idx = 0;
        while idx < messages.len() {
            let message = messages[idx];

            if message.role == MessageRole::Task {
                let run = messages[idx..]
                    .iter()
                    .take_while(|candidate| candidate.role == MessageRole::Task)
                    .count();
                if run >= 2 {
                    steps.push(Step::Tasks {
                        parent: None,
                        tasks: messages[idx..idx + run].to_vec(),
                        summaries: Vec::new(),
                        trailing: None,
                        halted: false,
                    });
                    idx += run;
                    continue;
                }
            }

            if let Some(group_id) = self.compare_group_id(message) {
                let run = messages[idx..]
                    .iter()
                    .take_while(|candidate| candidate.group_id.as_deref() == Some(group_id))
                    .count();
                let columns = &messages[idx..idx + run];
                steps.push(self.compare_step(group_id.to_string(), None, columns, Vec::new()));
                idx += run;
                continue;
            }

            steps.push(Step::Unit(self.build_unit(message)));
            idx += 1;
        }

        steps
    }

    fn tasks_step(&self, parent: Option<&'a Message>, messages: &[&'a Message]) -> Option<Step<'a>> {
        let (tasks, summaries): (Vec<_>, Vec<_>) = messages
            .iter()
            .copied()
            .partition(|message| message.role == MessageRole::Task);
        if tasks.len() < 2 {
            return None;
        }

        // A branch index on the parent picks among the summary versions.
        let (trailing, halted) = match parent.and_then(|parent| indexed_child(parent, messages)) {
            Some(None) => (None, true),
            Some(Some(child)) if child.role != MessageRole::Task => (Some(child), false),
            _ => (summaries.first().copied(), false),
        };

        Some(Step::Tasks {
            parent,
            tasks,
            trailing: trailing.map(|message| self.build_trailing_unit(message)),
            summaries,
            halted,
        })
    }

    fn compare_group_id(&self, message: &'a Message) -> Option<&'a str> {
        let group_id = message.group_id.as_deref()?;
        let group = self.maps.group(group_id)?;
        (group.mode == GroupMode::Compare).then_some(group_id)
    }

    fn group_compare_step(
        &self,
        parent: Option<&'a Message>,
        messages: &[&'a Message],
    ) -> Option<Step<'a>> {
        let group_id = messages
            .iter()
            .copied()
            .find_map(|message| self.compare_group_id(message))?;
        let (columns, alternatives): (Vec<_>, Vec<_>) = messages
            .iter()
            .copied()
            .partition(|message| message.group_id.as_deref() == Some(group_id));
        Some(self.compare_step(group_id.to_string(), parent, &columns, alternatives))
    }

    fn compare_step(
        &self,
        id: String,
        anchor: Option<&'a Message>,
        heads: &[&'a Message],
        alternatives: Vec<&'a Message>,
    ) -> Step<'a> {
        let active = heads
            .iter()
            .position(|head| head.is_active_column())
            .unwrap_or(0);
        Step::Compare {
            id,
            anchor,
            columns: heads.iter().map(|&head| self.build_unit(head)).collect(),
            active,
            alternatives,
        }
    }

    /// A supervisor's tool result answered by several agents at once.
    fn council_step(&self, anchor: &'a Message, messages: &[&'a Message]) -> Option<Step<'a>> {
        if anchor.role != MessageRole::Tool
            || !self
                .maps
                .parent(&anchor.id)
                .is_some_and(Message::is_supervisor)
        {
            return None;
        }

        let members = messages
            .iter()
            .copied()
            .filter(|message| is_council_member(message))
            .collect::<Vec<_>>();
        let mut agents = members
            .iter()
            .filter_map(|member| member.agent_id.as_deref())
            .collect::<Vec<_>>();
        agents.sort_unstable();
        agents.dedup();
        if agents.len() < 2 {
            return None;
        }

        let (supervisors, alternatives): (Vec<_>, Vec<_>) = messages
            .iter()
            .copied()
            .filter(|message| !is_council_member(message))
            .partition(|message| message.is_supervisor());

        let (trailing, halted) = match indexed_child(anchor, messages) {
            Some(None) => (None, true),
            Some(Some(child)) if child.is_supervisor() => (Some(child), false),
            _ => (supervisors.first().copied(), false),
        };

        Some(Step::AgentCouncil {
            anchor,
            members: members.iter().map(|&member| self.build_unit(member)).collect(),
            supervisors,
            trailing: trailing.map(|message| self.build_unit(message)),
            alternatives,
            halted,
        })
    }

    pub fn unit_to_node(&self, unit: &Unit<'a>) -> FlowNode {
        match unit {
            Unit::Passthrough(message) => FlowNode::Message(normalize_message(message)),
            Unit::Supervisor(message) => FlowNode::Supervisor(SupervisorTurn {
                id: message.id.clone(),
                role: NodeRole::Supervisor,
                agent_id: message.agent_id.clone(),
                parent_id: self.maps.parent_id(&message.id).map(ToString::to_string),
                content: MessageContent::default(),
                children: vec![normalize_message(message)],
                metadata: message.metadata.clone(),
                created_at: message.created_at,
                updated_at: message.updated_at,
            }),
            Unit::AssistantGroup(chain) => {
                let head = chain.members[0];
                FlowNode::AssistantGroup(AssistantGroup {
                    id: head.id.clone(),
                    role: NodeRole::AssistantGroup,
                    author_role: if head.is_supervisor() {
                        MessageRole::Supervisor
                    } else {
                        MessageRole::Assistant
                    },
                    agent_id: head.agent_id.clone(),
                    parent_id: self.maps.parent_id(&head.id).map(ToString::to_string),
                    children: chain.members.iter().map(|m| normalize_message(m)).collect(),
                    tools: chain.tools.clone(),
                    usage: chain.usage.clone(),
                    created_at: head.created_at,
                    updated_at: chain
                        .members
                        .iter()
                        .map(|member| member.updated_at)
                        .max()
                        .unwrap_or(head.updated_at),
                })
            }
        }
    }

    /// Flat-list nodes for one step, in render order.
    pub fn step_to_nodes(&self, step: &Step<'a>) -> Vec<FlowNode> {
        match step {
            Step::Unit(unit) => vec![self.unit_to_node(unit)],
            Step::Tasks {
                parent,
                tasks,
                trailing,
                ..
            } => {
                let mut nodes = vec![tasks_node(*parent, tasks)];
                nodes.extend(trailing.iter().map(|unit| self.unit_to_node(unit)));
                nodes
            }
            Step::Compare {
                id,
                anchor,
                columns,
                active,
                ..
            } => {
                let heads = columns.iter().map(Unit::head).collect::<Vec<_>>();
                vec![FlowNode::Compare(CompareGroup {
                    id: id.clone(),
                    role: NodeRole::Compare,
                    message_id: anchor.map(|anchor| anchor.id.clone()),
                    columns: columns
                        .iter()
                        .map(|unit| vec![self.unit_to_node(unit)])
                        .collect(),
                    active_column_id: heads.get(*active).map(|head| head.id.clone()),
                    created_at: min_created(&heads),
                    updated_at: max_updated(&heads),
                })]
            }
            Step::AgentCouncil {
                anchor,
                members,
                trailing,
                ..
            } => {
                let heads = members.iter().map(Unit::head).collect::<Vec<_>>();
                let mut nodes = vec![FlowNode::AgentCouncil(AgentCouncil {
                    id: council_id(anchor),
                    role: NodeRole::AgentCouncil,
                    parent_id: Some(anchor.id.clone()),
                    members: members
                        .iter()
                        .map(|unit| vec![self.unit_to_node(unit)])
                        .collect(),
                    created_at: min_created(&heads),
                    updated_at: max_updated(&heads),
                })];
                nodes.extend(trailing.iter().map(|unit| self.unit_to_node(unit)));
                nodes
            }
        }
    }
}

/// Id of a task aggregate and whether every task shares one agent.
pub fn task_group_identity(tasks: &[&Message]) -> (String, bool) {
    let Some(first) = tasks.first() else {
        return (String::from("tasks"), true);
    };
    let shared_agent = tasks.iter().all(|task| task.agent_id == first.agent_id);
    let id = if shared_agent {
        format!("tasks-{}", first.id)
    } else {
        format!("groupTasks-{}", first.id)
    };
    (id, shared_agent)
}

pub fn council_id(anchor: &Message) -> String {
    format!("agentCouncil-{}", anchor.id)
}

fn tasks_node(parent: Option<&Message>, tasks: &[&Message]) -> FlowNode {
    let (id, shared_agent) = task_group_identity(tasks);
    let group = TaskGroup {
        id,
        role: if shared_agent {
            NodeRole::Tasks
        } else {
            NodeRole::GroupTasks
        },
        parent_id: parent.map(|parent| parent.id.clone()),
        agent_id: if shared_agent {
            tasks.first().and_then(|task| task.agent_id.clone())
        } else {
            None
        },
        tasks: tasks.iter().map(|task| normalize_message(task)).collect(),
        created_at: min_created(tasks),
        updated_at: max_updated(tasks),
    };

    if shared_agent {
        FlowNode::Tasks(group)
    } else {
        FlowNode::GroupTasks(group)
    }
}

fn min_created(messages: &[&Message]) -> i64 {
    messages
        .iter()
        .map(|message| message.created_at)
        .min()
        .unwrap_or_default()
}

fn max_updated(messages: &[&Message]) -> i64 {
    messages
        .iter()
        .map(|message| message.updated_at)
        .max()
        .unwrap_or_default()
}

/// Supervisor turns are relabelled wherever they surface.
pub fn normalize_message(message: &Message) -> Message {
    let mut normalized = message.clone();
    if normalized.role == MessageRole::Assistant && message.is_supervisor() {
        normalized.role = MessageRole::Supervisor;
    }
    normalized
}

/// Entry for the message map: relabelled, and trimmed to usage metadata
/// when the message carries tool calls.
pub fn normalize_map_entry(message: &Message) -> Message {
    let mut normalized = normalize_message(message);
    if message.role == MessageRole::Assistant && message.has_tools() {
        normalized.metadata = message.metadata.as_ref().map(strip_to_usage);
    }
    normalized
}
