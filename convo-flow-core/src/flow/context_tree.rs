use std::mem;

use crate::flow::transformer::{
    ActiveSibling, MessageTransformer, Step, Unit, council_id, task_group_identity,
};
use crate::model::Message;
use crate::node::ContextNode;

/// Work left for the current sequence.
#[derive(Debug)]
enum Seed<'a> {
    /// Emit this message's unit, then continue below it.
    At(&'a Message),
    /// Like `At`, with the folding applied to task-run summaries.
    Trailing(&'a Message),
    /// Continue below an already emitted message.
    Below(&'a Message),
    Step(Step<'a>),
    /// Sequences hanging off one point. A single seed continues in place.
    Fork {
        parent_id: String,
        active_branch_index: usize,
        seeds: Vec<Seed<'a>>,
    },
}

/// Node whose nested sequences are still being walked.
enum Shape {
    Branch {
        parent_message_id: String,
        active_branch_index: usize,
    },
    Compare {
        id: String,
        message_id: Option<String>,
        active_column_id: Option<String>,
    },
    Council {
        id: String,
    },
}

impl Shape {
    fn assemble(self, sequences: Vec<Vec<ContextNode>>) -> ContextNode {
        match self {
            Self::Branch {
                parent_message_id,
                active_branch_index,
            } => ContextNode::Branch {
                parent_message_id,
                active_branch_index,
                branches: sequences,
            },
            Self::Compare {
                id,
                message_id,
                active_column_id,
            } => ContextNode::Compare {
                id,
                message_id,
                columns: sequences,
                active_column_id,
            },
            Self::Council { id } => ContextNode::AgentCouncil {
                id,
                members: sequences,
            },
        }
    }
}

struct Frame<'a> {
    outer: Vec<ContextNode>,
    shape: Shape,
    done: Vec<Vec<ContextNode>>,
    remaining: std::vec::IntoIter<Seed<'a>>,
    /// How `outer` continues once the node is assembled.
    then: Option<Seed<'a>>,
}

/// Builds the navigation tree: like the flat list, but every fork keeps all
/// of its branches and every message shows up somewhere.
pub struct ContextTreeBuilder<'r, 't, 'a> {
    transformer: &'r MessageTransformer<'t, 'a>,
}

impl<'r, 't, 'a> ContextTreeBuilder<'r, 't, 'a> {
    pub fn new(transformer: &'r MessageTransformer<'t, 'a>) -> Self {
        Self { transformer }
    }

    pub fn build(&self) -> Vec<ContextNode> {
        let tree = self.transformer.tree();
        let mut nodes = Vec::new();

        for step in self.transformer.segment_roots(&tree.roots) {
            nodes.extend(self.walk(Seed::Step(step)));
        }

        nodes
    }

    fn walk(&self, start: Seed<'a>) -> Vec<ContextNode> {
        let mut frames = Vec::<Frame<'a>>::new();
        let mut out = Vec::new();
        let mut next = Some(start);

        loop {
            while let Some(seed) = next.take() {
                next = self.advance(seed, &mut out, &mut frames);
            }

            // The current sequence ended: close every frame it completes.
            loop {
                let Some(mut frame) = frames.pop() else {
                    return out;
                };
                frame.done.push(mem::take(&mut out));
                if let Some(seed) = frame.remaining.next() {
                    frames.push(frame);
                    next = Some(seed);
                    break;
                }
                out = frame.outer;
                out.push(frame.shape.assemble(frame.done));
                if frame.then.is_some() {
                    next = frame.then;
                    break;
                }
            }
        }
    }

    /// Handles one seed and returns what follows it in the same sequence.
    fn advance(
        &self,
        seed: Seed<'a>,
        out: &mut Vec<ContextNode>,
        frames: &mut Vec<Frame<'a>>,
    ) -> Option<Seed<'a>> {
        match seed {
            Seed::At(message) => {
                Some(self.emit_unit(&self.transformer.build_unit(message), out))
            }
            Seed::Trailing(message) => {
                Some(self.emit_unit(&self.transformer.build_trailing_unit(message), out))
            }
            Seed::Below(message) => self.below(message),
            Seed::Step(step) => self.emit_step(step, out, frames),
            Seed::Fork {
                parent_id,
                active_branch_index,
                seeds,
            } => {
                if seeds.len() < 2 {
                    return seeds.into_iter().next();
                }
                let mut remaining = seeds.into_iter();
                let first = remaining.next();
                frames.push(Frame {
                    outer: mem::take(out),
                    shape: Shape::Branch {
                        parent_message_id: parent_id,
                        active_branch_index,
                    },
                    done: Vec::new(),
                    remaining,
                    then: None,
                });
                first
            }
        }
    }

    /// What follows an emitted message: nothing, one child, a pattern over
    /// its children, or a fork.
    fn below(&self, parent: &'a Message) -> Option<Seed<'a>> {
        let children = self.transformer.children(&parent.id);
        if let Some(step) = self.transformer.classify_children(parent, &children) {
            return Some(place_step(parent, &children, step));
        }
        match children.as_slice() {
            [] => None,
            [only] => Some(Seed::At(*only)),
            _ => Some(Seed::Fork {
                parent_id: parent.id.clone(),
                active_branch_index: parent.active_branch_index().unwrap_or(0),
                seeds: children.iter().copied().map(Seed::At).collect(),
            }),
        }
    }

    fn emit_unit(&self, unit: &Unit<'a>, out: &mut Vec<ContextNode>) -> Seed<'a> {
        out.push(unit_node(unit));
        match unit {
            Unit::AssistantGroup(chain) => match &chain.fork {
                Some(fork) => Seed::Fork {
                    parent_id: fork.caller.id.clone(),
                    active_branch_index: fork.results.len().saturating_sub(1),
                    seeds: fork.results.iter().map(|&result| Seed::Below(result)).collect(),
                },
                None => Seed::Below(chain.tail),
            },
            Unit::Passthrough(message) | Unit::Supervisor(message) => Seed::Below(*message),
        }
    }

    fn emit_step(
        &self,
        step: Step<'a>,
        out: &mut Vec<ContextNode>,
        frames: &mut Vec<Frame<'a>>,
    ) -> Option<Seed<'a>> {
        match step {
            Step::Unit(unit) => Some(self.emit_unit(&unit, out)),
            Step::Tasks {
                parent,
                tasks,
                summaries,
                trailing,
                halted,
            } => {
                let (id, shared_agent) = task_group_identity(&tasks);
                let children = tasks.iter().map(|task| ContextNode::message(&task.id)).collect();
                let parent_id = parent.map_or_else(|| id.clone(), |parent| parent.id.clone());
                out.push(if shared_agent {
                    ContextNode::Tasks { id, children }
                } else {
                    ContextNode::GroupTasks { id, children }
                });

                // Summary versions first, then whatever hangs below the tasks.
                let answered = tasks
                    .iter()
                    .copied()
                    .filter(|task| !self.transformer.tree().children(&task.id).is_empty())
                    .collect::<Vec<_>>();
                let active = match (&trailing, tasks.last()) {
                    (Some(unit), _) => summaries.iter().position(|m| m.id == unit.head().id),
                    (None, Some(last)) if !halted => answered
                        .iter()
                        .position(|task| task.id == last.id)
                        .map(|idx| summaries.len() + idx),
                    _ => None,
                };
                let seeds = summaries
                    .iter()
                    .map(|&summary| Seed::Trailing(summary))
                    .chain(answered.iter().map(|&task| Seed::Below(task)))
                    .collect::<Vec<_>>();
                Some(Seed::Fork {
                    parent_id,
                    active_branch_index: active.unwrap_or(seeds.len()),
                    seeds,
                })
            }
            Step::Compare {
                id,
                anchor,
                columns,
                active,
                ..
            } => {
                let shape = Shape::Compare {
                    id,
                    message_id: anchor.map(|anchor| anchor.id.clone()),
                    active_column_id: columns.get(active).map(|unit| unit.head().id.clone()),
                };
                // Each column holds its unit and everything below it.
                let seeds = columns.into_iter().map(|unit| Seed::Step(Step::Unit(unit)));
                self.open(shape, seeds.collect(), None, out, frames)
            }
            Step::AgentCouncil {
                anchor,
                members,
                supervisors,
                trailing,
                ..
            } => {
                let shape = Shape::Council {
                    id: council_id(anchor),
                };
                let active = trailing
                    .as_ref()
                    .and_then(|unit| supervisors.iter().position(|m| m.id == unit.head().id));
                let then = Seed::Fork {
                    parent_id: anchor.id.clone(),
                    active_branch_index: active.unwrap_or(supervisors.len()),
                    seeds: supervisors.into_iter().map(Seed::At).collect(),
                };
                let seeds = members.into_iter().map(|unit| Seed::Step(Step::Unit(unit)));
                self.open(shape, seeds.collect(), Some(then), out, frames)
            }
        }
    }

    /// Starts walking the nested sequences of `shape`.
    fn open(
        &self,
        shape: Shape,
        seeds: Vec<Seed<'a>>,
        then: Option<Seed<'a>>,
        out: &mut Vec<ContextNode>,
        frames: &mut Vec<Frame<'a>>,
    ) -> Option<Seed<'a>> {
        let mut remaining = seeds.into_iter();
        let Some(first) = remaining.next() else {
            out.push(shape.assemble(Vec::new()));
            return then;
        };
        frames.push(Frame {
            outer: mem::take(out),
            shape,
            done: Vec::new(),
            remaining,
            then,
        });
        Some(first)
    }
}

/// Wraps a sibling pattern in a fork when some children compete with it.
/// Branches keep the order of their first child.
fn place_step<'a>(parent: &'a Message, children: &[&'a Message], step: Step<'a>) -> Seed<'a> {
    if step.alternatives().is_empty() {
        return Seed::Step(step);
    }

    let alternatives = step.alternatives().to_vec();
    let selection = step.active_sibling(parent, children);
    let mut pattern = Some(step);
    let mut seeds = Vec::with_capacity(alternatives.len() + 1);
    let mut active = None;

    for &child in children {
        if alternatives.iter().any(|alt| alt.id == child.id) {
            if matches!(selection, ActiveSibling::Other(selected) if selected.id == child.id) {
                active = Some(seeds.len());
            }
            seeds.push(Seed::At(child));
        } else if let Some(step) = pattern.take() {
            if selection == ActiveSibling::Step {
                active = Some(seeds.len());
            }
            seeds.push(Seed::Step(step));
        }
    }

    Seed::Fork {
        parent_id: parent.id.clone(),
        active_branch_index: active.unwrap_or(seeds.len()),
        seeds,
    }
}

fn unit_node(unit: &Unit<'_>) -> ContextNode {
    match unit {
        Unit::Passthrough(message) => ContextNode::message(&message.id),
        Unit::Supervisor(message) => ContextNode::Supervisor {
            id: message.id.clone(),
        },
        Unit::AssistantGroup(_) => ContextNode::AssistantGroup {
            id: unit.head().id.clone(),
            children: unit
                .members()
                .into_iter()
                .map(|member| ContextNode::message(&member.id))
                .collect(),
        },
    }
}
