use tracing::debug;

use crate::flow::branch::{BranchChoice, resolve_branch};
use crate::flow::transformer::{ActiveSibling, MessageTransformer, Step};
use crate::model::Message;
use crate::node::FlowNode;

/// Builds the single active sequence: exactly one branch at every fork.
pub struct FlatListBuilder<'r, 't, 'a> {
    transformer: &'r MessageTransformer<'t, 'a>,
}

impl<'r, 't, 'a> FlatListBuilder<'r, 't, 'a> {
    pub fn new(transformer: &'r MessageTransformer<'t, 'a>) -> Self {
        Self { transformer }
    }

    pub fn flatten(&self) -> Vec<FlowNode> {
        let tree = self.transformer.tree();
        let mut nodes = Vec::with_capacity(tree.len());

        for step in self.transformer.segment_roots(&tree.roots) {
            if let Some(tail) = self.emit(&step, &mut nodes) {
                self.descend(tail, &mut nodes);
            }
        }

        nodes
    }

    fn emit(&self, step: &Step<'a>, nodes: &mut Vec<FlowNode>) -> Option<&'a Message> {
        nodes.extend(self.transformer.step_to_nodes(step));
        step.tail()
    }

    fn descend(&self, from: &'a Message, nodes: &mut Vec<FlowNode>) {
        let tree = self.transformer.tree();
        let maps = self.transformer.maps();
        let mut parent = from;

        loop {
            let children = self.transformer.children(&parent.id);
            let step = match self.transformer.classify_children(parent, &children) {
                Some(step) => match step.active_sibling(parent, &children) {
                    ActiveSibling::Step => step,
                    ActiveSibling::Other(message) => {
                        Step::Unit(self.transformer.build_unit(message))
                    }
                    ActiveSibling::Pending => {
                        debug!(
                            message_id = %parent.id,
                            "active branch is still pending, stopping descent"
                        );
                        return;
                    }
                },
                None => {
                    let BranchChoice::Follow { child, .. } =
                        resolve_branch(parent, tree.children(&parent.id))
                    else {
                        return;
                    };
                    let Some(message) = maps.message(child) else {
                        return;
                    };
                    Step::Unit(self.transformer.build_unit(message))
                }
            };

            match self.emit(&step, nodes) {
                Some(tail) => parent = tail,
                None => return,
            }
        }
    }
}
