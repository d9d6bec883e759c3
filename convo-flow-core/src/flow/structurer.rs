use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::flow::indexer::HelperMaps;

/// Multi-branch id tree of the main conversation, stored flat.
#[derive(Debug, Default)]
pub struct IdTree<'a> {
    pub roots: Vec<&'a str>,
    /// Every reachable id in depth-first pre-order.
    pub order: Vec<&'a str>,
    /// Whole input is a thread hanging off a message that is not present.
    pub thread_mode: bool,
    children: HashMap<&'a str, Vec<&'a str>>,
}

/// Nested view of an [`IdTree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdNode {
    pub id: String,
    pub children: Vec<IdNode>,
}

impl<'a> IdTree<'a> {
    pub fn children(&self, id: &str) -> &[&'a str] {
        self.children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn to_nested(&self) -> Vec<IdNode> {
        // Descendants follow their ancestor in pre-order, so walking it
        // backwards always finds children already built.
        let mut built = HashMap::<&str, IdNode>::with_capacity(self.order.len());
        for &id in self.order.iter().rev() {
            let children = self
                .children(id)
                .iter()
                .filter_map(|child| built.remove(child))
                .collect();
            built.insert(
                id,
                IdNode {
                    id: id.to_string(),
                    children,
                },
            );
        }

        self.roots
            .iter()
            .filter_map(|root| built.remove(root))
            .collect()
    }
}

pub fn build_id_tree<'a>(maps: &HelperMaps<'a>) -> IdTree<'a> {
    let thread_mode = is_thread_mode(maps);
    if thread_mode {
        debug!("no root message present, treating input as a thread");
    }

    let include = |id: &str| {
        thread_mode
            || maps
                .message(id)
                .is_some_and(|message| message.thread_id.is_none())
    };

    let roots = maps
        .order
        .iter()
        .copied()
        .filter(|id| match maps.parent_id(id) {
            None => true,
            Some(parent_id) if maps.message(parent_id).is_none() => {
                trace!(message_id = id, parent_id, "dangling parent, promoted to root");
                true
            }
            Some(_) => false,
        })
        .filter(|id| include(*id))
        .collect::<Vec<_>>();

    let mut tree = IdTree {
        thread_mode,
        order: Vec::with_capacity(maps.order.len()),
        ..IdTree::default()
    };
    let mut visited = HashSet::<&str>::with_capacity(maps.order.len());
    let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        tree.order.push(id);

        let mut children = Vec::new();
        for &child in maps.children(id) {
            if !include(child) {
                continue;
            }
            if visited.contains(child) {
                warn!(message_id = id, child_id = child, "parent cycle detected, skipping child");
                continue;
            }
            children.push(child);
        }

        stack.extend(children.iter().rev());
        if !children.is_empty() {
            tree.children.insert(id, children);
        }
    }

    tree.roots = roots;
    tree
}

fn is_thread_mode(maps: &HelperMaps<'_>) -> bool {
    if !maps.root_ids.is_empty() {
        return false;
    }
    maps.order
        .first()
        .and_then(|first| maps.parent_id(first))
        .is_some_and(|parent_id| maps.message(parent_id).is_none())
}
