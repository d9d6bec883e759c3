use tracing::{debug, warn};

use crate::model::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchChoice<'a> {
    /// No children.
    Leaf,
    Follow { child: &'a str, index: usize },
    /// The selected branch does not exist yet (optimistic placeholder) or the
    /// index is out of range. Descent stops at the parent.
    Pending { index: usize },
}

impl<'a> BranchChoice<'a> {
    pub fn child(self) -> Option<&'a str> {
        match self {
            Self::Follow { child, .. } => Some(child),
            Self::Leaf | Self::Pending { .. } => None,
        }
    }
}

/// Picks the child the active path continues through.
pub fn resolve_branch<'a>(message: &Message, children: &[&'a str]) -> BranchChoice<'a> {
    if children.is_empty() {
        return BranchChoice::Leaf;
    }

    let Some(index) = message.active_branch_index() else {
        return BranchChoice::Follow {
            child: children[0],
            index: 0,
        };
    };

    if let Some(&child) = children.get(index) {
        return BranchChoice::Follow { child, index };
    }

    if index == children.len() {
        debug!(
            message_id = %message.id,
            index,
            "active branch is still pending, stopping descent"
        );
    } else {
        warn!(
            message_id = %message.id,
            index,
            children = children.len(),
            "active branch index out of range, stopping descent"
        );
    }
    BranchChoice::Pending { index }
}

pub fn resolve_active_child<'a>(message: &Message, children: &[&'a str]) -> Option<&'a str> {
    resolve_branch(message, children).child()
}

#[cfg(test)]
mod tests {
    use crate::flow::branch::{BranchChoice, resolve_active_child, resolve_branch};
    use crate::model::Message;

    fn message(active_branch_index: Option<usize>) -> Message {
        serde_json::from_value(serde_json::json!({
            "id": "u1",
            "role": "user",
            "metadata": { "activeBranchIndex": active_branch_index },
        }))
        .expect("message")
    }

    #[test]
    fn leaf_has_no_active_child() {
        assert_eq!(resolve_branch(&message(None), &[]), BranchChoice::Leaf);
        assert_eq!(resolve_active_child(&message(Some(0)), &[]), None);
    }

    #[test]
    fn defaults_to_the_first_child() {
        assert_eq!(resolve_active_child(&message(None), &["a", "b"]), Some("a"));
        assert_eq!(resolve_active_child(&message(None), &["only"]), Some("only"));
    }

    #[test]
    fn follows_the_selected_index() {
        assert_eq!(
            resolve_branch(&message(Some(1)), &["a", "b"]),
            BranchChoice::Follow {
                child: "b",
                index: 1
            }
        );
    }

    #[test]
    fn pending_and_out_of_range_indexes_stop() {
        assert_eq!(
            resolve_branch(&message(Some(2)), &["a", "b"]),
            BranchChoice::Pending { index: 2 }
        );
        assert_eq!(resolve_active_child(&message(Some(7)), &["a", "b"]), None);
    }
}
