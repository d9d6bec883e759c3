use std::collections::HashMap;

use tracing::trace;

use crate::model::{Message, MessageGroupMetadata};

/// Lookup tables over one input snapshot. Rebuilt on every parse.
#[derive(Debug, Default)]
pub struct HelperMaps<'a> {
    pub message_map: HashMap<&'a str, &'a Message>,
    /// Parent id -> child ids in input order, compressed-group redirection applied.
    pub children_map: HashMap<&'a str, Vec<&'a str>>,
    /// Messages without a parent (the `null` key of the children map).
    pub root_ids: Vec<&'a str>,
    pub thread_map: HashMap<&'a str, Vec<&'a Message>>,
    pub message_group_map: HashMap<&'a str, &'a MessageGroupMetadata>,
    /// Effective parent of each message, after redirection.
    pub parent_map: HashMap<&'a str, &'a str>,
    /// Distinct ids in first-seen input order.
    pub order: Vec<&'a str>,
}

impl<'a> HelperMaps<'a> {
    pub fn message(&self, id: &str) -> Option<&'a Message> {
        self.message_map.get(id).copied()
    }

    pub fn children(&self, id: &str) -> &[&'a str] {
        self.children_map
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn parent_id(&self, id: &str) -> Option<&'a str> {
        self.parent_map.get(id).copied()
    }

    pub fn parent(&self, id: &str) -> Option<&'a Message> {
        self.parent_id(id).and_then(|parent_id| self.message(parent_id))
    }

    pub fn group(&self, group_id: &str) -> Option<&'a MessageGroupMetadata> {
        self.message_group_map.get(group_id).copied()
    }
}

pub fn build_helper_maps<'a>(
    messages: &'a [Message],
    message_groups: &'a [MessageGroupMetadata],
) -> HelperMaps<'a> {
    let mut redirects = HashMap::<&str, &str>::new();
    for message in messages {
        if let Some(last_message_id) = message.compressed_last_message_id() {
            redirects.insert(last_message_id, message.id.as_str());
        }
    }

    let mut maps = HelperMaps {
        message_map: HashMap::with_capacity(messages.len()),
        children_map: HashMap::with_capacity(messages.len()),
        parent_map: HashMap::with_capacity(messages.len()),
        order: Vec::with_capacity(messages.len()),
        ..HelperMaps::default()
    };

    for message in messages {
        let id = message.id.as_str();
        if maps.message_map.insert(id, message).is_some() {
            // Duplicate id: the later record wins the lookup, the first keeps its place.
            continue;
        }
        maps.order.push(id);

        match effective_parent_id(message, &redirects) {
            Some(parent_id) => {
                maps.parent_map.insert(id, parent_id);
                maps.children_map.entry(parent_id).or_default().push(id);
            }
            None => maps.root_ids.push(id),
        }

        if let Some(thread_id) = message.thread_id.as_deref() {
            maps.thread_map.entry(thread_id).or_default().push(message);
        }
    }

    for group in message_groups {
        maps.message_group_map.insert(group.id.as_str(), group);
    }

    maps
}

fn effective_parent_id<'a>(
    message: &'a Message,
    redirects: &HashMap<&'a str, &'a str>,
) -> Option<&'a str> {
    let parent_id = message.parent_id.as_deref()?;
    match redirects.get(parent_id) {
        Some(&group_id) if group_id != message.id => {
            trace!(
                message_id = %message.id,
                from = parent_id,
                to = group_id,
                "redirected parent into compressed group"
            );
            Some(group_id)
        }
        _ => Some(parent_id),
    }
}
