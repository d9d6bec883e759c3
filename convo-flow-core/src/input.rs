use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::model::{Message, MessageGroupMetadata};

/// Engine input decoded from a message dump.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInput {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub message_groups: Vec<MessageGroupMetadata>,
}

/// Decodes a bare message array or a `{ messages, messageGroups }` object.
pub fn decode_document(raw: &str) -> serde_json::Result<ConversationInput> {
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str::<Vec<Message>>(raw).map(|messages| ConversationInput {
            messages,
            message_groups: Vec::new(),
        });
    }
    serde_json::from_str(raw)
}

pub fn read_document(path: &Path) -> Result<ConversationInput> {
    let raw = read_non_empty(path)?;
    decode_document(&raw).map_err(|source| FlowError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

pub fn decode_groups(raw: &str) -> serde_json::Result<Vec<MessageGroupMetadata>> {
    serde_json::from_str(raw)
}

pub fn read_groups(path: &Path) -> Result<Vec<MessageGroupMetadata>> {
    let raw = read_non_empty(path)?;
    decode_groups(&raw).map_err(|source| FlowError::InvalidJson {
        path: path.to_path_buf(),
        source,
    })
}

fn read_non_empty(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|source| FlowError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Err(FlowError::EmptyInput {
            path: path.to_path_buf(),
        });
    }
    Ok(raw)
}
