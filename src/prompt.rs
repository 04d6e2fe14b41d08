//! Conversation types and prompt assembly.
//!
//! [`build_prompt`] is a pure function: it renders the retrieved records into a
//! context block, appends that block to the user's query, and pairs the result
//! with the system instruction and the prior conversation turns.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::retrieval::RetrievedRecord;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Everything the completion provider needs for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPayload {
    pub system_instruction: String,
    /// Prior turns, oldest first, without the triggering user message.
    pub history: Vec<Message>,
    /// The user's query followed by the formatted retrieval context.
    pub augmented_user_message: String,
}

impl PromptPayload {
    /// Provider message list: system instruction first, then history, then the
    /// augmented user message.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system_instruction.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.augmented_user_message.clone()));
        messages
    }
}

/// How records are rendered into the context block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFormat {
    /// Label for the record identifier line, e.g. `"Professor"`.
    pub id_label: String,
    /// Metadata fields rendered first, in this order. Other fields follow in key order.
    pub metadata_fields: Vec<String>,
}

impl Default for ContextFormat {
    fn default() -> Self {
        Self {
            id_label: "Professor".into(),
            metadata_fields: vec!["review".into(), "subject".into(), "stars".into()],
        }
    }
}

impl From<&crate::config::RetrievalConfig> for ContextFormat {
    fn from(config: &crate::config::RetrievalConfig) -> Self {
        Self {
            id_label: config.id_label.clone(),
            metadata_fields: config.metadata_fields.clone(),
        }
    }
}

/// Assemble the prompt for one request.
///
/// `history` is the full conversation; when its last entry is the triggering
/// user message, that entry is dropped in favor of the augmented version.
/// No token budget is applied.
pub fn build_prompt(
    history: &[Message],
    user_query: &str,
    records: &[RetrievedRecord],
    system_instruction: &str,
    format: &ContextFormat,
) -> PromptPayload {
    let prior = match history.split_last() {
        Some((last, prior)) if last.role == Role::User => prior,
        _ => history,
    };

    let mut augmented_user_message = String::with_capacity(user_query.len() + 256 * records.len());
    augmented_user_message.push_str(user_query);
    augmented_user_message.push_str(&format_context(records, format));

    PromptPayload {
        system_instruction: system_instruction.to_owned(),
        history: prior.to_vec(),
        augmented_user_message,
    }
}

/// Render all records, each block preceded by a blank-line separator.
/// Empty input renders as an empty string.
pub fn format_context(records: &[RetrievedRecord], format: &ContextFormat) -> String {
    let mut context = String::new();
    for record in records {
        context.push_str("\n\n");
        context.push_str(&format_record(record, format));
    }
    context
}

/// Render one record: the identifier line, then one line per metadata field.
pub fn format_record(record: &RetrievedRecord, format: &ContextFormat) -> String {
    let mut block = format!("{}: {}", format.id_label, record.id);

    for field in &format.metadata_fields {
        if let Some(value) = record.metadata.get(field) {
            let _ = write!(block, "\n{}: {}", field_label(field), value);
        }
    }
    for (field, value) in &record.metadata {
        if format.metadata_fields.iter().any(|f| f == field) {
            continue;
        }
        let _ = write!(block, "\n{}: {}", field_label(field), value);
    }

    block
}

/// `"review"` → `"Review"`.
fn field_label(field: &str) -> String {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
