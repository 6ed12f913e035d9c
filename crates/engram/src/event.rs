//! Message events entering the orchestrator
//!
//! A `MessageEvent` is one turn of a conversation as seen by the
//! orchestrator. Events are immutable once created: the ingestion path
//! consumes them into flush batches and the retrieval path only borrows
//! their content as an implicit query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Role of a conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// System message
    System,
}

impl Role {
    /// Convert role to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A single conversational message event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Conversation this event belongs to
    pub conversation_id: String,
    /// Unique identifier, generated when the caller does not supply one
    pub message_id: Uuid,
    /// Role of the speaker
    pub role: Role,
    /// Message content
    pub content: String,
    /// Free-form key-value metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// When the event entered the orchestrator
    pub received_at: DateTime<Utc>,
}

impl MessageEvent {
    /// Create a new event with a generated message id and current timestamp
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: Uuid::new_v4(),
            role,
            content: content.into(),
            metadata: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Use an explicit message id instead of a generated one
    pub fn with_message_id(mut self, id: Uuid) -> Self {
        self.message_id = id;
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Estimate token count using chars/4 heuristic
    ///
    /// Fast approximation suitable for buffer accounting; not a real
    /// tokenizer.
    pub fn estimate_tokens(&self) -> usize {
        self.content.len() / 4
    }
}
