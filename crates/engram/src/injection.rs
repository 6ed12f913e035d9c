//! Memory injections surfaced to callers and subscribers
//!
//! The output shape of the retrieval engine: a ranked, policy-approved
//! memory for a given turn, carrying the conversation id needed for
//! correct bus routing.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::{MemoryLayer, MemoryRecord};

/// Which memory layer an injection was sourced from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InjectionSource {
    /// Recent, conversation-scoped working memory
    ShortTerm,
    /// Consolidated durable memory
    LongTerm,
}

impl From<MemoryLayer> for InjectionSource {
    fn from(layer: MemoryLayer) -> Self {
        match layer {
            MemoryLayer::ShortTerm => InjectionSource::ShortTerm,
            MemoryLayer::LongTerm => InjectionSource::LongTerm,
        }
    }
}

/// How the injection is meant to be delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InjectionChannel {
    /// Injected inline with the turn's response
    Inline,
    /// Prepended to the system prompt
    SystemPrompt,
}

/// Routing metadata carried by every injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionMetadata {
    /// Conversation the injection was computed for
    pub conversation_id: String,
    /// Turn index at which it was selected
    pub turn: u64,
}

/// A ranked, policy-approved memory surfaced for a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryInjection {
    /// Backend identifier of the underlying memory
    pub memory_id: Uuid,
    /// Memory content
    pub content: String,
    /// Layer the memory came from
    pub source: InjectionSource,
    /// Delivery channel
    pub channel: InjectionChannel,
    /// Composite relevance score in [0, 1]
    pub score: f32,
    /// Routing metadata
    pub metadata: InjectionMetadata,
}

impl MemoryInjection {
    /// Build an inline injection from a scored record
    pub fn from_record(
        record: &MemoryRecord,
        score: f32,
        conversation_id: impl Into<String>,
        turn: u64,
    ) -> Self {
        Self {
            memory_id: record.memory_id,
            content: record.content.clone(),
            source: record.layer.into(),
            channel: InjectionChannel::Inline,
            score: score.clamp(0.0, 1.0),
            metadata: InjectionMetadata {
                conversation_id: conversation_id.into(),
                turn,
            },
        }
    }
}
