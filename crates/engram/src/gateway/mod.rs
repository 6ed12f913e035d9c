//! External collaborator interfaces
//!
//! The orchestrator never talks to an extraction model or a storage engine
//! directly. Both are reached through the two traits defined here, injected
//! at construction, which keeps the core mock-testable without live
//! backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::event::MessageEvent;

/// Namespace for deterministic candidate ids (uuid v5)
///
/// Retried persists carry the same candidate id, so an idempotent backend
/// can deduplicate writes without cross-store transactions.
const CANDIDATE_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6e, 0x67, 0x72, 0x61, 0x6d, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
]);

/// Storage layer a memory lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayer {
    /// Recent, conversation-scoped working memory
    ShortTerm,
    /// Consolidated durable memory
    LongTerm,
}

/// A structured memory candidate produced by extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCandidate {
    /// Deterministic identifier (uuid v5 over conversation id + content)
    pub candidate_id: Uuid,
    /// Content to persist
    pub content: String,
    /// Target storage layer
    pub layer: MemoryLayer,
    /// Importance score 0.0-1.0
    pub importance: f32,
    /// Emotional valence -1.0..1.0
    pub emotional_valence: f32,
    /// Conversation the candidate came from, if any
    pub conversation_id: Option<String>,
}

impl MemoryCandidate {
    /// Create a candidate with a deterministic id derived from its origin
    pub fn new(
        content: impl Into<String>,
        layer: MemoryLayer,
        importance: f32,
        conversation_id: Option<String>,
    ) -> Self {
        let content = content.into();
        let seed = format!("{}:{content}", conversation_id.as_deref().unwrap_or(""));
        Self {
            candidate_id: Uuid::new_v5(&CANDIDATE_NAMESPACE, seed.as_bytes()),
            content,
            layer,
            importance: importance.clamp(0.0, 1.0),
            emotional_valence: 0.0,
            conversation_id,
        }
    }

    /// Set the emotional valence (clamped to -1.0..1.0)
    pub fn with_valence(mut self, valence: f32) -> Self {
        self.emotional_valence = valence.clamp(-1.0, 1.0);
        self
    }
}

/// Per-candidate persistence outcome
#[derive(Debug, Clone)]
pub struct PersistOutcome {
    /// Id of the candidate this outcome refers to
    pub candidate_id: Uuid,
    /// Whether the backend accepted the write
    pub stored: bool,
    /// Backend error detail when `stored` is false
    pub error: Option<String>,
}

/// A memory returned by a storage query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier assigned by the backend
    pub memory_id: Uuid,
    /// Memory content
    pub content: String,
    /// Raw vector distance from the query (similarity = 1 - distance)
    pub raw_distance: f32,
    /// Layer the record was found in
    pub layer: MemoryLayer,
    /// Importance score 0.0-1.0
    pub importance: f32,
    /// Emotional valence -1.0..1.0
    pub emotional_valence: f32,
    /// When the memory was created
    pub timestamp: DateTime<Utc>,
    /// Optional persona tags attached by the backend
    #[serde(default)]
    pub persona_tags: Vec<String>,
}

/// Filter criteria for storage queries
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Restrict to one conversation
    pub conversation_id: Option<String>,
    /// Restrict to one storage layer
    pub layer: Option<MemoryLayer>,
    /// Require any of these persona tags
    pub persona_tags: Vec<String>,
}

/// Trait for extraction backends (language model, rules, remote service)
///
/// Implementations turn a batch of raw message events into structured
/// memory candidates. Failures are transient from the orchestrator's point
/// of view and are retried by the ingestion scheduler.
#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    /// Extract structured memory candidates from a batch of events
    async fn extract(&self, batch: &[MessageEvent]) -> Result<Vec<MemoryCandidate>>;

    /// Gateway name for logging
    fn name(&self) -> &'static str;
}

/// Trait for storage backends (vector store, relational store, ...)
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Persist extracted candidates, returning a per-candidate outcome
    async fn persist(&self, candidates: &[MemoryCandidate]) -> Result<Vec<PersistOutcome>>;

    /// Query for memories relevant to a text, each carrying a raw distance
    async fn query(
        &self,
        text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>>;

    /// Gateway name for logging
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_id_is_deterministic() {
        let a = MemoryCandidate::new("User prefers Rust", MemoryLayer::LongTerm, 0.8, Some("c1".into()));
        let b = MemoryCandidate::new("User prefers Rust", MemoryLayer::LongTerm, 0.8, Some("c1".into()));
        assert_eq!(a.candidate_id, b.candidate_id);
    }

    #[test]
    fn test_candidate_id_varies_by_conversation() {
        let a = MemoryCandidate::new("Same content", MemoryLayer::ShortTerm, 0.5, Some("c1".into()));
        let b = MemoryCandidate::new("Same content", MemoryLayer::ShortTerm, 0.5, Some("c2".into()));
        assert_ne!(a.candidate_id, b.candidate_id);
    }

    #[test]
    fn test_candidate_importance_clamped() {
        let high = MemoryCandidate::new("x", MemoryLayer::ShortTerm, 1.5, None);
        assert_eq!(high.importance, 1.0);
        let low = MemoryCandidate::new("x", MemoryLayer::ShortTerm, -0.5, None);
        assert_eq!(low.importance, 0.0);
    }

    #[test]
    fn test_candidate_valence_clamped() {
        let c = MemoryCandidate::new("x", MemoryLayer::ShortTerm, 0.5, None).with_valence(2.0);
        assert_eq!(c.emotional_valence, 1.0);
        let c = MemoryCandidate::new("x", MemoryLayer::ShortTerm, 0.5, None).with_valence(-2.0);
        assert_eq!(c.emotional_valence, -1.0);
    }

    #[test]
    fn test_memory_record_serialization_round_trip() {
        let record = MemoryRecord {
            memory_id: Uuid::new_v4(),
            content: "User works at Acme".to_string(),
            raw_distance: 0.4,
            layer: MemoryLayer::LongTerm,
            importance: 0.7,
            emotional_valence: 0.1,
            timestamp: Utc::now(),
            persona_tags: vec!["work".to_string()],
        };
        let json = serde_json::to_string(&record).expect("serialize");
        let back: MemoryRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.memory_id, record.memory_id);
        assert_eq!(back.layer, MemoryLayer::LongTerm);
        assert_eq!(back.persona_tags, vec!["work".to_string()]);
    }
}
