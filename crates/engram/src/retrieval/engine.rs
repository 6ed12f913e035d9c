//! Hybrid-scored, policy-gated memory retrieval
//!
//! Queries the storage gateway, computes a composite relevance score per
//! candidate, and applies the gating pipeline: similarity threshold first
//! (rejected candidates never occupy a ranked slot), then the reinjection
//! cooldown, then ranking and the per-message cap.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::gateway::{MemoryRecord, QueryFilters, StorageGateway};
use crate::injection::MemoryInjection;
use crate::retrieval::cooldown::CooldownLedger;
use crate::retrieval::policy::{RetrievalPolicy, ScoreWeights};

/// Exponential decay rate for temporal relevance, per day of age
const TEMPORAL_DECAY_PER_DAY: f32 = 0.1;

/// Context for one retrieval pass
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Conversation the query runs for
    pub conversation_id: String,
    /// Query text (implicit on the streaming path, explicit on fetch)
    pub query: String,
    /// Current turn index of the conversation
    pub turn: u64,
    /// Optional cap override; defaults to the policy's per-message cap
    pub limit: Option<usize>,
    /// Persona-specific weight profile overriding the engine defaults
    pub persona_weights: Option<ScoreWeights>,
    /// Optional query mood in -1..1 for emotional alignment
    pub mood: Option<f32>,
    /// Storage filter criteria
    pub filters: QueryFilters,
    /// Whether selected memories are recorded in the cooldown ledger
    pub mark_cooldown: bool,
}

impl QueryContext {
    /// Context for the streaming path: implicit query, ledger marked
    pub fn streamed(conversation_id: impl Into<String>, query: impl Into<String>, turn: u64) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            query: query.into(),
            turn,
            limit: None,
            persona_weights: None,
            mood: None,
            filters: QueryFilters::default(),
            mark_cooldown: true,
        }
    }

    /// Override the injection cap for this query
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Supply a persona weight profile for this query
    pub fn with_persona_weights(mut self, weights: ScoreWeights) -> Self {
        self.persona_weights = Some(weights);
        self
    }

    /// Supply a query mood for emotional alignment
    pub fn with_mood(mut self, mood: f32) -> Self {
        self.mood = Some(mood.clamp(-1.0, 1.0));
        self
    }
}

/// Retrieval engine over an injected storage gateway
pub struct RetrievalEngine {
    storage: Arc<dyn StorageGateway>,
    policy: RetrievalPolicy,
    weights: ScoreWeights,
    ledger: CooldownLedger,
}

impl RetrievalEngine {
    /// Create an engine with default scoring weights
    pub fn new(storage: Arc<dyn StorageGateway>, policy: RetrievalPolicy) -> Self {
        Self::with_weights(storage, policy, ScoreWeights::default())
    }

    /// Create an engine with an explicit default weight profile
    pub fn with_weights(
        storage: Arc<dyn StorageGateway>,
        policy: RetrievalPolicy,
        weights: ScoreWeights,
    ) -> Self {
        Self {
            storage,
            policy,
            weights,
            ledger: CooldownLedger::default(),
        }
    }

    /// Policy in effect (fixed at construction)
    pub fn policy(&self) -> &RetrievalPolicy {
        &self.policy
    }

    /// Cooldown ledger (mutated only at injection time)
    pub fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    /// Retrieve gated injections for a query context
    ///
    /// A storage failure or timeout degrades to an empty list with a
    /// warning; it never blocks or fails the caller's path.
    pub async fn retrieve(&self, ctx: &QueryContext) -> Vec<MemoryInjection> {
        let cap = ctx.limit.unwrap_or(self.policy.max_injections_per_message);
        if cap == 0 {
            return Vec::new();
        }

        let candidate_limit = cap * self.policy.candidate_multiplier;
        let candidates = match timeout(
            self.policy.query_timeout,
            self.storage.query(&ctx.query, &ctx.filters, candidate_limit),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                warn!(
                    conversation = %ctx.conversation_id,
                    "Storage query failed, degrading to empty injections: {e}"
                );
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    conversation = %ctx.conversation_id,
                    timeout = ?self.policy.query_timeout,
                    "Storage query timed out, degrading to empty injections"
                );
                return Vec::new();
            }
        };

        let weights = ctx.persona_weights.unwrap_or(self.weights);
        let now = Utc::now();

        // Similarity gate runs before ranking so rejected candidates never
        // occupy a ranked slot; cooldown excludes regardless of score.
        let mut scored: Vec<(f32, MemoryRecord)> = candidates
            .into_iter()
            .filter_map(|record| {
                let similarity = semantic_similarity(record.raw_distance);
                if similarity < self.policy.min_similarity {
                    return None;
                }
                if self.ledger.in_cooldown(
                    &ctx.conversation_id,
                    &record.memory_id,
                    ctx.turn,
                    self.policy.reinjection_cooldown_turns,
                ) {
                    return None;
                }
                let score = composite_score(&record, similarity, &weights, ctx.mood, now);
                if score < self.policy.min_similarity {
                    return None;
                }
                Some((score, record))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| b.1.timestamp.cmp(&a.1.timestamp))
                .then_with(|| a.1.memory_id.cmp(&b.1.memory_id))
        });
        scored.truncate(cap);

        let injections: Vec<MemoryInjection> = scored
            .iter()
            .map(|(score, record)| {
                MemoryInjection::from_record(record, *score, &*ctx.conversation_id, ctx.turn)
            })
            .collect();

        if ctx.mark_cooldown {
            for injection in &injections {
                self.ledger
                    .record(&ctx.conversation_id, injection.memory_id, ctx.turn);
            }
        }

        debug!(
            conversation = %ctx.conversation_id,
            turn = ctx.turn,
            selected = injections.len(),
            "Retrieval pass complete"
        );
        injections
    }
}

/// Semantic similarity derived from a raw vector distance
///
/// `similarity = clamp(1.0 - raw_distance, 0, 1)`, so for distances in
/// [0, 1] similarity and distance sum to exactly 1.
pub fn semantic_similarity(raw_distance: f32) -> f32 {
    (1.0 - raw_distance).clamp(0.0, 1.0)
}

/// Temporal relevance as exponential decay over record age
fn temporal_relevance(record: &MemoryRecord, now: chrono::DateTime<Utc>) -> f32 {
    let age_days = (now - record.timestamp).num_seconds().max(0) as f32 / 86_400.0;
    (-TEMPORAL_DECAY_PER_DAY * age_days).exp()
}

/// Alignment between the record's valence and an optional query mood
///
/// Neutral 0.5 when the query carries no mood; otherwise 1 minus the
/// normalized distance between the two valences.
fn emotional_alignment(record_valence: f32, mood: Option<f32>) -> f32 {
    match mood {
        Some(mood) => 1.0 - (mood - record_valence).abs() / 2.0,
        None => 0.5,
    }
}

fn composite_score(
    record: &MemoryRecord,
    similarity: f32,
    weights: &ScoreWeights,
    mood: Option<f32>,
    now: chrono::DateTime<Utc>,
) -> f32 {
    let score = weights.semantic * similarity
        + weights.temporal * temporal_relevance(record, now)
        + weights.importance * record.importance.clamp(0.0, 1.0)
        + weights.emotional * emotional_alignment(record.emotional_valence, mood);
    score.clamp(0.0, 1.0)
}
