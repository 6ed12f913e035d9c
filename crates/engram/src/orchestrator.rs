//! Orchestrator core
//!
//! Composes the buffer/scheduler, retrieval engine, and injection bus into
//! a per-conversation state machine (IDLE -> ACCUMULATING -> FLUSHING ->
//! IDLE) and exposes the public operations. Conversations are processed
//! concurrently; each conversation's state is keyed and locked by its id,
//! with no global lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::bus::{InjectionBus, Subscription};
use crate::config::OrchestratorConfig;
use crate::error::{EngramError, Result};
use crate::event::MessageEvent;
use crate::gateway::{ExtractionGateway, QueryFilters, StorageGateway};
use crate::ingest::{ConversationHandle, IngestStatsSnapshot, IngestionPolicy, IngestionScheduler};
use crate::injection::MemoryInjection;
use crate::retrieval::{QueryContext, RetrievalEngine, RetrievalPolicy, ScoreWeights};

/// Point-in-time orchestrator counters
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorStats {
    /// Ingestion-side counters
    pub ingest: IngestStatsSnapshot,
    /// Injections returned to streaming callers (and published)
    pub injections_published: u64,
    /// Conversations currently holding state
    pub active_conversations: usize,
    /// Active bus subscriptions
    pub subscribers: usize,
}

/// The adaptive memory orchestrator
///
/// Accepts a live stream of message events, persists them under a
/// volume-adaptive batching policy, and returns policy-gated injections
/// both synchronously to the caller and asynchronously to
/// conversation-scoped subscribers.
pub struct MemoryOrchestrator {
    scheduler: Arc<IngestionScheduler>,
    engine: Arc<RetrievalEngine>,
    bus: Arc<InjectionBus>,
    conversations: DashMap<String, Arc<ConversationHandle>>,
    closed: AtomicBool,
    injections_published: AtomicU64,
}

impl MemoryOrchestrator {
    /// Create an orchestrator with default scoring weights
    ///
    /// Both policies are re-validated here so an orchestrator can never be
    /// constructed over out-of-range bounds.
    pub fn new(
        ingestion: IngestionPolicy,
        retrieval: RetrievalPolicy,
        extraction: Arc<dyn ExtractionGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Result<Self> {
        Self::with_weights(ingestion, retrieval, ScoreWeights::default(), extraction, storage)
    }

    /// Create an orchestrator with an explicit default weight profile
    pub fn with_weights(
        ingestion: IngestionPolicy,
        retrieval: RetrievalPolicy,
        weights: ScoreWeights,
        extraction: Arc<dyn ExtractionGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Result<Self> {
        ingestion.validate()?;
        retrieval.validate()?;
        weights.validate()?;
        Ok(Self {
            scheduler: Arc::new(IngestionScheduler::new(ingestion, extraction, Arc::clone(&storage))),
            engine: Arc::new(RetrievalEngine::with_weights(storage, retrieval, weights)),
            bus: Arc::new(InjectionBus::new()),
            conversations: DashMap::new(),
            closed: AtomicBool::new(false),
            injections_published: AtomicU64::new(0),
        })
    }

    /// Create an orchestrator from a parsed configuration
    pub fn from_config(
        config: &OrchestratorConfig,
        extraction: Arc<dyn ExtractionGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Result<Self> {
        Self::with_weights(
            config.ingestion_policy()?,
            config.retrieval_policy()?,
            config.score_weights()?,
            extraction,
            storage,
        )
    }

    /// Submit one streamed message and receive its immediate injections
    ///
    /// Appends the event under the ingestion policy and concurrently runs
    /// retrieval with the event content as the implicit query. Resulting
    /// injections are published to subscribers scoped to the event's
    /// conversation and returned synchronously (dual delivery). Ingestion
    /// failures never surface here; retrieval failures degrade to an empty
    /// list.
    pub async fn stream_message(&self, event: MessageEvent) -> Result<Vec<MemoryInjection>> {
        self.ensure_open()?;
        if event.conversation_id.trim().is_empty() {
            return Err(EngramError::InvalidInput(
                "conversation_id must not be empty".into(),
            ));
        }

        let conv = self.conversation(&event.conversation_id);
        conv.touch();
        let turn = conv.turn.fetch_add(1, Ordering::SeqCst) + 1;

        let ctx = QueryContext::streamed(event.conversation_id.as_str(), event.content.as_str(), turn);
        let ((), injections) = tokio::join!(
            self.scheduler.append(&conv, event),
            self.engine.retrieve(&ctx),
        );

        if !injections.is_empty() {
            let delivered = self.bus.publish(&conv.id, &injections);
            self.injections_published
                .fetch_add(injections.len() as u64, Ordering::Relaxed);
            debug!(
                conversation = %conv.id,
                turn,
                injections = injections.len(),
                delivered,
                "Published injections"
            );
        }
        Ok(injections)
    }

    /// Query-only retrieval for a conversation, bypassing buffering
    ///
    /// Never mutates buffer state. Marks the cooldown ledger only when the
    /// retrieval policy's `fetch_marks_cooldown` toggle is set. Degrades
    /// to an empty list on backend failure but still rejects invalid
    /// input.
    pub async fn fetch_memories(
        &self,
        conversation_id: &str,
        query: &str,
        filters: QueryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryInjection>> {
        self.ensure_open()?;
        if conversation_id.trim().is_empty() {
            return Err(EngramError::InvalidInput(
                "conversation_id must not be empty".into(),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        // Read the current turn without creating buffer state.
        let turn = self
            .conversations
            .get(conversation_id)
            .map(|conv| conv.turn.load(Ordering::SeqCst))
            .unwrap_or(0);

        let ctx = QueryContext {
            conversation_id: conversation_id.to_string(),
            query: query.to_string(),
            turn,
            limit: Some(limit),
            persona_weights: None,
            mood: None,
            filters,
            mark_cooldown: self.engine.policy().fetch_marks_cooldown,
        };
        Ok(self.engine.retrieve(&ctx).await)
    }

    /// Subscribe to injections for one conversation
    pub fn subscribe_injections(&self, conversation_id: &str) -> Result<Subscription> {
        self.ensure_open()?;
        if conversation_id.trim().is_empty() {
            return Err(EngramError::InvalidInput(
                "conversation_id must not be empty".into(),
            ));
        }
        Ok(self.bus.subscribe(conversation_id))
    }

    /// Flush every non-empty buffer, cancel pending timers, and close
    ///
    /// Idempotent: a second call returns immediately. Streaming calls
    /// after shutdown fail with [`EngramError::Closed`].
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down orchestrator");

        let conversations: Vec<Arc<ConversationHandle>> = self
            .conversations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for conv in &conversations {
            self.scheduler.cancel_timer(conv);
        }
        futures::future::join_all(
            conversations
                .iter()
                .map(|conv| self.scheduler.flush_to_completion(conv)),
        )
        .await;

        self.bus.close_all();
        info!("Orchestrator shut down");
        Ok(())
    }

    /// Evict idle conversations
    ///
    /// Removes state for conversations whose buffer is empty and whose
    /// last activity is older than `ttl`, clearing their cooldown ledger
    /// entries. Returns the number evicted.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.conversations.retain(|id, conv| {
            let empty = conv
                .buffer
                .try_lock()
                .map(|buffer| buffer.is_empty())
                .unwrap_or(false);
            if empty && conv.idle_for() >= ttl {
                self.engine.ledger().clear_conversation(id);
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Snapshot orchestrator counters
    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            ingest: self.scheduler.stats(),
            injections_published: self.injections_published.load(Ordering::Relaxed),
            active_conversations: self.conversations.len(),
            subscribers: self.bus.subscriber_count(),
        }
    }

    /// Whether `shutdown` has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(EngramError::Closed)
        } else {
            Ok(())
        }
    }

    fn conversation(&self, id: &str) -> Arc<ConversationHandle> {
        Arc::clone(
            self.conversations
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(ConversationHandle::new(id)))
                .value(),
        )
    }
}
