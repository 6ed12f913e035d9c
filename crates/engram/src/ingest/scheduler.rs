//! Volume-adaptive flush scheduling
//!
//! Decides when a conversation buffer is handed to the extraction and
//! storage gateways. Low volume flushes every append immediately, medium
//! volume accumulates into batches bounded by size or interval, and high
//! volume compacts the backlog into a single transcript to bound the
//! number of expensive downstream calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::error::{EngramError, Result};
use crate::event::MessageEvent;
use crate::gateway::{ExtractionGateway, StorageGateway};
use crate::ingest::buffer::compact_transcript;
use crate::ingest::policy::IngestionPolicy;
use crate::ingest::ConversationHandle;

/// Counters for ingestion activity
#[derive(Debug, Default)]
pub struct IngestStats {
    flushes: AtomicU64,
    events_flushed: AtomicU64,
    batches_dropped: AtomicU64,
}

/// Point-in-time view of [`IngestStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    /// Completed flushes (successful downstream hand-offs)
    pub flushes: u64,
    /// Events forwarded downstream across all flushes
    pub events_flushed: u64,
    /// Batches dropped after retry exhaustion
    pub batches_dropped: u64,
}

impl IngestStats {
    /// Snapshot the counters
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
        }
    }
}

enum AppendDecision {
    FlushNow,
    ArmTimer(Duration),
}

/// Decides when buffers flush and drives the downstream hand-off
pub struct IngestionScheduler {
    policy: IngestionPolicy,
    extraction: Arc<dyn ExtractionGateway>,
    storage: Arc<dyn StorageGateway>,
    stats: IngestStats,
}

impl IngestionScheduler {
    /// Create a scheduler over the injected gateways
    pub fn new(
        policy: IngestionPolicy,
        extraction: Arc<dyn ExtractionGateway>,
        storage: Arc<dyn StorageGateway>,
    ) -> Self {
        Self {
            policy,
            extraction,
            storage,
            stats: IngestStats::default(),
        }
    }

    /// Policy in effect (fixed at construction)
    pub fn policy(&self) -> &IngestionPolicy {
        &self.policy
    }

    /// Snapshot ingestion counters
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Append an event to the conversation's buffer and apply the policy
    ///
    /// May flush inline (low volume, or a size/interval threshold was hit)
    /// or arm a delayed-flush timer for the remaining interval. Ingestion
    /// failures are logged, never returned: streaming must stay available
    /// while persistence is degraded.
    pub async fn append(self: &Arc<Self>, conv: &Arc<ConversationHandle>, event: MessageEvent) {
        let decision = {
            let mut buffer = conv.buffer.lock().await;
            let count = buffer.push(event);
            let class = self.policy.classify(count);
            let interval = self.policy.interval_threshold(class);
            let elapsed = buffer.elapsed_since_flush();

            if buffer.len() >= self.policy.batch_threshold(class) || elapsed >= interval {
                AppendDecision::FlushNow
            } else {
                AppendDecision::ArmTimer(interval - elapsed)
            }
        };

        match decision {
            AppendDecision::FlushNow => {
                self.cancel_timer(conv);
                self.flush(conv).await;
            }
            AppendDecision::ArmTimer(delay) => self.arm_timer(conv, delay),
        }
    }

    /// Flush the conversation's pending buffer
    ///
    /// Flush attempts are mutually exclusive per conversation: the buffer
    /// is swapped out under its lock, the lock is released, and only then
    /// do the gateway calls proceed, so new events accumulate in a fresh
    /// generation while the flush is in flight. The first attempt runs
    /// inline; on failure the batch is requeued at the head and the
    /// remaining bounded retries continue on a background task, so the
    /// streaming path never waits through backoff. Retry exhaustion drops
    /// the batch with a log entry, never silently.
    pub async fn flush(self: &Arc<Self>, conv: &Arc<ConversationHandle>) {
        {
            let _serialize = conv.flush_lock.lock().await;
            self.cancel_timer(conv);
            if self.attempt(conv, 1).await {
                return;
            }
        }

        let scheduler = Arc::clone(self);
        let conv_task = Arc::clone(conv);
        tokio::spawn(async move {
            scheduler.retry_in_background(&conv_task).await;
        });
    }

    /// Flush and await the full bounded-retry cycle
    ///
    /// Used at shutdown, where the caller needs the final outcome before
    /// tearing down.
    pub async fn flush_to_completion(&self, conv: &Arc<ConversationHandle>) {
        let _serialize = conv.flush_lock.lock().await;
        self.cancel_timer(conv);

        let mut delay = self.policy.initial_backoff;
        for attempt in 1..=self.policy.max_flush_retries {
            if self.attempt(conv, attempt).await {
                return;
            }
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }

    /// Continue a failed flush after backoff, retaking the requeued batch
    /// (folding in any events that arrived in the meantime)
    async fn retry_in_background(&self, conv: &Arc<ConversationHandle>) {
        let mut delay = self.policy.initial_backoff;
        for attempt in 2..=self.policy.max_flush_retries {
            tokio::time::sleep(delay).await;
            delay *= 2;
            let settled = {
                let _serialize = conv.flush_lock.lock().await;
                self.attempt(conv, attempt).await
            };
            if settled {
                return;
            }
        }
    }

    /// One take-and-hand-off cycle, run while holding the flush lock
    ///
    /// Returns true when the flush settled: success, nothing pending, or
    /// a terminal drop after the final attempt. A non-terminal failure
    /// requeues the batch at the head and returns false.
    async fn attempt(&self, conv: &Arc<ConversationHandle>, attempt: u32) -> bool {
        let batch = {
            let mut buffer = conv.buffer.lock().await;
            if buffer.is_empty() {
                return true;
            }
            buffer.take_batch()
        };

        match self.push_downstream(&conv.id, &batch).await {
            Ok(stored) => {
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .events_flushed
                    .fetch_add(batch.len() as u64, Ordering::Relaxed);
                debug!(
                    conversation = %conv.id,
                    events = batch.len(),
                    stored,
                    "Flushed batch"
                );
                true
            }
            Err(e) if attempt >= self.policy.max_flush_retries => {
                self.stats.batches_dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    conversation = %conv.id,
                    events = batch.len(),
                    attempts = attempt,
                    "Dropping batch after retry exhaustion: {e}"
                );
                true
            }
            Err(e) => {
                warn!(
                    conversation = %conv.id,
                    attempt,
                    "Flush attempt failed, requeueing batch: {e}"
                );
                let mut buffer = conv.buffer.lock().await;
                buffer.requeue_front(batch);
                false
            }
        }
    }

    /// Cancel a pending delayed-flush timer, if armed
    pub fn cancel_timer(&self, conv: &ConversationHandle) {
        let mut timer = conv
            .flush_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.take() {
            handle.abort();
        }
    }

    fn arm_timer(self: &Arc<Self>, conv: &Arc<ConversationHandle>, delay: Duration) {
        let mut timer = conv
            .flush_timer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = timer.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        let scheduler = Arc::clone(self);
        let conv_task = Arc::clone(conv);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Clear our own handle first: the flush below cancels pending
            // timers and must not abort the task it is running on.
            conv_task
                .flush_timer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            scheduler.flush(&conv_task).await;
        });
        *timer = Some(task.abort_handle());
    }

    /// Hand a batch to extraction, then the candidates to storage
    ///
    /// Batches at or above the high-volume cutoff are compacted into a
    /// single transcript event first. Both gateway calls are timeout-
    /// bounded. Per-candidate rejections from the storage backend are
    /// logged but do not fail the batch; transport errors do.
    async fn push_downstream(&self, conversation_id: &str, batch: &[MessageEvent]) -> Result<usize> {
        let compacted;
        let events: &[MessageEvent] = if batch.len() >= self.policy.high_volume_cutoff {
            debug!(
                conversation = %conversation_id,
                events = batch.len(),
                "Compacting high-volume batch into a single transcript"
            );
            compacted = [compact_transcript(conversation_id, batch)];
            &compacted
        } else {
            batch
        };

        let candidates = timeout(self.policy.gateway_timeout, self.extraction.extract(events))
            .await
            .map_err(|_| {
                EngramError::Extraction(format!(
                    "{} timed out after {:?}",
                    self.extraction.name(),
                    self.policy.gateway_timeout
                ))
            })??;

        if candidates.is_empty() {
            return Ok(0);
        }

        let outcomes = timeout(self.policy.gateway_timeout, self.storage.persist(&candidates))
            .await
            .map_err(|_| {
                EngramError::StorageWrite(format!(
                    "{} timed out after {:?}",
                    self.storage.name(),
                    self.policy.gateway_timeout
                ))
            })??;

        let mut stored = 0;
        for outcome in &outcomes {
            if outcome.stored {
                stored += 1;
            } else {
                warn!(
                    conversation = %conversation_id,
                    candidate = %outcome.candidate_id,
                    "Storage backend rejected candidate: {}",
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }
        }
        Ok(stored)
    }
}
