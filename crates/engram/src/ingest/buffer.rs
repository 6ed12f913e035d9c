//! Per-conversation buffer of pending message events
//!
//! Holds events between flushes. Exclusively owned by the orchestrator and
//! mutated only while holding that conversation's buffer lock; the slow
//! gateway calls never happen while the lock is held.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::event::{MessageEvent, Role};

/// Ordered queue of pending events for one conversation
#[derive(Debug)]
pub struct ConversationBuffer {
    conversation_id: String,
    pending: VecDeque<MessageEvent>,
    last_flush_at: Instant,
    since_flush: usize,
}

impl ConversationBuffer {
    /// Create an empty buffer for a conversation
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            pending: VecDeque::new(),
            last_flush_at: Instant::now(),
            since_flush: 0,
        }
    }

    /// Conversation this buffer belongs to
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Append an event, returning the trailing count since the last flush
    pub fn push(&mut self, event: MessageEvent) -> usize {
        self.pending.push_back(event);
        self.since_flush += 1;
        self.since_flush
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no events are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Messages appended since the last flush swap
    pub fn since_flush(&self) -> usize {
        self.since_flush
    }

    /// Time elapsed since the last flush swap
    pub fn elapsed_since_flush(&self) -> Duration {
        self.last_flush_at.elapsed()
    }

    /// Atomically swap out the pending batch and start a new generation
    ///
    /// Resets the trailing count and the flush clock. The caller releases
    /// the buffer lock before forwarding the batch downstream.
    pub fn take_batch(&mut self) -> Vec<MessageEvent> {
        self.since_flush = 0;
        self.last_flush_at = Instant::now();
        self.pending.drain(..).collect()
    }

    /// Requeue a failed batch at the head of the current generation
    ///
    /// Order is preserved: requeued events precede anything that arrived
    /// while the flush was in flight.
    pub fn requeue_front(&mut self, batch: Vec<MessageEvent>) {
        self.since_flush += batch.len();
        for event in batch.into_iter().rev() {
            self.pending.push_front(event);
        }
    }
}

/// Merge a batch into a single compacted transcript event
///
/// Used at high volume to bound the number of expensive extraction calls:
/// the whole backlog becomes one `role: content` transcript handed to the
/// extraction gateway as a single event.
pub fn compact_transcript(conversation_id: &str, batch: &[MessageEvent]) -> MessageEvent {
    let mut transcript = String::with_capacity(batch.iter().map(|e| e.content.len() + 16).sum());
    for event in batch {
        transcript.push_str(event.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&event.content);
        transcript.push('\n');
    }
    MessageEvent::new(conversation_id, Role::System, transcript.trim_end())
        .with_metadata("compacted_from", batch.len().to_string())
}
