//! Conversation-scoped injection fan-out
//!
//! In-process publish/subscribe for computed injections. Subscriptions are
//! keyed by an exact conversation id match: no cross-conversation leakage
//! and no wildcard delivery. Delivery uses unbounded channels with an
//! explicit, deterministic open/close lifecycle; a dead subscriber is
//! pruned without affecting delivery to the others. Nothing survives a
//! restart.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::injection::MemoryInjection;

struct Subscriber {
    conversation_id: String,
    tx: mpsc::UnboundedSender<Vec<MemoryInjection>>,
}

/// Publish/subscribe hub for memory injections
#[derive(Default)]
pub struct InjectionBus {
    subscribers: Arc<DashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl InjectionBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to injections for one conversation
    pub fn subscribe(&self, conversation_id: impl Into<String>) -> Subscription {
        let conversation_id = conversation_id.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(
            id,
            Subscriber {
                conversation_id: conversation_id.clone(),
                tx,
            },
        );
        Subscription {
            id,
            conversation_id,
            rx: Some(rx),
            registry: Arc::clone(&self.subscribers),
            closed: false,
        }
    }

    /// Deliver injections to every active subscription for the
    /// conversation, returning the number of successful deliveries
    ///
    /// A failed delivery (subscriber gone) is logged and pruned without
    /// affecting the remaining subscribers.
    pub fn publish(&self, conversation_id: &str, injections: &[MemoryInjection]) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.subscribers.iter() {
            if entry.conversation_id != conversation_id {
                continue;
            }
            if entry.tx.send(injections.to_vec()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*entry.key());
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
            debug!(subscription = id, "Pruned dead subscription during publish");
        }
        delivered
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop every subscription, ending all receivers
    pub fn close_all(&self) {
        self.subscribers.clear();
    }
}

/// Handle for one conversation-scoped subscription
///
/// Closing is idempotent and also runs on drop; a closed subscription
/// receives nothing further.
pub struct Subscription {
    id: u64,
    conversation_id: String,
    rx: Option<mpsc::UnboundedReceiver<Vec<MemoryInjection>>>,
    registry: Arc<DashMap<u64, Subscriber>>,
    closed: bool,
}

impl Subscription {
    /// Subscription identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Conversation this subscription is scoped to
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Receive the next published injection batch
    ///
    /// Returns `None` once the subscription is closed or the bus is gone.
    pub async fn recv(&mut self) -> Option<Vec<MemoryInjection>> {
        match &mut self.rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Receive without waiting; `None` when nothing is queued
    pub fn try_recv(&mut self) -> Option<Vec<MemoryInjection>> {
        self.rx.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// End the subscription; safe to call more than once
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.registry.remove(&self.id);
        if let Some(rx) = &mut self.rx {
            rx.close();
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Turn the subscription into a `Stream` of injection batches
    ///
    /// The registry entry stays live for delivery and is pruned on the
    /// first publish after the stream is dropped.
    pub fn into_stream(mut self) -> UnboundedReceiverStream<Vec<MemoryInjection>> {
        self.closed = true;
        let rx = self.rx.take().unwrap_or_else(|| {
            // Already closed: hand back an empty, terminated stream.
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        });
        UnboundedReceiverStream::new(rx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}
