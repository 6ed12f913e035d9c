//! Ingestion side of the orchestrator
//!
//! Buffers message events per conversation and flushes them to the
//! extraction and storage gateways under a volume-adaptive policy.

pub mod buffer;
pub mod policy;
pub mod scheduler;

pub use buffer::{ConversationBuffer, compact_transcript};
pub use policy::{IngestionPolicy, VolumeClass};
pub use scheduler::{IngestStatsSnapshot, IngestionScheduler};

use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use tokio::sync::Mutex as TokioMutex;
use tokio::task::AbortHandle;

/// Per-conversation mutable state
///
/// The buffer lock protects mutation and flush-swap; the separate flush
/// lock strictly serializes flushes so exactly one is in flight per
/// conversation while unrelated conversations proceed independently.
pub struct ConversationHandle {
    /// Conversation identifier
    pub id: String,
    /// Pending events, guarded by the per-conversation buffer lock
    pub buffer: TokioMutex<ConversationBuffer>,
    /// Serializes flushes for this conversation
    pub(crate) flush_lock: TokioMutex<()>,
    /// Handle for a pending delayed-flush timer, if armed
    pub(crate) flush_timer: StdMutex<Option<AbortHandle>>,
    /// Monotonic turn counter, bumped once per streamed message
    pub turn: AtomicU64,
    /// Last time this conversation saw any activity
    pub last_activity: StdMutex<Instant>,
}

impl ConversationHandle {
    /// Create fresh state for a conversation's first contact
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            buffer: TokioMutex::new(ConversationBuffer::new(id.clone())),
            id,
            flush_lock: TokioMutex::new(()),
            flush_timer: StdMutex::new(None),
            turn: AtomicU64::new(0),
            last_activity: StdMutex::new(Instant::now()),
        }
    }

    /// Record activity for idle-eviction bookkeeping
    pub fn touch(&self) {
        let mut last = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
    }

    /// Time since the conversation last saw activity
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}
