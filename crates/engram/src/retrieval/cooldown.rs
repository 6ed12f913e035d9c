//! Cross-turn reinjection cooldown ledger
//!
//! Tracks, per conversation, the last turn each memory was injected at, so
//! the retrieval engine can exclude recently surfaced memories regardless
//! of score. Per-conversation maps are LRU-bounded so the ledger cannot
//! grow without limit over long-lived conversations.

use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use uuid::Uuid;

/// Default number of memory ids tracked per conversation
pub const DEFAULT_LEDGER_CAPACITY: usize = 1024;

/// Map of `conversation_id -> (memory_id -> last_injected_turn)`
///
/// Mutated only by the retrieval engine at injection time.
#[derive(Debug)]
pub struct CooldownLedger {
    conversations: DashMap<String, LruCache<Uuid, u64>>,
    capacity: NonZeroUsize,
}

impl CooldownLedger {
    /// Create a ledger tracking up to `capacity` memory ids per
    /// conversation (falls back to the default when zero).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or_else(|| NonZeroUsize::new(DEFAULT_LEDGER_CAPACITY))
            .expect("default ledger capacity is non-zero");
        Self {
            conversations: DashMap::new(),
            capacity,
        }
    }

    /// Record that a memory was injected for a conversation at a turn
    pub fn record(&self, conversation_id: &str, memory_id: Uuid, turn: u64) {
        self.conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| LruCache::new(self.capacity))
            .put(memory_id, turn);
    }

    /// Whether a memory is still cooling down at `current_turn`
    ///
    /// A memory injected at turn T is excluded while
    /// `current_turn - T < cooldown_turns`; it may reappear at exactly
    /// `T + cooldown_turns`. A zero cooldown never excludes anything.
    pub fn in_cooldown(
        &self,
        conversation_id: &str,
        memory_id: &Uuid,
        current_turn: u64,
        cooldown_turns: u64,
    ) -> bool {
        if cooldown_turns == 0 {
            return false;
        }
        let Some(mut entry) = self.conversations.get_mut(conversation_id) else {
            return false;
        };
        match entry.get(memory_id) {
            Some(&last_turn) => current_turn.saturating_sub(last_turn) < cooldown_turns,
            None => false,
        }
    }

    /// Drop all state for a conversation
    pub fn clear_conversation(&self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }

    /// Number of conversations with tracked injections
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// True when no conversation has tracked injections
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
