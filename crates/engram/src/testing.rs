//! Test helpers
//!
//! Mock gateway implementations used by unit and integration tests. Kept
//! always-compiled so downstream crates can reuse them when testing their
//! own orchestrator wiring.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{EngramError, Result};
use crate::event::MessageEvent;
use crate::gateway::{
    ExtractionGateway, MemoryCandidate, MemoryLayer, MemoryRecord, PersistOutcome, QueryFilters,
    StorageGateway,
};

/// Initialize logging for tests, honoring `RUST_LOG`
///
/// Safe to call from multiple tests; only the first call installs the
/// subscriber.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,engram=debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Extraction gateway that records batches and yields one candidate per event
#[derive(Default)]
pub struct MockExtractionGateway {
    batches: Mutex<Vec<Vec<MessageEvent>>>,
    fail_next: AtomicU32,
    delay: Option<Duration>,
}

impl MockExtractionGateway {
    /// Create a mock that succeeds on every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that sleeps before answering, for timeout tests
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make the next `n` extract calls fail
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Batches received so far, in call order
    pub fn batches(&self) -> Vec<Vec<MessageEvent>> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of extract calls made
    pub fn call_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl ExtractionGateway for MockExtractionGateway {
    async fn extract(&self, batch: &[MessageEvent]) -> Result<Vec<MemoryCandidate>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.batches.lock().unwrap().push(batch.to_vec());

        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.store(remaining - 1, Ordering::SeqCst);
            return Err(EngramError::Extraction("mock extraction failure".into()));
        }

        Ok(batch
            .iter()
            .map(|event| {
                MemoryCandidate::new(
                    event.content.clone(),
                    MemoryLayer::ShortTerm,
                    0.5,
                    Some(event.conversation_id.clone()),
                )
            })
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock-extraction"
    }
}

/// Storage gateway that records persists and serves canned query results
#[derive(Default)]
pub struct MockStorageGateway {
    persisted: Mutex<Vec<MemoryCandidate>>,
    records: Mutex<Vec<MemoryRecord>>,
    fail_persist_next: AtomicU32,
    fail_query_next: AtomicU32,
    delay: Option<Duration>,
}

impl MockStorageGateway {
    /// Create a mock with no canned records
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock pre-loaded with query results
    pub fn with_records(records: Vec<MemoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Create a mock that sleeps before answering, for timeout tests
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make the next `n` persist calls fail with a transport error
    pub fn fail_persist_next(&self, n: u32) {
        self.fail_persist_next.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` query calls fail
    pub fn fail_query_next(&self, n: u32) {
        self.fail_query_next.store(n, Ordering::SeqCst);
    }

    /// Replace the canned query results
    pub fn set_records(&self, records: Vec<MemoryRecord>) {
        *self.records.lock().unwrap() = records;
    }

    /// Candidates persisted so far, in call order
    pub fn persisted(&self) -> Vec<MemoryCandidate> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageGateway for MockStorageGateway {
    async fn persist(&self, candidates: &[MemoryCandidate]) -> Result<Vec<PersistOutcome>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_persist_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_persist_next.store(remaining - 1, Ordering::SeqCst);
            return Err(EngramError::StorageWrite("mock persist failure".into()));
        }

        self.persisted.lock().unwrap().extend_from_slice(candidates);
        Ok(candidates
            .iter()
            .map(|c| PersistOutcome {
                candidate_id: c.candidate_id,
                stored: true,
                error: None,
            })
            .collect())
    }

    async fn query(
        &self,
        _text: &str,
        filters: &QueryFilters,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let remaining = self.fail_query_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_query_next.store(remaining - 1, Ordering::SeqCst);
            return Err(EngramError::StorageQuery("mock query failure".into()));
        }

        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| filters.layer.is_none_or(|layer| r.layer == layer))
            .take(limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "mock-storage"
    }
}

/// Build a memory record with the given distance and age in days
pub fn record_with_distance(raw_distance: f32, age_days: i64) -> MemoryRecord {
    MemoryRecord {
        memory_id: uuid::Uuid::new_v4(),
        content: format!("memory at distance {raw_distance}"),
        raw_distance,
        layer: MemoryLayer::LongTerm,
        importance: 0.5,
        emotional_valence: 0.0,
        timestamp: chrono::Utc::now() - chrono::Duration::days(age_days),
        persona_tags: Vec::new(),
    }
}
