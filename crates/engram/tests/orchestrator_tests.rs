//! End-to-end tests for the memory orchestrator
//!
//! Tests verify that:
//! - Streamed messages flow through ingestion and retrieval concurrently
//! - Injections are returned to the caller and published to subscribers
//! - `fetch_memories` bypasses buffering and leaves the ledger alone
//! - Shutdown flushes every pending buffer and closes the surface

use std::sync::Arc;
use std::time::Duration;

use engram::config::OrchestratorConfig;
use engram::error::EngramError;
use engram::event::{MessageEvent, Role};
use engram::gateway::QueryFilters;
use engram::ingest::IngestionPolicy;
use engram::orchestrator::MemoryOrchestrator;
use engram::retrieval::RetrievalPolicy;
use engram::testing::{MockExtractionGateway, MockStorageGateway, record_with_distance};

struct Harness {
    orchestrator: MemoryOrchestrator,
    extraction: Arc<MockExtractionGateway>,
    storage: Arc<MockStorageGateway>,
}

fn harness(ingestion: IngestionPolicy, retrieval: RetrievalPolicy) -> Harness {
    let extraction = Arc::new(MockExtractionGateway::new());
    let storage = Arc::new(MockStorageGateway::new());
    let orchestrator = MemoryOrchestrator::new(
        ingestion,
        retrieval,
        Arc::clone(&extraction) as Arc<dyn engram::gateway::ExtractionGateway>,
        Arc::clone(&storage) as Arc<dyn engram::gateway::StorageGateway>,
    )
    .expect("valid policies");
    Harness {
        orchestrator,
        extraction,
        storage,
    }
}

fn accumulating_policy() -> IngestionPolicy {
    // Low cutoff of 1 puts everything in the medium tier; a large batch
    // size and interval keep events buffered until an explicit flush.
    IngestionPolicy::new(1, 100, 10, Duration::from_secs(3600)).unwrap()
}

fn event(conversation_id: &str, content: &str) -> MessageEvent {
    MessageEvent::new(conversation_id, Role::User, content)
}

#[tokio::test]
async fn test_burst_below_low_cutoff_flushes_immediately() {
    let h = harness(
        IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap(),
        RetrievalPolicy::default(),
    );

    for content in ["first", "second", "third"] {
        h.orchestrator
            .stream_message(event("conv-1", content))
            .await
            .unwrap();
    }

    let batches = h.extraction.batches();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.len() == 1));
    assert_eq!(h.orchestrator.stats().ingest.flushes, 3);
}

#[tokio::test]
async fn test_stream_returns_and_publishes_same_injections() {
    let h = harness(accumulating_policy(), RetrievalPolicy::new(0.15, 3, 0).unwrap());
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    let mut sub = h.orchestrator.subscribe_injections("conv-1").unwrap();
    let returned = h
        .orchestrator
        .stream_message(event("conv-1", "what do you remember?"))
        .await
        .unwrap();

    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0].metadata.conversation_id, "conv-1");
    assert_eq!(returned[0].metadata.turn, 1);

    let published = sub.recv().await.expect("published batch");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].memory_id, returned[0].memory_id);
    assert_eq!(published[0].score, returned[0].score);
}

#[tokio::test]
async fn test_injections_stay_in_their_conversation() {
    let h = harness(accumulating_policy(), RetrievalPolicy::new(0.15, 3, 0).unwrap());
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    let mut sub_other = h.orchestrator.subscribe_injections("conv-other").unwrap();
    h.orchestrator
        .stream_message(event("conv-1", "hello"))
        .await
        .unwrap();

    assert!(sub_other.try_recv().is_none());
}

#[tokio::test]
async fn test_turn_counter_increments_per_message() {
    let h = harness(accumulating_policy(), RetrievalPolicy::new(0.15, 3, 0).unwrap());
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    let first = h
        .orchestrator
        .stream_message(event("conv-1", "one"))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .stream_message(event("conv-1", "two"))
        .await
        .unwrap();

    assert_eq!(first[0].metadata.turn, 1);
    assert_eq!(second[0].metadata.turn, 2);
}

#[tokio::test]
async fn test_empty_retrieval_publishes_nothing() {
    let h = harness(accumulating_policy(), RetrievalPolicy::default());

    let mut sub = h.orchestrator.subscribe_injections("conv-1").unwrap();
    let returned = h
        .orchestrator
        .stream_message(event("conv-1", "hello"))
        .await
        .unwrap();

    assert!(returned.is_empty());
    assert!(sub.try_recv().is_none());
    assert_eq!(h.orchestrator.stats().injections_published, 0);
}

#[tokio::test]
async fn test_fetch_bypasses_buffering() {
    let h = harness(accumulating_policy(), RetrievalPolicy::default());
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    // One buffered message, not yet flushed.
    h.orchestrator
        .stream_message(event("conv-1", "buffered"))
        .await
        .unwrap();
    assert_eq!(h.extraction.call_count(), 0);

    let fetched = h
        .orchestrator
        .fetch_memories("conv-1", "explicit query", QueryFilters::default(), 5)
        .await
        .unwrap();

    assert_eq!(fetched.len(), 1);
    // The fetch triggered no extraction and consumed no buffered events.
    assert_eq!(h.extraction.call_count(), 0);
}

#[tokio::test]
async fn test_fetch_does_not_mark_cooldown_by_default() {
    let h = harness(accumulating_policy(), RetrievalPolicy::new(0.15, 3, 5).unwrap());
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    let fetched = h
        .orchestrator
        .fetch_memories("conv-1", "query", QueryFilters::default(), 5)
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);

    // The same memory is still eligible on the streaming path.
    let streamed = h
        .orchestrator
        .stream_message(event("conv-1", "query"))
        .await
        .unwrap();
    assert_eq!(streamed.len(), 1);
}

#[tokio::test]
async fn test_retrieval_failure_keeps_streaming_alive() {
    let h = harness(
        IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap(),
        RetrievalPolicy::default(),
    );
    h.storage.fail_query_next(1);

    let returned = h
        .orchestrator
        .stream_message(event("conv-1", "still ingests"))
        .await
        .unwrap();

    assert!(returned.is_empty());
    // Ingestion proceeded despite the failed retrieval.
    assert_eq!(h.extraction.call_count(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_pending_buffers() {
    let h = harness(accumulating_policy(), RetrievalPolicy::default());

    h.orchestrator.stream_message(event("conv-a", "a1")).await.unwrap();
    h.orchestrator.stream_message(event("conv-a", "a2")).await.unwrap();
    h.orchestrator.stream_message(event("conv-b", "b1")).await.unwrap();
    assert_eq!(h.extraction.call_count(), 0);

    h.orchestrator.shutdown().await.unwrap();

    let batches = h.extraction.batches();
    assert_eq!(batches.len(), 2);
    let mut sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![1, 2]);
    assert_eq!(h.storage.persisted().len(), 3);

    assert!(matches!(
        h.orchestrator.stream_message(event("conv-a", "late")).await,
        Err(EngramError::Closed)
    ));
}

#[tokio::test]
async fn test_shutdown_ends_subscriptions() {
    let h = harness(accumulating_policy(), RetrievalPolicy::default());
    let mut sub = h.orchestrator.subscribe_injections("conv-1").unwrap();

    h.orchestrator.shutdown().await.unwrap();
    assert!(sub.recv().await.is_none());
}

#[tokio::test]
async fn test_from_config_wires_policies() {
    let config = OrchestratorConfig::from_toml_str(
        r#"
[ingestion]
low_volume_cutoff = 1
high_volume_cutoff = 100
medium_volume_batch_size = 2
flush_interval_secs = 3600

[retrieval]
reinjection_cooldown_turns = 0
"#,
    )
    .unwrap();

    let extraction = Arc::new(MockExtractionGateway::new());
    let storage = Arc::new(MockStorageGateway::new());
    let orchestrator = MemoryOrchestrator::from_config(
        &config,
        Arc::clone(&extraction) as Arc<dyn engram::gateway::ExtractionGateway>,
        Arc::clone(&storage) as Arc<dyn engram::gateway::StorageGateway>,
    )
    .unwrap();

    orchestrator.stream_message(event("conv-1", "one")).await.unwrap();
    assert_eq!(extraction.call_count(), 0);
    orchestrator.stream_message(event("conv-1", "two")).await.unwrap();
    // The configured batch size of 2 triggered a flush.
    assert_eq!(extraction.call_count(), 1);
}

#[tokio::test]
async fn test_stats_track_activity() {
    let h = harness(
        IngestionPolicy::new(4, 12, 5, Duration::from_secs(15)).unwrap(),
        RetrievalPolicy::new(0.15, 3, 0).unwrap(),
    );
    h.storage.set_records(vec![record_with_distance(0.2, 0)]);

    let _sub = h.orchestrator.subscribe_injections("conv-1").unwrap();
    h.orchestrator.stream_message(event("conv-1", "hello")).await.unwrap();

    let stats = h.orchestrator.stats();
    assert_eq!(stats.ingest.flushes, 1);
    assert_eq!(stats.ingest.events_flushed, 1);
    assert_eq!(stats.injections_published, 1);
    assert_eq!(stats.active_conversations, 1);
    assert_eq!(stats.subscribers, 1);
}
