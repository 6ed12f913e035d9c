//! Engram - Adaptive memory orchestration for conversational systems
//!
//! This crate sits between a live message stream and pluggable memory
//! backends: it batches ingestion adaptively by conversation volume,
//! retrieves and gates relevant memories per message, and fans computed
//! injections out to conversation-scoped subscribers.

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod ingest;
pub mod injection;
pub mod orchestrator;
pub mod retrieval;
pub mod testing;

pub use error::EngramError;
pub use orchestrator::MemoryOrchestrator;
