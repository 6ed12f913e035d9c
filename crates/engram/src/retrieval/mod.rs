//! Retrieval side of the orchestrator
//!
//! Hybrid relevance scoring and the gating pipeline (similarity threshold,
//! reinjection cooldown, per-message cap) over the storage gateway.

pub mod cooldown;
pub mod engine;
pub mod policy;

pub use cooldown::{CooldownLedger, DEFAULT_LEDGER_CAPACITY};
pub use engine::{QueryContext, RetrievalEngine, semantic_similarity};
pub use policy::{RetrievalPolicy, ScoreWeights};
