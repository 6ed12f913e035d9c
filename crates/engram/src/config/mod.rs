//! Configuration surface for the orchestrator
//!
//! Policies are supplied as explicit structures and validated eagerly at
//! construction; there is no environment-variable coupling. The TOML
//! shapes here deserialize with per-field defaults and convert into the
//! validated [`IngestionPolicy`] / [`RetrievalPolicy`] pair.

use serde::Deserialize;
use std::time::Duration;

use crate::error::Result;
use crate::ingest::IngestionPolicy;
use crate::retrieval::{RetrievalPolicy, ScoreWeights};

/// Main configuration structure for the orchestrator
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrchestratorConfig {
    /// Volume-adaptive ingestion settings
    #[serde(default)]
    pub ingestion: IngestionSettings,
    /// Retrieval gating settings
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    /// Composite score weights
    #[serde(default)]
    pub weights: WeightSettings,
}

impl OrchestratorConfig {
    /// Parse a TOML document, applying defaults for missing fields
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| crate::error::EngramError::Config(e.to_string()))
    }

    /// Build the validated ingestion policy
    pub fn ingestion_policy(&self) -> Result<IngestionPolicy> {
        let policy = IngestionPolicy {
            low_volume_cutoff: self.ingestion.low_volume_cutoff,
            high_volume_cutoff: self.ingestion.high_volume_cutoff,
            medium_volume_batch_size: self.ingestion.medium_volume_batch_size,
            flush_interval: Duration::from_secs(self.ingestion.flush_interval_secs),
            gateway_timeout: Duration::from_secs(self.ingestion.gateway_timeout_secs),
            max_flush_retries: self.ingestion.max_flush_retries,
            initial_backoff: Duration::from_millis(self.ingestion.initial_backoff_ms),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Build the validated retrieval policy
    pub fn retrieval_policy(&self) -> Result<RetrievalPolicy> {
        let policy = RetrievalPolicy {
            min_similarity: self.retrieval.min_similarity,
            max_injections_per_message: self.retrieval.max_injections_per_message,
            reinjection_cooldown_turns: self.retrieval.reinjection_cooldown_turns,
            candidate_multiplier: self.retrieval.candidate_multiplier,
            query_timeout: Duration::from_secs(self.retrieval.query_timeout_secs),
            fetch_marks_cooldown: self.retrieval.fetch_marks_cooldown,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Build the validated score weights
    pub fn score_weights(&self) -> Result<ScoreWeights> {
        ScoreWeights::new(
            self.weights.semantic,
            self.weights.temporal,
            self.weights.importance,
            self.weights.emotional,
        )
    }
}

/// Volume-adaptive ingestion settings
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    /// Pending counts below this are low volume
    #[serde(default = "default_low_volume_cutoff")]
    pub low_volume_cutoff: usize,
    /// Pending counts at or above this are high volume
    #[serde(default = "default_high_volume_cutoff")]
    pub high_volume_cutoff: usize,
    /// Batch size triggering a medium-volume flush
    #[serde(default = "default_medium_volume_batch_size")]
    pub medium_volume_batch_size: usize,
    /// Maximum seconds between flushes at medium volume
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Timeout in seconds for each gateway call
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
    /// Bounded retry count for a failed flush
    #[serde(default = "default_max_flush_retries")]
    pub max_flush_retries: u32,
    /// First backoff delay in milliseconds; doubles each retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            low_volume_cutoff: default_low_volume_cutoff(),
            high_volume_cutoff: default_high_volume_cutoff(),
            medium_volume_batch_size: default_medium_volume_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            max_flush_retries: default_max_flush_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_low_volume_cutoff() -> usize {
    4
}

fn default_high_volume_cutoff() -> usize {
    12
}

fn default_medium_volume_batch_size() -> usize {
    5
}

fn default_flush_interval_secs() -> u64 {
    15
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_max_flush_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

/// Retrieval gating settings
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalSettings {
    /// Minimum semantic similarity for a candidate to be ranked
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
    /// Upper bound on injections per streamed message
    #[serde(default = "default_max_injections")]
    pub max_injections_per_message: usize,
    /// Minimum turn gap before a memory may be reinjected
    #[serde(default = "default_cooldown_turns")]
    pub reinjection_cooldown_turns: u64,
    /// Candidate pool multiplier over the injection cap
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// Timeout in seconds for each storage query
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Whether `fetch_memories` marks the cooldown ledger
    #[serde(default)]
    pub fetch_marks_cooldown: bool,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            min_similarity: default_min_similarity(),
            max_injections_per_message: default_max_injections(),
            reinjection_cooldown_turns: default_cooldown_turns(),
            candidate_multiplier: default_candidate_multiplier(),
            query_timeout_secs: default_query_timeout_secs(),
            fetch_marks_cooldown: false,
        }
    }
}

fn default_min_similarity() -> f32 {
    0.15
}

fn default_max_injections() -> usize {
    3
}

fn default_cooldown_turns() -> u64 {
    2
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_query_timeout_secs() -> u64 {
    10
}

/// Composite score weight settings
#[derive(Debug, Clone, Deserialize)]
pub struct WeightSettings {
    /// Semantic similarity weight
    #[serde(default = "default_semantic_weight")]
    pub semantic: f32,
    /// Temporal relevance weight
    #[serde(default = "default_temporal_weight")]
    pub temporal: f32,
    /// Importance weight
    #[serde(default = "default_importance_weight")]
    pub importance: f32,
    /// Emotional alignment weight
    #[serde(default = "default_emotional_weight")]
    pub emotional: f32,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            semantic: default_semantic_weight(),
            temporal: default_temporal_weight(),
            importance: default_importance_weight(),
            emotional: default_emotional_weight(),
        }
    }
}

fn default_semantic_weight() -> f32 {
    0.5
}

fn default_temporal_weight() -> f32 {
    0.2
}

fn default_importance_weight() -> f32 {
    0.2
}

fn default_emotional_weight() -> f32 {
    0.1
}
