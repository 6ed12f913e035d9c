//! Retrieval gating policy and scoring weights

use std::time::Duration;

use crate::error::{EngramError, Result};

/// Weights for the composite relevance score
///
/// The four components must sum to 1. A persona-specific profile supplied
/// in the query context overrides the engine-wide defaults per query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Semantic similarity weight (default 0.5)
    pub semantic: f32,
    /// Temporal relevance weight (default 0.2)
    pub temporal: f32,
    /// Importance weight (default 0.2)
    pub importance: f32,
    /// Emotional alignment weight (default 0.1)
    pub emotional: f32,
}

impl ScoreWeights {
    /// Create a validated weight profile
    pub fn new(semantic: f32, temporal: f32, importance: f32, emotional: f32) -> Result<Self> {
        let weights = Self {
            semantic,
            temporal,
            importance,
            emotional,
        };
        weights.validate()?;
        Ok(weights)
    }

    /// Reject negative weights or a sum away from 1
    pub fn validate(&self) -> Result<()> {
        let components = [self.semantic, self.temporal, self.importance, self.emotional];
        if components.iter().any(|w| *w < 0.0) {
            return Err(EngramError::Config("score weights must be non-negative".into()));
        }
        let sum: f32 = components.iter().sum();
        if (sum - 1.0).abs() > 1e-4 {
            return Err(EngramError::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            temporal: 0.2,
            importance: 0.2,
            emotional: 0.1,
        }
    }
}

/// Immutable retrieval policy, validated at construction
#[derive(Debug, Clone)]
pub struct RetrievalPolicy {
    /// Candidates below this similarity are discarded before ranking
    pub min_similarity: f32,
    /// Upper bound on injections returned for a single message
    pub max_injections_per_message: usize,
    /// Minimum turn gap before a memory may be reinjected
    pub reinjection_cooldown_turns: u64,
    /// Candidate pool multiplier over the injection cap
    pub candidate_multiplier: usize,
    /// Timeout applied to each storage query
    pub query_timeout: Duration,
    /// Whether `fetch_memories` marks the cooldown ledger
    pub fetch_marks_cooldown: bool,
}

impl RetrievalPolicy {
    /// Create a policy from the core gating knobs, using defaults for the
    /// candidate pool, query timeout, and fetch cooldown toggle.
    pub fn new(
        min_similarity: f32,
        max_injections_per_message: usize,
        reinjection_cooldown_turns: u64,
    ) -> Result<Self> {
        let policy = Self {
            min_similarity,
            max_injections_per_message,
            reinjection_cooldown_turns,
            candidate_multiplier: 3,
            query_timeout: Duration::from_secs(10),
            fetch_marks_cooldown: false,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Reject out-of-range values with a configuration error
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(EngramError::Config(format!(
                "min_similarity must be within [0, 1], got {}",
                self.min_similarity
            )));
        }
        if self.candidate_multiplier == 0 {
            return Err(EngramError::Config(
                "candidate_multiplier must be positive".into(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(EngramError::Config("query_timeout must be positive".into()));
        }
        Ok(())
    }
}

impl Default for RetrievalPolicy {
    fn default() -> Self {
        Self {
            min_similarity: 0.15,
            max_injections_per_message: 3,
            reinjection_cooldown_turns: 2,
            candidate_multiplier: 3,
            query_timeout: Duration::from_secs(10),
            fetch_marks_cooldown: false,
        }
    }
}
