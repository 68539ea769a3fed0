//! Temporal scoring policies.
//!
//! A policy turns "how long ago in the story did this chunk happen" into an
//! adjustment of its relevance score. Two policies share one contract so
//! they can be A/B compared by flipping `retrieval.temporal.strategy`:
//!
//! | Policy | `score` | `apply(base)` |
//! |--------|---------|---------------|
//! | Categorical | tier boost (immediate / recent / distant) | `base + boost` |
//! | Continuous | half-life decay in `[0, 1]` | `(1 - f) * base + f * decay` |

use lorekeeper_config::{TemporalConfig, TemporalStrategy};
use lorekeeper_core::ChunkId;
use std::sync::Arc;

/// Where a chunk sits relative to the newest chunk of the story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecencyInfo {
    pub chunk_id: ChunkId,
    pub newest_chunk_id: ChunkId,
}

impl RecencyInfo {
    pub fn new(chunk_id: ChunkId, newest_chunk_id: ChunkId) -> Self {
        Self {
            chunk_id,
            newest_chunk_id,
        }
    }

    /// Elapsed narrative time, in chunks. Chunks newer than the reference count as 0.
    pub fn chunks_ago(&self) -> u64 {
        self.newest_chunk_id.saturating_sub(self.chunk_id)
    }
}

/// Recency scoring strategy.
pub trait TemporalPolicy: Send + Sync {
    /// Policy name for logs.
    fn name(&self) -> &str;

    /// The recency signal for one chunk.
    fn score(&self, recency: &RecencyInfo) -> f32;

    /// Fold the recency signal into a base relevance score.
    fn apply(&self, base: f32, recency: &RecencyInfo) -> f32 {
        base + self.score(recency)
    }
}

/// Discrete recency buckets used by [`CategoricalPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyTier {
    Immediate,
    Recent,
    Distant,
}

/// Fixed additive boost per recency tier.
#[derive(Debug, Clone)]
pub struct CategoricalPolicy {
    pub immediate_window: u64,
    pub recent_window: u64,
    pub immediate_boost: f32,
    pub recent_boost: f32,
}

impl CategoricalPolicy {
    pub fn tier(&self, recency: &RecencyInfo) -> RecencyTier {
        let ago = recency.chunks_ago();
        if ago <= self.immediate_window {
            RecencyTier::Immediate
        } else if ago <= self.recent_window {
            RecencyTier::Recent
        } else {
            RecencyTier::Distant
        }
    }
}

impl TemporalPolicy for CategoricalPolicy {
    fn name(&self) -> &str {
        "categorical"
    }

    fn score(&self, recency: &RecencyInfo) -> f32 {
        match self.tier(recency) {
            RecencyTier::Immediate => self.immediate_boost,
            RecencyTier::Recent => self.recent_boost,
            RecencyTier::Distant => 0.0,
        }
    }
}

/// Exponential half-life decay, blended by a single boost factor.
#[derive(Debug, Clone)]
pub struct ContinuousPolicy {
    /// 0 ignores recency, 1 lets recency dominate
    pub boost_factor: f32,
    pub half_life_chunks: f32,
}

impl TemporalPolicy for ContinuousPolicy {
    fn name(&self) -> &str {
        "continuous"
    }

    fn score(&self, recency: &RecencyInfo) -> f32 {
        let ago = recency.chunks_ago() as f32;
        0.5f32.powf(ago / self.half_life_chunks.max(f32::EPSILON))
    }

    fn apply(&self, base: f32, recency: &RecencyInfo) -> f32 {
        let f = self.boost_factor.clamp(0.0, 1.0);
        (1.0 - f) * base + f * self.score(recency)
    }
}

/// Build the configured policy.
pub fn policy_from_config(config: &TemporalConfig) -> Arc<dyn TemporalPolicy> {
    match config.strategy {
        TemporalStrategy::Categorical => Arc::new(CategoricalPolicy {
            immediate_window: config.immediate_window,
            recent_window: config.recent_window,
            immediate_boost: config.immediate_boost,
            recent_boost: config.recent_boost,
        }),
        TemporalStrategy::Continuous => Arc::new(ContinuousPolicy {
            boost_factor: config.temporal_boost_factor,
            half_life_chunks: config.half_life_chunks,
        }),
    }
}
