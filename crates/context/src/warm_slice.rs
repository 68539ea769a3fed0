//! Warm slice expansion — spend leftover budget on neighbouring history.
//!
//! Planning is pure: [`expand`] decides which chunk ids to add and in which
//! order, so the plan can be logged before any I/O. [`WarmSliceExpander::fetch`]
//! then loads the planned chunks concurrently, dropping any that fail.

use futures::future::join_all;
use lorekeeper_core::chunk::{ChunkCandidate, ChunkId, ChunkRange, ChunkSource};
use lorekeeper_core::history::HistoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    Bidirectional,
    Noop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Backward,
    Forward,
}

/// One chunk the plan will add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChunk {
    pub chunk_id: ChunkId,
    /// Distance from the window edge, 1 = adjacent
    pub priority: u64,
    pub direction: Direction,
}

/// Which chunks to add around the current window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionPlan {
    pub strategy: ExpansionStrategy,
    pub original_range: ChunkRange,
    pub new_range: ChunkRange,
    /// Ordered by priority, backward before forward on ties
    pub chunks_to_add: Vec<PlannedChunk>,
    pub estimated_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ExpansionPlan {
    fn noop(range: ChunkRange, reason: impl Into<String>) -> Self {
        Self {
            strategy: ExpansionStrategy::Noop,
            original_range: range,
            new_range: range,
            chunks_to_add: Vec::new(),
            estimated_tokens: 0,
            reason: Some(reason.into()),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.strategy == ExpansionStrategy::Noop
    }
}

/// Plan an expansion with no knowledge of where history ends.
pub fn expand(
    current: ChunkRange,
    tokens_available: usize,
    avg_tokens_per_chunk: usize,
) -> ExpansionPlan {
    expand_within(
        current,
        tokens_available,
        avg_tokens_per_chunk,
        ChunkRange::new(ChunkId::MIN, ChunkId::MAX),
    )
}

/// Plan an expansion that stays inside `bounds` (the known history extent).
///
/// When one side runs out of history its unused share moves to the other.
pub fn expand_within(
    current: ChunkRange,
    tokens_available: usize,
    avg_tokens_per_chunk: usize,
    bounds: ChunkRange,
) -> ExpansionPlan {
    if avg_tokens_per_chunk == 0 {
        return ExpansionPlan::noop(current, "average chunk size is zero");
    }
    let chunks_to_add = (tokens_available / avg_tokens_per_chunk) as u64;
    if chunks_to_add < 1 {
        return ExpansionPlan::noop(
            current,
            format!(
                "{tokens_available} tokens available, less than one chunk of {avg_tokens_per_chunk}"
            ),
        );
    }

    let room_back = current.start.saturating_sub(bounds.start);
    let room_forward = bounds.end.saturating_sub(current.end);

    let mut backward = (chunks_to_add / 2).min(room_back);
    let forward = (chunks_to_add - backward).min(room_forward);
    let unused = chunks_to_add - backward - forward;
    backward = (backward + unused).min(room_back);

    if backward + forward == 0 {
        return ExpansionPlan::noop(current, "no history beyond the current window");
    }

    let mut planned = Vec::with_capacity((backward + forward) as usize);
    for distance in 1..=backward.max(forward) {
        if distance <= backward {
            planned.push(PlannedChunk {
                chunk_id: current.start - distance,
                priority: distance,
                direction: Direction::Backward,
            });
        }
        if distance <= forward {
            planned.push(PlannedChunk {
                chunk_id: current.end + distance,
                priority: distance,
                direction: Direction::Forward,
            });
        }
    }

    let plan = ExpansionPlan {
        strategy: ExpansionStrategy::Bidirectional,
        original_range: current,
        new_range: ChunkRange::new(current.start - backward, current.end + forward),
        estimated_tokens: planned.len() * avg_tokens_per_chunk,
        chunks_to_add: planned,
        reason: None,
    };

    debug!(
        backward,
        forward,
        start = plan.new_range.start,
        end = plan.new_range.end,
        estimated_tokens = plan.estimated_tokens,
        "Warm slice expansion planned"
    );
    plan
}

/// Loads warm slice chunks from the history store.
pub struct WarmSliceExpander {
    history: Arc<dyn HistoryStore>,
}

impl WarmSliceExpander {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self { history }
    }

    /// Fetch the planned chunks concurrently, in plan order.
    ///
    /// A chunk that fails to load is logged and left out.
    pub async fn fetch(&self, plan: &ExpansionPlan) -> Vec<ChunkCandidate> {
        let ids: Vec<ChunkId> = plan.chunks_to_add.iter().map(|c| c.chunk_id).collect();
        self.fetch_ids(&ids, ChunkSource::Expansion).await
    }

    /// Fetch every chunk in `range`, in story order.
    pub async fn fetch_range(&self, range: ChunkRange) -> Vec<ChunkCandidate> {
        let ids: Vec<ChunkId> = range.ids().collect();
        self.fetch_ids(&ids, ChunkSource::WarmSlice).await
    }

    async fn fetch_ids(&self, ids: &[ChunkId], source: ChunkSource) -> Vec<ChunkCandidate> {
        let results = join_all(ids.iter().map(|id| self.history.get_chunk(*id))).await;
        let mut fetched = Vec::with_capacity(ids.len());
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(chunk) => fetched.push(ChunkCandidate::from_stored(chunk, source)),
                Err(e) => warn!(chunk_id = *id, error = %e, "Chunk fetch failed, dropping"),
            }
        }
        fetched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::history_with_chunks;

    fn ids(plan: &ExpansionPlan) -> Vec<ChunkId> {
        plan.chunks_to_add.iter().map(|c| c.chunk_id).collect()
    }

    #[test]
    fn expands_backward_then_forward_by_priority() {
        let plan = expand(ChunkRange::new(100, 110), 6000, 2000);
        assert_eq!(plan.strategy, ExpansionStrategy::Bidirectional);
        assert_eq!(ids(&plan), vec![99, 111, 112]);
        assert_eq!(plan.chunks_to_add[0].direction, Direction::Backward);
        assert_eq!(plan.chunks_to_add[0].priority, 1);
        assert_eq!(plan.chunks_to_add[1].priority, 1);
        assert_eq!(plan.chunks_to_add[2].priority, 2);
        assert_eq!(plan.new_range, ChunkRange::new(99, 112));
        assert_eq!(plan.estimated_tokens, 6000);
    }

    #[test]
    fn less_than_one_chunk_is_noop() {
        let plan = expand(ChunkRange::new(100, 110), 1999, 2000);
        assert!(plan.is_noop());
        assert!(plan.chunks_to_add.is_empty());
        assert!(plan.reason.is_some());
        assert_eq!(plan.new_range, plan.original_range);
    }

    #[test]
    fn zero_average_is_noop() {
        let plan = expand(ChunkRange::new(1, 2), 5000, 0);
        assert!(plan.is_noop());
    }

    #[test]
    fn bounds_reassign_share_to_backward() {
        // Window already ends at the newest chunk
        let plan = expand_within(
            ChunkRange::new(100, 110),
            8000,
            2000,
            ChunkRange::new(1, 110),
        );
        assert_eq!(ids(&plan), vec![99, 98, 97, 96]);
        assert!(plan.chunks_to_add.iter().all(|c| c.direction == Direction::Backward));
    }

    #[test]
    fn bounds_reassign_share_to_forward() {
        let plan = expand_within(ChunkRange::new(2, 5), 8000, 2000, ChunkRange::new(1, 50));
        assert_eq!(ids(&plan), vec![1, 6, 7, 8]);
    }

    #[test]
    fn window_covering_all_history_is_noop() {
        let plan = expand_within(ChunkRange::new(1, 10), 8000, 2000, ChunkRange::new(1, 10));
        assert!(plan.is_noop());
    }

    #[tokio::test]
    async fn fetch_drops_missing_chunks_and_keeps_order() {
        let history = history_with_chunks(98..=111).await;
        let expander = WarmSliceExpander::new(history);
        let plan = expand(ChunkRange::new(100, 110), 6000, 2000);
        let fetched = expander.fetch(&plan).await;
        // 112 is not in the store
        let got: Vec<ChunkId> = fetched.iter().map(|c| c.chunk_id).collect();
        assert_eq!(got, vec![99, 111]);
        assert!(fetched.iter().all(|c| c.source == ChunkSource::Expansion));
    }

    #[tokio::test]
    async fn fetch_range_in_story_order() {
        let history = history_with_chunks(1..=5).await;
        let expander = WarmSliceExpander::new(history);
        let fetched = expander.fetch_range(ChunkRange::new(2, 4)).await;
        let got: Vec<ChunkId> = fetched.iter().map(|c| c.chunk_id).collect();
        assert_eq!(got, vec![2, 3, 4]);
        assert_eq!(fetched[0].source, ChunkSource::WarmSlice);
    }
}
