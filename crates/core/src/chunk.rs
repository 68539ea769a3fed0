//! Narrative chunks — the unit of story history.
//!
//! Chunk ids are sequential in story order, so the distance between two ids
//! is the elapsed narrative time between them.

use serde::{Deserialize, Serialize};

/// Sequential narrative chunk identifier.
pub type ChunkId = u64;

/// An inclusive range of chunk ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub start: ChunkId,
    pub end: ChunkId,
}

impl ChunkRange {
    pub fn new(start: ChunkId, end: ChunkId) -> Self {
        Self { start, end }
    }

    /// Number of chunks covered (0 if the range is inverted).
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ChunkId) -> bool {
        id >= self.start && id <= self.end
    }

    /// Iterate the ids in story order.
    pub fn ids(&self) -> std::ops::RangeInclusive<ChunkId> {
        self.start..=self.end
    }
}

/// Where a candidate entered the turn's context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSource {
    /// Part of the contiguous recent-history window
    WarmSlice,
    /// Added by warm slice expansion
    Expansion,
    /// Ranked by the hybrid retrieval combiner
    Hybrid,
    /// Found by a curator follow-up query
    FollowUp,
}

/// A retrieval candidate with its per-signal and combined scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkCandidate {
    pub chunk_id: ChunkId,
    pub text: String,
    pub token_count: usize,
    #[serde(default)]
    pub vector_score: f32,
    #[serde(default)]
    pub text_score: f32,
    #[serde(default)]
    pub combined_score: f32,
    pub source: ChunkSource,
}

impl ChunkCandidate {
    /// A candidate built from a stored chunk, with no relevance scores.
    pub fn from_stored(chunk: StoredChunk, source: ChunkSource) -> Self {
        Self {
            chunk_id: chunk.id,
            text: chunk.text,
            token_count: chunk.token_count,
            vector_score: 0.0,
            text_score: 0.0,
            combined_score: 0.0,
            source,
        }
    }
}

/// Story placement metadata for a stored chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_time: Option<String>,
}

/// A chunk as returned by the narrative history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: ChunkId,
    pub text: String,
    pub token_count: usize,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len_is_inclusive() {
        assert_eq!(ChunkRange::new(100, 110).len(), 11);
        assert_eq!(ChunkRange::new(5, 5).len(), 1);
        assert!(ChunkRange::new(6, 5).is_empty());
    }

    #[test]
    fn range_ids_in_story_order() {
        let ids: Vec<ChunkId> = ChunkRange::new(3, 6).ids().collect();
        assert_eq!(ids, vec![3, 4, 5, 6]);
    }

    #[test]
    fn candidate_source_serializes_snake_case() {
        let candidate = ChunkCandidate::from_stored(
            StoredChunk {
                id: 42,
                text: "The rain never stops here.".into(),
                token_count: 7,
                metadata: ChunkMetadata::default(),
            },
            ChunkSource::WarmSlice,
        );
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"source\":\"warm_slice\""));
        assert!(json.contains("\"chunk_id\":42"));
    }
}
