//! Narrative history store contract.

use crate::chunk::{ChunkId, ChunkRange, StoredChunk};
use crate::error::HistoryError;
use crate::message::SessionId;
use async_trait::async_trait;

/// Read access to stored narrative chunks.
///
/// Implementations: in-memory / JSON file (this workspace), the narrative
/// database in production.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a single chunk by id.
    async fn get_chunk(&self, id: ChunkId) -> std::result::Result<StoredChunk, HistoryError>;

    /// The session's current recent-history window. `end` is the newest chunk.
    async fn recent_range(
        &self,
        session_id: &SessionId,
    ) -> std::result::Result<ChunkRange, HistoryError>;
}
