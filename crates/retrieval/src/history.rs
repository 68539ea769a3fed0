//! In-memory narrative history, optionally loaded from a JSON file.
//!
//! File format:
//!
//! ```json
//! {
//!   "chunks": [{ "id": 1, "text": "...", "token_count": 120, "metadata": { "season": 1 } }],
//!   "sessions": { "demo": { "start": 90, "end": 100 } },
//!   "default_window": 10
//! }
//! ```
//!
//! `token_count` is estimated from the text when absent. Sessions without an
//! explicit range get the newest `default_window` chunks, when set.

use async_trait::async_trait;
use lorekeeper_core::chunk::{ChunkId, ChunkMetadata, ChunkRange, StoredChunk};
use lorekeeper_core::error::HistoryError;
use lorekeeper_core::history::HistoryStore;
use lorekeeper_core::message::SessionId;
use lorekeeper_core::token::estimate_tokens;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Deserialize)]
struct HistoryFile {
    #[serde(default)]
    chunks: Vec<ChunkEntry>,
    #[serde(default)]
    sessions: HashMap<String, ChunkRange>,
    #[serde(default)]
    default_window: Option<u64>,
}

#[derive(Deserialize)]
struct ChunkEntry {
    id: ChunkId,
    text: String,
    #[serde(default)]
    token_count: Option<usize>,
    #[serde(default)]
    metadata: ChunkMetadata,
}

/// A [`HistoryStore`] over chunks held in a BTreeMap.
pub struct InMemoryHistory {
    chunks: Arc<RwLock<BTreeMap<ChunkId, StoredChunk>>>,
    sessions: Arc<RwLock<HashMap<SessionId, ChunkRange>>>,
    default_window: Option<u64>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self {
            chunks: Arc::new(RwLock::new(BTreeMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            default_window: None,
        }
    }

    /// Sessions without an explicit range see the newest `window` chunks.
    pub fn with_default_window(mut self, window: u64) -> Self {
        self.default_window = Some(window.max(1));
        self
    }

    /// Load from a JSON history file.
    pub fn from_json_file(path: &Path) -> Result<Self, HistoryError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HistoryError::Storage(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self, HistoryError> {
        let file: HistoryFile = serde_json::from_str(content)
            .map_err(|e| HistoryError::Storage(format!("invalid history file: {e}")))?;

        let chunks: BTreeMap<ChunkId, StoredChunk> = file
            .chunks
            .into_iter()
            .map(|entry| {
                let token_count = entry
                    .token_count
                    .unwrap_or_else(|| estimate_tokens(&entry.text));
                (
                    entry.id,
                    StoredChunk {
                        id: entry.id,
                        text: entry.text,
                        token_count,
                        metadata: entry.metadata,
                    },
                )
            })
            .collect();
        let sessions = file
            .sessions
            .into_iter()
            .map(|(id, range)| (SessionId(id), range))
            .collect();

        debug!(chunks = chunks.len(), "History loaded");
        Ok(Self {
            chunks: Arc::new(RwLock::new(chunks)),
            sessions: Arc::new(RwLock::new(sessions)),
            default_window: file.default_window.filter(|w| *w > 0),
        })
    }

    pub async fn insert(&self, chunk: StoredChunk) {
        self.chunks.write().await.insert(chunk.id, chunk);
    }

    pub async fn set_recent_range(&self, session_id: SessionId, range: ChunkRange) {
        self.sessions.write().await.insert(session_id, range);
    }

    /// Id of the newest stored chunk.
    pub async fn latest_chunk_id(&self) -> Option<ChunkId> {
        self.chunks.read().await.keys().next_back().copied()
    }

    /// Snapshot of every stored chunk in story order.
    pub async fn all_chunks(&self) -> Vec<StoredChunk> {
        self.chunks.read().await.values().cloned().collect()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_chunk(&self, id: ChunkId) -> Result<StoredChunk, HistoryError> {
        self.chunks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(HistoryError::ChunkNotFound(id))
    }

    async fn recent_range(&self, session_id: &SessionId) -> Result<ChunkRange, HistoryError> {
        if let Some(range) = self.sessions.read().await.get(session_id) {
            return Ok(*range);
        }
        let window = self
            .default_window
            .ok_or_else(|| HistoryError::SessionNotFound(session_id.to_string()))?;
        let latest = self
            .latest_chunk_id()
            .await
            .ok_or_else(|| HistoryError::SessionNotFound(session_id.to_string()))?;
        let first = self.chunks.read().await.keys().next().copied().unwrap_or(latest);
        let start = latest.saturating_sub(window - 1).max(first);
        Ok(ChunkRange::new(start, latest))
    }
}
