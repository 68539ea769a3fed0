//! In-memory search backend — useful for testing and offline runs.

use crate::embedder::tokenize;
use crate::vector::cosine_similarity;
use async_trait::async_trait;
use lorekeeper_core::chunk::StoredChunk;
use lorekeeper_core::error::SearchError;
use lorekeeper_core::search::{Embedder, SearchHit, SearchService, Signal};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

struct IndexedChunk {
    chunk: StoredChunk,
    words: HashSet<String>,
    embedding: Option<Vec<f32>>,
}

/// Answers both signals over chunks held in a Vec.
///
/// The lexical score is the fraction of distinct query words present in the
/// chunk. The vector signal needs an [`Embedder`]; without one it reports
/// itself unavailable.
pub struct InMemorySearch {
    entries: Arc<RwLock<Vec<IndexedChunk>>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl InMemorySearch {
    /// Lexical-only backend.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            embedder: None,
        }
    }

    /// Backend answering both signals.
    pub fn with_embedder(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            embedder: Some(embedder),
        }
    }

    /// Index a chunk. Re-inserting an id replaces the earlier entry.
    pub async fn insert(&self, chunk: StoredChunk) -> Result<(), SearchError> {
        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed(&chunk.text).await?),
            None => None,
        };
        let words = tokenize(&chunk.text).collect();
        let mut entries = self.entries.write().await;
        entries.retain(|e| e.chunk.id != chunk.id);
        entries.push(IndexedChunk {
            chunk,
            words,
            embedding,
        });
        Ok(())
    }

    pub async fn insert_all(
        &self,
        chunks: impl IntoIterator<Item = StoredChunk>,
    ) -> Result<(), SearchError> {
        for chunk in chunks {
            self.insert(chunk).await?;
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn lexical(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let terms: HashSet<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Vec::new();
        }
        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .filter_map(|e| {
                let matched = terms.iter().filter(|t| e.words.contains(*t)).count();
                (matched > 0).then(|| hit(&e.chunk, matched as f32 / terms.len() as f32))
            })
            .collect();
        rank(hits, k)
    }

    async fn vector(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let Some(embedder) = &self.embedder else {
            return Err(SearchError::SignalUnavailable {
                signal: Signal::Vector,
                reason: "no embedder configured".into(),
            });
        };
        let query_vec = embedder.embed(query).await?;
        let entries = self.entries.read().await;
        let hits = entries
            .iter()
            .filter_map(|e| {
                let score = cosine_similarity(&query_vec, e.embedding.as_deref()?);
                (score > 0.0).then(|| hit(&e.chunk, score))
            })
            .collect();
        Ok(rank(hits, k))
    }
}

impl Default for InMemorySearch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchService for InMemorySearch {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        query: &str,
        signal: Signal,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        match signal {
            Signal::Lexical => Ok(self.lexical(query, k).await),
            Signal::Vector => self.vector(query, k).await,
        }
    }
}

fn hit(chunk: &StoredChunk, score: f32) -> SearchHit {
    SearchHit {
        id: chunk.id,
        score,
        text: chunk.text.clone(),
        token_estimate: chunk.token_count,
    }
}

fn rank(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    hits.truncate(k);
    hits
}
