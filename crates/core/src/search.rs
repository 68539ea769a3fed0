//! Search collaborator — per-signal ranked lookup over narrative chunks.
//!
//! The retrieval service answers one signal at a time:
//! - Vector search (semantic similarity via embeddings)
//! - Lexical search (keyword / full-text matching)
//!
//! Combining the two is the hybrid combiner's job, not the service's.

use crate::chunk::ChunkId;
use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A retrieval signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// Embedding similarity
    Vector,
    /// Keyword / full-text match
    Lexical,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Vector => "vector",
            Signal::Lexical => "lexical",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ranked hit from a single signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    /// Raw signal score, higher is better
    pub score: f32,
    pub text: String,
    pub token_estimate: usize,
}

/// The search/retrieval service contract.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// The backend name (e.g., "in_memory", "pgvector").
    fn name(&self) -> &str;

    /// Return up to `k` hits for `query` ranked by the given signal.
    async fn search(
        &self,
        query: &str,
        signal: Signal,
        k: usize,
    ) -> std::result::Result<Vec<SearchHit>, SearchError>;
}

/// Text embedding contract used by vector-capable search backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, SearchError>;
}
