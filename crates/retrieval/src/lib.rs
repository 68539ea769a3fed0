//! Retrieval for Lorekeeper.
//!
//! - [`combiner`]: the hybrid retrieval combiner (vector + lexical + temporal)
//! - [`temporal`]: swappable recency scoring policies
//! - In-memory and JSON-file implementations of the search, history and
//!   roster collaborators, used by the CLI and by tests

pub mod combiner;
pub mod embedder;
pub mod history;
pub mod in_memory;
pub mod roster;
pub mod temporal;
pub mod vector;

pub use combiner::{HybridRetriever, RetrievalOutcome, SignalWeights, combine};
pub use embedder::HashingEmbedder;
pub use history::InMemoryHistory;
pub use in_memory::InMemorySearch;
pub use roster::{JsonFileRoster, StaticRoster};
pub use temporal::{
    CategoricalPolicy, ContinuousPolicy, RecencyInfo, RecencyTier, TemporalPolicy, policy_from_config,
};
pub use vector::{cosine_similarity, l2_normalize};
