//! Error types for the Lorekeeper domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error enum; the umbrella
//! [`Error`] wraps them for callers that do not care which one failed.

use crate::chunk::ChunkId;
use crate::search::Signal;
use thiserror::Error;

/// The top-level error type for Lorekeeper operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Roster error: {0}")]
    Roster(#[from] RosterError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed structured response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search service unavailable: {0}")]
    Unavailable(String),

    #[error("{signal} signal unavailable: {reason}")]
    SignalUnavailable { signal: Signal, reason: String },

    #[error("{signal} signal timed out after {timeout_ms}ms")]
    Timeout { signal: Signal, timeout_ms: u64 },

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum HistoryError {
    #[error("Chunk not found: {0}")]
    ChunkNotFound(ChunkId),

    #[error("Unknown session: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Error)]
pub enum RosterError {
    #[error("Failed to read {section} roster: {reason}")]
    Read { section: String, reason: String },

    #[error("Failed to parse {section} roster: {reason}")]
    Parse { section: String, reason: String },
}
