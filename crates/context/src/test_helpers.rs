//! Shared test helpers for context tests.

use async_trait::async_trait;
use lorekeeper_core::chunk::{ChunkCandidate, ChunkId, ChunkMetadata, ChunkSource, StoredChunk};
use lorekeeper_core::entity::{
    CharacterRecord, FactionRecord, PlaceRecord, RosterSource,
};
use lorekeeper_core::error::{ProviderError, RosterError};
use lorekeeper_core::provider::{Provider, StructuredRequest, StructuredResponse};
use lorekeeper_retrieval::{InMemoryHistory, StaticRoster};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Alex (1), Sullivan (7, "Sully"), the Neon Docks and the Syndicate.
pub fn sample_roster() -> StaticRoster {
    StaticRoster::new(
        vec![
            CharacterRecord {
                id: 1,
                name: "Alex".into(),
                kind: Some("protagonist".into()),
                aliases: vec![],
                summary: Some("A courier with a long memory.".into()),
            },
            CharacterRecord {
                id: 7,
                name: "Sullivan".into(),
                kind: Some("npc".into()),
                aliases: vec!["Sully".into()],
                summary: Some("Runs numbers for the Syndicate.".into()),
            },
        ],
        vec![PlaceRecord {
            id: 1,
            name: "The Neon Docks".into(),
            aliases: vec!["the docks".into()],
            summary: None,
        }],
        vec![FactionRecord {
            id: 2,
            name: "The Syndicate".into(),
            aliases: vec![],
            summary: None,
        }],
    )
}

/// A roster whose place section always fails.
pub struct FailingRoster {
    inner: StaticRoster,
}

impl FailingRoster {
    pub fn places_broken() -> Self {
        Self {
            inner: sample_roster(),
        }
    }
}

#[async_trait]
impl RosterSource for FailingRoster {
    fn name(&self) -> &str {
        "failing"
    }

    async fn characters(&self) -> Result<Vec<CharacterRecord>, RosterError> {
        self.inner.characters().await
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>, RosterError> {
        Err(RosterError::Read {
            section: "places".into(),
            reason: "connection reset".into(),
        })
    }

    async fn factions(&self) -> Result<Vec<FactionRecord>, RosterError> {
        self.inner.factions().await
    }
}

pub fn stored_chunk(id: ChunkId) -> StoredChunk {
    StoredChunk {
        id,
        text: format!("Chunk {id} of the story."),
        token_count: 100,
        metadata: ChunkMetadata::default(),
    }
}

/// A history store holding 100-token chunks for every id in `ids`.
pub async fn history_with_chunks(ids: impl IntoIterator<Item = ChunkId>) -> Arc<InMemoryHistory> {
    let history = InMemoryHistory::new();
    for id in ids {
        history.insert(stored_chunk(id)).await;
    }
    Arc::new(history)
}

pub fn candidate(id: ChunkId, token_count: usize) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: id,
        text: format!("Candidate passage {id}."),
        token_count,
        vector_score: 0.0,
        text_score: 0.0,
        combined_score: 1.0 / (id as f32 + 1.0),
        source: ChunkSource::Hybrid,
    }
}

/// A mock provider that returns a sequence of scripted results.
///
/// Each call to `respond` returns the next result in the queue.
/// Panics if more calls are made than results provided.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<Result<serde_json::Value, ProviderError>>>,
    requests: Mutex<Vec<StructuredRequest>>,
    hang: bool,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<Result<serde_json::Value, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            hang: false,
        }
    }

    /// A provider that never answers.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<StructuredRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn respond(&self, request: StructuredRequest) -> Result<StructuredResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(value)) => Ok(StructuredResponse {
                value,
                model: "mock-model".into(),
                usage: None,
            }),
            Some(Err(e)) => Err(e),
            None => panic!("ScriptedProvider: no more responses"),
        }
    }
}
