//! # Lorekeeper Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Lorekeeper turn context assembler. This crate carries no storage,
//! network, or model code — it defines the value objects that flow through
//! a turn and the contracts every external collaborator implements.
//!
//! ## Design Philosophy
//!
//! Every collaborator (roster, search, history, LLM inference) is a trait
//! here. Implementations live in their respective crates, which keeps the
//! dependency graph pointing inward and makes each seam trivially mockable.

pub mod chunk;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod search;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use chunk::{ChunkCandidate, ChunkId, ChunkMetadata, ChunkRange, ChunkSource, StoredChunk};
pub use entity::{
    CharacterRecord, EntityId, EntityMatch, FactionRecord, PlaceRecord, RosterSource,
};
pub use envelope::Envelope;
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use history::HistoryStore;
pub use message::{Message, Role, SessionId};
pub use provider::{Provider, StructuredRequest, StructuredResponse};
pub use search::{Embedder, SearchHit, SearchService, Signal};
