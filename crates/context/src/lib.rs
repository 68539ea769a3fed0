//! Turn context assembly for Lorekeeper.
//!
//! One call to [`ContextEngine::assemble_context`] turns a user's input into
//! the context the story generator sees next:
//!
//! - [`entities`]: whole-word detection of roster characters, places and factions
//! - [`classifier`]: layered pattern classification of the query
//! - [`budget`]: the per-turn token split
//! - [`warm_slice`]: recent history and its expansion into spare budget
//! - [`curator`]: LLM curation of retrieved candidates, with a greedy fallback
//! - [`engine`]: the turn pipeline, per-session ordering and introspection
//! - [`dispatch`]: named-action access over request envelopes

pub mod budget;
pub mod classifier;
pub mod curator;
pub mod dispatch;
pub mod engine;
pub mod entities;
pub mod warm_slice;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use budget::{BudgetOutcome, InputOverflow, TokenBudget, compute_budget};
pub use classifier::{LayerSpec, QueryClassification, QueryClassifier};
pub use curator::{AdditionalQuery, CurationDecision, CurationMode, LlmCurator};
pub use dispatch::{Action, ActionError, ActionRegistry};
pub use engine::{Collaborators, ContextEngine, ContextPayload, Degradation, EngineContext, TurnError};
pub use entities::{EntityDetector, EntityTable, LoadReport};
pub use warm_slice::{ExpansionPlan, WarmSliceExpander, expand, expand_within};
