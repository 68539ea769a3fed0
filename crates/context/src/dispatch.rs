//! Named-action dispatch over [`Envelope`]s.
//!
//! Each engine operation is registered as an [`Action`] under a stable
//! name. [`ActionRegistry::dispatch`] answers every request envelope with
//! either a response or an error envelope carrying the same id.

use crate::engine::ContextEngine;
use async_trait::async_trait;
use lorekeeper_core::envelope::Envelope;
use lorekeeper_core::message::SessionId;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Unknown action: {0}")]
    NotFound(String),

    #[error("Invalid payload for {action}: {reason}")]
    InvalidPayload { action: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// One operation reachable by name.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError>;
}

/// Registry of actions bound to one engine.
pub struct ActionRegistry {
    engine: Arc<ContextEngine>,
    actions: HashMap<String, Box<dyn Action>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new(engine: Arc<ContextEngine>) -> Self {
        Self {
            engine,
            actions: HashMap::new(),
        }
    }

    /// A registry with every built-in action.
    pub fn with_defaults(engine: Arc<ContextEngine>) -> Self {
        let mut registry = Self::new(engine);
        registry.register(Box::new(AssembleContext));
        registry.register(Box::new(Classify));
        registry.register(Box::new(DetectEntities));
        registry.register(Box::new(LastBudgetBreakdown));
        registry.register(Box::new(LastCurationDecision));
        registry.register(Box::new(ReloadRoster));
        registry
    }

    /// Register an action. Replaces any existing action with the same name.
    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run the named action directly.
    pub async fn execute(
        &self,
        action: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let handler = self
            .actions
            .get(action)
            .ok_or_else(|| ActionError::NotFound(action.to_string()))?;
        handler.execute(&self.engine, payload).await
    }

    /// Answer a request envelope.
    pub async fn dispatch(&self, envelope: Envelope) -> Envelope {
        let (id, action, payload) = match envelope {
            Envelope::Request {
                id,
                action,
                payload,
            } => (id, action, payload),
            other => {
                return Envelope::error(other.id(), "only request envelopes can be dispatched");
            }
        };

        debug!(id = %id, action = %action, "Dispatching action");
        match self.execute(&action, payload).await {
            Ok(result) => Envelope::response(id, result),
            Err(e) => {
                warn!(id = %id, action = %action, error = %e, "Action failed");
                Envelope::error(id, e.to_string())
            }
        }
    }
}

fn parse<T: DeserializeOwned>(action: &str, payload: serde_json::Value) -> Result<T, ActionError> {
    serde_json::from_value(payload).map_err(|e| ActionError::InvalidPayload {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ActionError> {
    serde_json::to_value(value).map_err(|e| ActionError::Failed(e.to_string()))
}

#[derive(Deserialize)]
struct TurnArgs {
    session_id: String,
    user_input: String,
}

#[derive(Deserialize)]
struct TextArgs {
    text: String,
}

#[derive(Deserialize)]
struct SessionArgs {
    session_id: String,
}

struct AssembleContext;

#[async_trait]
impl Action for AssembleContext {
    fn name(&self) -> &str {
        "assemble_context"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let args: TurnArgs = parse(self.name(), payload)?;
        let payload = engine
            .assemble_context(&SessionId(args.session_id), &args.user_input)
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        to_value(&payload)
    }
}

struct Classify;

#[async_trait]
impl Action for Classify {
    fn name(&self) -> &str {
        "classify"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let args: TextArgs = parse(self.name(), payload)?;
        Ok(serde_json::json!({ "classification": engine.classify(&args.text) }))
    }
}

struct DetectEntities;

#[async_trait]
impl Action for DetectEntities {
    fn name(&self) -> &str {
        "detect_entities"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let args: TextArgs = parse(self.name(), payload)?;
        to_value(&engine.detect_entities(&args.text))
    }
}

struct LastBudgetBreakdown;

#[async_trait]
impl Action for LastBudgetBreakdown {
    fn name(&self) -> &str {
        "last_budget_breakdown"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let args: SessionArgs = parse(self.name(), payload)?;
        to_value(&engine.last_budget_breakdown(&SessionId(args.session_id)))
    }
}

struct LastCurationDecision;

#[async_trait]
impl Action for LastCurationDecision {
    fn name(&self) -> &str {
        "last_curation_decision"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let args: SessionArgs = parse(self.name(), payload)?;
        to_value(&engine.last_curation_decision(&SessionId(args.session_id)))
    }
}

struct ReloadRoster;

#[async_trait]
impl Action for ReloadRoster {
    fn name(&self) -> &str {
        "reload_roster"
    }

    async fn execute(
        &self,
        engine: &ContextEngine,
        _payload: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let report = engine.reload_roster().await;
        Ok(serde_json::json!({
            "characters": report.characters,
            "places": report.places,
            "factions": report.factions,
            "errors": report.errors,
        }))
    }
}
