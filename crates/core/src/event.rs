//! Domain event system — observability hooks for turn processing.
//!
//! Events are published when a turn moves through its stages. Loggers,
//! dashboards or tests subscribe without the engine knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn was accepted for a session
    TurnStarted {
        session_id: String,
        input_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// The token budget for a turn was computed
    BudgetComputed {
        session_id: String,
        total_available: usize,
        warm_slice: usize,
        structured: usize,
        augmentation: usize,
        timestamp: DateTime<Utc>,
    },

    /// The curator produced a decision ("llm" or "fallback")
    CurationCompleted {
        session_id: String,
        mode: String,
        kept: usize,
        additional_queries: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn continued with reduced fidelity
    TurnDegraded {
        session_id: String,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A context payload was delivered
    TurnCompleted {
        session_id: String,
        warm_chunks: usize,
        augmentation_chunks: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed and no payload was delivered
    TurnFailed {
        session_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// The entity roster was (re)loaded
    RosterReloaded {
        characters: usize,
        places: usize,
        factions: usize,
        errors: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
