//! Tagged message envelopes for named-action dispatch.
//!
//! Callers that drive the engine over a message boundary (a socket, a queue,
//! another process) exchange exactly three shapes. Requests are validated
//! when they are built, so a dispatcher never sees an empty id or action.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A request, its successful response, or its failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "RawEnvelope")]
pub enum Envelope {
    Request {
        id: String,
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Response {
        id: String,
        payload: serde_json::Value,
    },
    Error {
        id: String,
        message: String,
    },
}

/// Wire shape before validation.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawEnvelope {
    Request {
        id: String,
        action: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
    Response {
        id: String,
        payload: serde_json::Value,
    },
    Error {
        id: String,
        message: String,
    },
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = EnvelopeError;

    fn try_from(raw: RawEnvelope) -> Result<Self, EnvelopeError> {
        match raw {
            RawEnvelope::Request {
                id,
                action,
                payload,
            } => Self::request_with_id(id, action, payload),
            RawEnvelope::Response { id, payload } => Ok(Self::response(id, payload)),
            RawEnvelope::Error { id, message } => Ok(Self::error(id, message)),
        }
    }
}

/// Rejected envelope construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Envelope id must not be empty")]
    EmptyId,

    #[error("Request action must not be empty")]
    EmptyAction,
}

impl Envelope {
    /// Build a request with a fresh id.
    pub fn request(
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, EnvelopeError> {
        Self::request_with_id(Uuid::new_v4().to_string(), action, payload)
    }

    /// Build a request with a caller-chosen id.
    pub fn request_with_id(
        id: impl Into<String>,
        action: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<Self, EnvelopeError> {
        let id = id.into();
        let action = action.into();
        if id.trim().is_empty() {
            return Err(EnvelopeError::EmptyId);
        }
        if action.trim().is_empty() {
            return Err(EnvelopeError::EmptyAction);
        }
        Ok(Self::Request {
            id,
            action,
            payload,
        })
    }

    /// A successful response to the request with `id`.
    pub fn response(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Response {
            id: id.into(),
            payload,
        }
    }

    /// A failure answering the request with `id`.
    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::Error { id, .. } => id,
        }
    }
}
