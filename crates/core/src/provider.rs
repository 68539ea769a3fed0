//! Provider trait — the abstraction over LLM inference backends.
//!
//! The curator is the only component that talks to a model. It needs one
//! thing: send a prompt together with a JSON schema and get a structured
//! value back. Timeouts are enforced by the caller, not the provider.

use crate::error::ProviderError;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request for a schema-constrained response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The prompt messages
    pub messages: Vec<Message>,

    /// Name of the response schema (sent to APIs that require one)
    pub schema_name: String,

    /// JSON Schema the response must satisfy
    pub schema: serde_json::Value,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.2
}

/// A structured response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredResponse {
    /// The decoded structured value
    pub value: serde_json::Value,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Implementations: OpenAI-compatible HTTP endpoints, scripted mocks in tests.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "ollama").
    fn name(&self) -> &str;

    /// Send a prompt and decode a schema-constrained response.
    async fn respond(
        &self,
        request: StructuredRequest,
    ) -> std::result::Result<StructuredResponse, ProviderError>;

    /// Health check — can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_request_defaults() {
        let req: StructuredRequest = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [],
            "schema_name": "curation",
            "schema": {"type": "object"}
        }))
        .unwrap();
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn structured_response_skips_missing_usage() {
        let resp = StructuredResponse {
            value: serde_json::json!({"kept_chunk_ids": [1, 2]}),
            model: "mock".into(),
            usage: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("usage"));
        assert!(json.contains("kept_chunk_ids"));
    }
}
