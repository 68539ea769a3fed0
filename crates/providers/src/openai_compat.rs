//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/v1/chat/completions` with `response_format`
//! JSON-schema support.
//!
//! The structured response arrives as the assistant message content; it is
//! decoded as JSON here, so callers receive a `serde_json::Value` or a
//! [`ProviderError::MalformedResponse`].

use async_trait::async_trait;
use lorekeeper_config::ProviderConfig;
use lorekeeper_core::error::ProviderError;
use lorekeeper_core::message::Message;
use lorekeeper_core::provider::{StructuredRequest, StructuredResponse, Usage};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        // Request deadlines belong to the caller; only bound connection setup here
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Build from the `[provider]` config section. An API key is required.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("no API key set".into()))?;
        Self::new("openai_compat", config.api_url.as_str(), api_key)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    /// The chat completion request body for a structured request.
    fn build_body(request: &StructuredRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": request.schema_name,
                    "schema": request.schema,
                    "strict": true,
                }
            },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    /// Decode a completion response into the structured value.
    fn parse_response(api_response: ApiResponse) -> Result<StructuredResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedResponse("No choices in response".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| ProviderError::MalformedResponse(format!("content is not JSON: {e}")))?;

        if !value.is_object() {
            return Err(ProviderError::MalformedResponse(
                "expected a JSON object".into(),
            ));
        }

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(StructuredResponse {
            value,
            model: api_response.model,
            usage,
        })
    }
}

/// Some endpoints wrap JSON in a markdown fence even in JSON mode.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[async_trait]
impl lorekeeper_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn respond(
        &self,
        request: StructuredRequest,
    ) -> std::result::Result<StructuredResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            schema = %request.schema_name,
            "Sending structured request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!("Failed to parse response: {e}"))
        })?;

        Self::parse_response(api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeeper_core::Provider;

    fn request() -> StructuredRequest {
        StructuredRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![
                Message::system("You curate story context"),
                Message::user("Pick chunks"),
            ],
            schema_name: "curation".into(),
            schema: serde_json::json!({"type": "object"}),
            temperature: 0.2,
            max_tokens: Some(512),
        }
    }

    fn api_response(content: &str) -> ApiResponse {
        serde_json::from_value(serde_json::json!({
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        }))
        .unwrap()
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url().contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_trimmed() {
        let provider = OpenAiCompatProvider::new("x", "http://host/v1/", "k").unwrap();
        assert_eq!(provider.base_url(), "http://host/v1");
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = ProviderConfig::default();
        assert!(matches!(
            OpenAiCompatProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let config = ProviderConfig {
            api_key: Some("sk-test".into()),
            ..ProviderConfig::default()
        };
        let provider = OpenAiCompatProvider::from_config(&config).unwrap();
        assert!(provider.base_url().contains("api.openai.com"));
    }

    #[test]
    fn body_carries_schema_and_messages() {
        let body = OpenAiCompatProvider::build_body(&request());
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "curation");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Pick chunks");
    }

    #[test]
    fn parses_json_content() {
        let parsed = OpenAiCompatProvider::parse_response(api_response(
            r#"{"kept_chunk_ids": [3, 1], "additional_queries": []}"#,
        ))
        .unwrap();
        assert_eq!(parsed.value["kept_chunk_ids"][0], 3);
        assert_eq!(parsed.model, "gpt-4o-mini-2024");
        assert_eq!(parsed.usage.unwrap().total_tokens, 120);
    }

    #[test]
    fn parses_fenced_json_content() {
        let parsed = OpenAiCompatProvider::parse_response(api_response(
            "```json\n{\"kept_chunk_ids\": []}\n```",
        ))
        .unwrap();
        assert!(parsed.value["kept_chunk_ids"].as_array().unwrap().is_empty());
    }

    #[test]
    fn prose_content_is_malformed() {
        let err = OpenAiCompatProvider::parse_response(api_response("I think chunk 3 is best."))
            .unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }

    #[test]
    fn empty_choices_is_malformed() {
        let response: ApiResponse = serde_json::from_value(serde_json::json!({
            "model": "m",
            "choices": []
        }))
        .unwrap();
        assert!(matches!(
            OpenAiCompatProvider::parse_response(response),
            Err(ProviderError::MalformedResponse(_))
        ));
    }
}
