//! LLM curation — second-pass filtering of retrieval candidates.
//!
//! The curator shows the model a capped list of ranked candidates and asks
//! for a structured decision: which chunk ids to keep, and optionally a few
//! targeted follow-up queries to fill gaps. The decision is validated
//! against the candidates actually shown before anyone sees it.
//!
//! Any model failure (timeout, malformed output, provider error) falls back
//! to a deterministic greedy pick that fills a fixed share of the budget.
//! [`LlmCurator::curate`] always returns a decision.

use lorekeeper_config::CuratorConfig;
use lorekeeper_core::chunk::{ChunkCandidate, ChunkId};
use lorekeeper_core::message::Message;
use lorekeeper_core::provider::{Provider, StructuredRequest};
use lorekeeper_core::token::prompt_tokens;
use lorekeeper_core::search::Signal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Characters of recent narrative shown to the model.
const RECENT_CONTEXT_CHARS: usize = 2000;

const SYSTEM_PROMPT: &str = "You curate retrieved story passages for the next turn of an \
interactive narrative. Keep only passages that help answer or continue the user's input, \
most useful first, within the token budget. If important information is clearly missing, \
propose up to the allowed number of short follow-up queries: `vector` for semantic \
similarity, `lexical` for exact names or phrases. Reply with JSON matching the schema.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationMode {
    Llm,
    Fallback,
}

/// A targeted follow-up retrieval proposed by the curator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalQuery {
    pub kind: Signal,
    pub query_text: String,
}

/// The curator's validated decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationDecision {
    /// Subset of the input candidate ids, in keep order, no duplicates
    pub kept_chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub additional_queries: Vec<AdditionalQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<usize>,
    pub mode: CurationMode,
}

impl CurationDecision {
    pub fn is_fallback(&self) -> bool {
        self.mode == CurationMode::Fallback
    }

    /// Whether the curator flagged a gap worth a follow-up retrieval.
    pub fn has_gap(&self) -> bool {
        !self.additional_queries.is_empty()
    }
}

/// Deterministic greedy curation.
///
/// Walks `candidates` in order and keeps each one while the running total
/// stays within `fraction` of `augmentation_budget`, stopping at the first
/// candidate that would exceed it.
pub fn fallback_curation(
    candidates: &[ChunkCandidate],
    augmentation_budget: usize,
    fraction: f64,
    cause: &str,
) -> CurationDecision {
    let limit = (augmentation_budget as f64 * fraction.clamp(0.0, 1.0)).floor() as usize;
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut total = 0usize;

    for candidate in candidates {
        if !seen.insert(candidate.chunk_id) {
            continue;
        }
        if total + candidate.token_count > limit {
            break;
        }
        total += candidate.token_count;
        kept.push(candidate.chunk_id);
    }

    CurationDecision {
        reasoning: Some(format!(
            "fallback: {cause}; kept {} of {} candidates within {limit} of {augmentation_budget} tokens",
            kept.len(),
            candidates.len()
        )),
        kept_chunk_ids: kept,
        additional_queries: Vec::new(),
        estimated_tokens: Some(total),
        mode: CurationMode::Fallback,
    }
}

/// The JSON schema the model must answer with.
pub fn decision_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["kept_chunk_ids", "additional_queries", "reasoning"],
        "properties": {
            "kept_chunk_ids": {
                "type": "array",
                "items": { "type": "integer" }
            },
            "additional_queries": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["kind", "query_text"],
                    "properties": {
                        "kind": { "type": "string", "enum": ["vector", "lexical"] },
                        "query_text": { "type": "string" }
                    }
                }
            },
            "reasoning": { "type": "string" }
        }
    })
}

/// What the model sends back, before validation.
#[derive(Debug, Deserialize)]
struct RawDecision {
    kept_chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    additional_queries: Vec<RawQuery>,
    #[serde(default)]
    reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    kind: String,
    query_text: String,
}

/// Curates candidates with an LLM, falling back to [`fallback_curation`].
pub struct LlmCurator {
    provider: Option<Arc<dyn Provider>>,
    config: CuratorConfig,
}

impl LlmCurator {
    pub fn new(provider: Arc<dyn Provider>, config: CuratorConfig) -> Self {
        Self {
            provider: Some(provider),
            config,
        }
    }

    /// A curator with no model; every call uses the fallback.
    pub fn fallback_only(config: CuratorConfig) -> Self {
        Self {
            provider: None,
            config,
        }
    }

    pub fn config(&self) -> &CuratorConfig {
        &self.config
    }

    /// Reduce `candidates` to fit `augmentation_budget`. Never fails.
    pub async fn curate(
        &self,
        user_input: &str,
        candidates: &[ChunkCandidate],
        recent_context: &str,
        augmentation_budget: usize,
    ) -> CurationDecision {
        let started = Instant::now();

        let provider = match (&self.provider, self.config.enabled) {
            (Some(provider), true) => provider,
            (None, _) => return self.fallback(candidates, augmentation_budget, "no model configured"),
            (_, false) => return self.fallback(candidates, augmentation_budget, "curator disabled"),
        };

        if candidates.is_empty() {
            return CurationDecision {
                kept_chunk_ids: Vec::new(),
                additional_queries: Vec::new(),
                reasoning: Some("no candidates to curate".into()),
                estimated_tokens: Some(0),
                mode: CurationMode::Llm,
            };
        }

        let shown = &candidates[..candidates.len().min(self.config.max_candidates)];
        let request = self.build_request(user_input, shown, recent_context, augmentation_budget);
        debug!(
            shown = shown.len(),
            prompt_tokens = prompt_tokens(&request.messages),
            "Curation prompt built"
        );
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let outcome = match tokio::time::timeout(timeout, provider.respond(request)).await {
            Ok(Ok(response)) => serde_json::from_value::<RawDecision>(response.value)
                .map_err(|e| format!("malformed response: {e}")),
            Ok(Err(e)) => Err(format!("provider error: {e}")),
            Err(_) => Err(format!("LLM call timed out after {}ms", self.config.timeout_ms)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(raw) => {
                let decision = self.validate(raw, shown, augmentation_budget);
                info!(
                    provider = provider.name(),
                    kept = decision.kept_chunk_ids.len(),
                    shown = shown.len(),
                    additional_queries = decision.additional_queries.len(),
                    elapsed_ms,
                    "Curation complete"
                );
                if let Some(reasoning) = &decision.reasoning {
                    debug!(reasoning = %reasoning, "Curator reasoning");
                }
                decision
            }
            Err(cause) => {
                warn!(provider = provider.name(), cause = %cause, elapsed_ms, "Curator failed, using fallback");
                self.fallback(candidates, augmentation_budget, &cause)
            }
        }
    }

    fn fallback(
        &self,
        candidates: &[ChunkCandidate],
        augmentation_budget: usize,
        cause: &str,
    ) -> CurationDecision {
        fallback_curation(
            candidates,
            augmentation_budget,
            self.config.fallback_budget_fraction,
            cause,
        )
    }

    /// Enforce the decision invariants on raw model output.
    fn validate(
        &self,
        raw: RawDecision,
        shown: &[ChunkCandidate],
        augmentation_budget: usize,
    ) -> CurationDecision {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut total = 0usize;

        for id in raw.kept_chunk_ids {
            let Some(candidate) = shown.iter().find(|c| c.chunk_id == id) else {
                warn!(chunk_id = id, "Curator kept an id it was not shown, dropping");
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            if total + candidate.token_count > augmentation_budget {
                debug!(chunk_id = id, total, augmentation_budget, "Kept set trimmed to budget");
                break;
            }
            total += candidate.token_count;
            kept.push(id);
        }

        let additional_queries = raw
            .additional_queries
            .into_iter()
            .filter_map(|q| {
                let kind = match q.kind.trim().to_ascii_lowercase().as_str() {
                    "vector" => Signal::Vector,
                    "lexical" => Signal::Lexical,
                    other => {
                        warn!(kind = other, "Unknown follow-up query kind, dropping");
                        return None;
                    }
                };
                let query_text = q.query_text.trim().to_string();
                (!query_text.is_empty()).then_some(AdditionalQuery { kind, query_text })
            })
            .take(self.config.max_additional_queries)
            .collect();

        CurationDecision {
            kept_chunk_ids: kept,
            additional_queries,
            reasoning: raw.reasoning.filter(|r| !r.trim().is_empty()),
            estimated_tokens: Some(total),
            mode: CurationMode::Llm,
        }
    }

    fn build_request(
        &self,
        user_input: &str,
        shown: &[ChunkCandidate],
        recent_context: &str,
        augmentation_budget: usize,
    ) -> StructuredRequest {
        let mut prompt = format!(
            "Token budget for kept passages: {augmentation_budget}\n\
             Maximum follow-up queries: {}\n\n\
             ## Recent narrative\n{}\n\n\
             ## User input\n{user_input}\n\n\
             ## Candidates\n",
            self.config.max_additional_queries,
            tail_chars(recent_context, RECENT_CONTEXT_CHARS),
        );
        for c in shown {
            prompt.push_str(&format!(
                "[id={} score={:.3} tokens={}] {}\n",
                c.chunk_id,
                c.combined_score,
                c.token_count,
                head_chars(&c.text, self.config.preview_chars)
            ));
        }

        StructuredRequest {
            model: self.config.model.clone(),
            messages: vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
            schema_name: "curation_decision".into(),
            schema: decision_schema(),
            temperature: self.config.temperature,
            max_tokens: Some(self.config.max_tokens),
        }
    }
}

/// At most `n` leading characters, with an ellipsis when cut.
fn head_chars(text: &str, n: usize) -> String {
    match text.char_indices().nth(n) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// At most `n` trailing characters.
fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    match text.char_indices().nth(count - n) {
        Some((cut, _)) => &text[cut..],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, candidate};
    use lorekeeper_core::error::ProviderError;

    fn candidates() -> Vec<ChunkCandidate> {
        vec![
            candidate(1, 300),
            candidate(2, 300),
            candidate(3, 300),
            candidate(4, 300),
        ]
    }

    fn config() -> CuratorConfig {
        CuratorConfig {
            timeout_ms: 50,
            ..CuratorConfig::default()
        }
    }

    #[test]
    fn fallback_keeps_within_fraction() {
        // 60% of 1000 = 600 -> two 300-token candidates
        let d = fallback_curation(&candidates(), 1000, 0.6, "test");
        assert_eq!(d.kept_chunk_ids, vec![1, 2]);
        assert_eq!(d.estimated_tokens, Some(600));
        assert!(d.additional_queries.is_empty());
        assert!(d.is_fallback());
        assert!(d.reasoning.as_deref().unwrap().starts_with("fallback:"));
    }

    #[test]
    fn fallback_stops_at_first_overflow() {
        let cands = vec![candidate(1, 100), candidate(2, 600), candidate(3, 50)];
        let d = fallback_curation(&cands, 1000, 0.6, "test");
        assert_eq!(d.kept_chunk_ids, vec![1]);
    }

    #[test]
    fn fallback_is_deterministic() {
        let a = fallback_curation(&candidates(), 1500, 0.6, "timeout");
        let b = fallback_curation(&candidates(), 1500, 0.6, "timeout");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn llm_decision_is_validated() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!({
            "kept_chunk_ids": [3, 99, 3, 1],
            "additional_queries": [
                {"kind": "lexical", "query_text": "Sullivan's debt"},
                {"kind": "vector", "query_text": "   "},
                {"kind": "telepathy", "query_text": "x"}
            ],
            "reasoning": "3 and 1 cover the debt"
        }))]));
        let curator = LlmCurator::new(provider.clone(), config());
        let d = curator.curate("Who is Sullivan?", &candidates(), "", 1000).await;

        assert_eq!(d.mode, CurationMode::Llm);
        assert_eq!(d.kept_chunk_ids, vec![3, 1]);
        assert_eq!(d.additional_queries.len(), 1);
        assert_eq!(d.additional_queries[0].kind, Signal::Lexical);
        assert!(d.has_gap());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn llm_kept_set_is_trimmed_to_budget() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!({
            "kept_chunk_ids": [1, 2, 3, 4],
            "additional_queries": [],
            "reasoning": ""
        }))]));
        let curator = LlmCurator::new(provider, config());
        let d = curator.curate("q", &candidates(), "", 700).await;
        assert_eq!(d.kept_chunk_ids, vec![1, 2]);
        assert!(d.reasoning.is_none());
    }

    #[tokio::test]
    async fn prompt_is_capped_and_schema_attached() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!({
            "kept_chunk_ids": [4],
            "additional_queries": []
        }))]));
        let curator = LlmCurator::new(
            provider.clone(),
            CuratorConfig {
                max_candidates: 2,
                ..config()
            },
        );
        let d = curator.curate("q", &candidates(), "It was raining.", 1000).await;
        // 4 was never shown
        assert!(d.kept_chunk_ids.is_empty());

        let request = provider.last_request().unwrap();
        assert_eq!(request.schema_name, "curation_decision");
        let prompt = &request.messages[1].content;
        assert!(prompt.contains("[id=1 "));
        assert!(prompt.contains("[id=2 "));
        assert!(!prompt.contains("[id=3 "));
        assert!(prompt.contains("It was raining."));
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let provider = Arc::new(ScriptedProvider::hanging());
        let curator = LlmCurator::new(provider, config());
        let d = curator.curate("q", &candidates(), "", 1000).await;
        assert!(d.is_fallback());
        assert!(d.additional_queries.is_empty());
        assert_eq!(d.kept_chunk_ids, vec![1, 2]);
        let reasoning = d.reasoning.unwrap();
        assert!(reasoning.starts_with("fallback:"));
        assert!(reasoning.contains("timed out"));
    }

    #[tokio::test]
    async fn provider_error_falls_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network(
            "connection refused".into(),
        ))]));
        let curator = LlmCurator::new(provider, config());
        let d = curator.curate("q", &candidates(), "", 1000).await;
        assert!(d.is_fallback());
        assert!(d.reasoning.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn malformed_response_falls_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(serde_json::json!({
            "keep": "chunk three"
        }))]));
        let curator = LlmCurator::new(provider, config());
        let d = curator.curate("q", &candidates(), "", 1000).await;
        assert!(d.is_fallback());
        assert!(d.reasoning.unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn disabled_curator_never_calls_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let curator = LlmCurator::new(
            provider.clone(),
            CuratorConfig {
                enabled: false,
                ..config()
            },
        );
        let d = curator.curate("q", &candidates(), "", 1000).await;
        assert!(d.is_fallback());
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn preview_helpers_respect_char_boundaries() {
        assert_eq!(head_chars("héllo wörld", 5), "héllo…");
        assert_eq!(head_chars("short", 10), "short");
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(tail_chars("abc", 5), "abc");
    }
}
