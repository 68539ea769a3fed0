//! Hybrid retrieval combiner.
//!
//! Issues the vector and lexical searches concurrently, each under its own
//! timeout, and merges the hits into one ranked candidate list:
//!
//! ```text
//! combined = vector_weight * vector_score + text_weight * text_score
//! combined = policy.apply(combined, recency)
//! ```
//!
//! A candidate missing from one signal scores 0 on it. When a whole signal
//! fails its weight is treated as zero and the surviving signal keeps its
//! weighted contribution as-is; weights are never renormalized, so scores
//! stay comparable across runs with and without the failed signal.
//!
//! Ranking is `combined_score` descending, ties by `chunk_id` ascending.

use crate::temporal::{RecencyInfo, TemporalPolicy};
use lorekeeper_config::RetrievalConfig;
use lorekeeper_core::chunk::{ChunkCandidate, ChunkId, ChunkSource};
use lorekeeper_core::error::SearchError;
use lorekeeper_core::search::{SearchHit, SearchService, Signal};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-signal weights. Expected (not required) to sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalWeights {
    pub vector: f32,
    pub text: f32,
}

impl SignalWeights {
    pub fn new(vector: f32, text: f32) -> Self {
        Self { vector, text }
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(config.vector_weight, config.text_weight)
    }

    fn weight(&self, signal: Signal) -> f32 {
        match signal {
            Signal::Vector => self.vector,
            Signal::Lexical => self.text,
        }
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self::new(0.7, 0.3)
    }
}

/// Ranked candidates plus the signals that did not answer.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub candidates: Vec<ChunkCandidate>,
    pub unavailable: Vec<(Signal, String)>,
}

impl RetrievalOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.unavailable.is_empty()
    }
}

/// Executes signal queries against a [`SearchService`] and ranks the result.
pub struct HybridRetriever {
    search: Arc<dyn SearchService>,
    policy: Arc<dyn TemporalPolicy>,
    top_k: usize,
    signal_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(search: Arc<dyn SearchService>, policy: Arc<dyn TemporalPolicy>) -> Self {
        Self {
            search,
            policy,
            top_k: 20,
            signal_timeout: Duration::from_secs(5),
        }
    }

    /// Build with top-k and timeout from configuration.
    pub fn from_config(
        search: Arc<dyn SearchService>,
        policy: Arc<dyn TemporalPolicy>,
        config: &RetrievalConfig,
    ) -> Self {
        Self::new(search, policy)
            .with_top_k(config.top_k)
            .with_signal_timeout(Duration::from_millis(config.signal_timeout_ms))
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_signal_timeout(mut self, timeout: Duration) -> Self {
        self.signal_timeout = timeout;
        self
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Run both signals concurrently and return the merged ranking.
    ///
    /// `newest_chunk` anchors the temporal policy; `None` skips the
    /// temporal adjustment. Fails only when neither signal answers.
    pub async fn retrieve(
        &self,
        query: &str,
        weights: SignalWeights,
        newest_chunk: Option<ChunkId>,
    ) -> Result<RetrievalOutcome, SearchError> {
        let (vector, lexical) = tokio::join!(
            self.timed_search(query, Signal::Vector, self.top_k),
            self.timed_search(query, Signal::Lexical, self.top_k),
        );

        let mut unavailable = Vec::new();
        let mut effective = weights;

        let vector_hits = match vector {
            Ok(hits) => hits,
            Err(e) => {
                warn!(signal = "vector", error = %e, "Signal unavailable, weight treated as zero");
                effective.vector = 0.0;
                unavailable.push((Signal::Vector, e.to_string()));
                Vec::new()
            }
        };
        let text_hits = match lexical {
            Ok(hits) => hits,
            Err(e) => {
                warn!(signal = "lexical", error = %e, "Signal unavailable, weight treated as zero");
                effective.text = 0.0;
                unavailable.push((Signal::Lexical, e.to_string()));
                Vec::new()
            }
        };

        if unavailable.len() == 2 {
            let reasons: Vec<String> = unavailable
                .iter()
                .map(|(signal, reason)| format!("{signal}: {reason}"))
                .collect();
            return Err(SearchError::Unavailable(reasons.join("; ")));
        }

        let candidates = combine(
            &vector_hits,
            &text_hits,
            effective,
            self.policy.as_ref(),
            newest_chunk,
        );

        debug!(
            query_len = query.len(),
            vector_hits = vector_hits.len(),
            text_hits = text_hits.len(),
            candidates = candidates.len(),
            policy = self.policy.name(),
            "Hybrid retrieval complete"
        );

        Ok(RetrievalOutcome {
            candidates,
            unavailable,
        })
    }

    /// Run a single signal (used for targeted follow-up queries).
    ///
    /// The signal's raw score is the base score (weight 1.0), then the
    /// temporal policy applies as usual.
    pub async fn search_signal(
        &self,
        query: &str,
        signal: Signal,
        k: usize,
        newest_chunk: Option<ChunkId>,
    ) -> Result<Vec<ChunkCandidate>, SearchError> {
        let hits = self.timed_search(query, signal, k.max(1)).await?;
        let weights = match signal {
            Signal::Vector => SignalWeights::new(1.0, 0.0),
            Signal::Lexical => SignalWeights::new(0.0, 1.0),
        };
        let (vector_hits, text_hits) = match signal {
            Signal::Vector => (hits, Vec::new()),
            Signal::Lexical => (Vec::new(), hits),
        };
        let mut candidates = combine(
            &vector_hits,
            &text_hits,
            weights,
            self.policy.as_ref(),
            newest_chunk,
        );
        for c in &mut candidates {
            c.source = ChunkSource::FollowUp;
        }
        Ok(candidates)
    }

    async fn timed_search(
        &self,
        query: &str,
        signal: Signal,
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        match tokio::time::timeout(self.signal_timeout, self.search.search(query, signal, k)).await
        {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout {
                signal,
                timeout_ms: self.signal_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Merge per-signal hits into a ranked candidate list.
pub fn combine(
    vector_hits: &[SearchHit],
    text_hits: &[SearchHit],
    weights: SignalWeights,
    policy: &dyn TemporalPolicy,
    newest_chunk: Option<ChunkId>,
) -> Vec<ChunkCandidate> {
    let mut merged: HashMap<ChunkId, ChunkCandidate> = HashMap::new();

    for (signal, hits) in [(Signal::Vector, vector_hits), (Signal::Lexical, text_hits)] {
        for hit in hits {
            let candidate = merged.entry(hit.id).or_insert_with(|| ChunkCandidate {
                chunk_id: hit.id,
                text: hit.text.clone(),
                token_count: hit.token_estimate,
                vector_score: 0.0,
                text_score: 0.0,
                combined_score: 0.0,
                source: ChunkSource::Hybrid,
            });
            // A service may list a chunk twice for one signal; keep the best score
            match signal {
                Signal::Vector => candidate.vector_score = candidate.vector_score.max(hit.score),
                Signal::Lexical => candidate.text_score = candidate.text_score.max(hit.score),
            }
        }
    }

    let mut candidates: Vec<ChunkCandidate> = merged
        .into_values()
        .map(|mut c| {
            let base = weights.weight(Signal::Vector) * c.vector_score
                + weights.weight(Signal::Lexical) * c.text_score;
            c.combined_score = match newest_chunk {
                Some(newest) => policy.apply(base, &RecencyInfo::new(c.chunk_id, newest)),
                None => base,
            };
            c
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::{CategoricalPolicy, ContinuousPolicy};
    use async_trait::async_trait;

    /// Policy that never adjusts, so tests see the raw weighted sum.
    struct FlatPolicy;

    impl TemporalPolicy for FlatPolicy {
        fn name(&self) -> &str {
            "flat"
        }
        fn score(&self, _recency: &RecencyInfo) -> f32 {
            0.0
        }
    }

    fn hit(id: ChunkId, score: f32) -> SearchHit {
        SearchHit {
            id,
            score,
            text: format!("chunk {id}"),
            token_estimate: 100,
        }
    }

    /// Search service with canned per-signal answers.
    struct CannedSearch {
        vector: Result<Vec<SearchHit>, SearchError>,
        lexical: Result<Vec<SearchHit>, SearchError>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SearchService for CannedSearch {
        fn name(&self) -> &str {
            "canned"
        }

        async fn search(
            &self,
            _query: &str,
            signal: Signal,
            _k: usize,
        ) -> Result<Vec<SearchHit>, SearchError> {
            if let (Signal::Vector, Some(delay)) = (signal, self.delay) {
                tokio::time::sleep(delay).await;
            }
            match signal {
                Signal::Vector => self.vector.clone(),
                Signal::Lexical => self.lexical.clone(),
            }
        }
    }

    fn retriever(search: CannedSearch) -> HybridRetriever {
        HybridRetriever::new(Arc::new(search), Arc::new(FlatPolicy))
    }

    #[test]
    fn weighted_sum_of_both_signals() {
        let ranked = combine(
            &[hit(1, 0.8), hit(2, 0.4)],
            &[hit(2, 1.0), hit(3, 0.5)],
            SignalWeights::new(0.7, 0.3),
            &FlatPolicy,
            None,
        );
        let scores: HashMap<ChunkId, f32> =
            ranked.iter().map(|c| (c.chunk_id, c.combined_score)).collect();
        assert!((scores[&1] - 0.56).abs() < 1e-6);
        assert!((scores[&2] - 0.58).abs() < 1e-6);
        assert!((scores[&3] - 0.15).abs() < 1e-6);
        assert_eq!(
            ranked.iter().map(|c| c.chunk_id).collect::<Vec<_>>(),
            vec![2, 1, 3]
        );
    }

    #[test]
    fn ties_broken_by_chunk_id_ascending() {
        let ranked = combine(
            &[hit(9, 0.5), hit(4, 0.5), hit(7, 0.5)],
            &[],
            SignalWeights::new(1.0, 0.0),
            &FlatPolicy,
            None,
        );
        assert_eq!(
            ranked.iter().map(|c| c.chunk_id).collect::<Vec<_>>(),
            vec![4, 7, 9]
        );
    }

    #[test]
    fn temporal_policy_reorders_by_recency() {
        let policy = CategoricalPolicy {
            immediate_window: 10,
            recent_window: 50,
            immediate_boost: 0.2,
            recent_boost: 0.0,
        };
        let ranked = combine(
            &[hit(10, 0.6), hit(995, 0.5)],
            &[],
            SignalWeights::new(1.0, 0.0),
            &policy,
            Some(1000),
        );
        assert_eq!(ranked[0].chunk_id, 995);
        assert!((ranked[0].combined_score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn continuous_policy_with_zero_factor_matches_flat_ranking() {
        let policy = ContinuousPolicy {
            boost_factor: 0.0,
            half_life_chunks: 100.0,
        };
        let ranked = combine(
            &[hit(10, 0.6), hit(995, 0.5)],
            &[],
            SignalWeights::new(1.0, 0.0),
            &policy,
            Some(1000),
        );
        assert_eq!(ranked[0].chunk_id, 10);
    }

    #[tokio::test]
    async fn both_signals_merge() {
        let r = retriever(CannedSearch {
            vector: Ok(vec![hit(1, 0.9)]),
            lexical: Ok(vec![hit(1, 0.5), hit(2, 0.9)]),
            delay: None,
        });
        let outcome = r
            .retrieve("the heist", SignalWeights::new(0.7, 0.3), None)
            .await
            .unwrap();
        assert!(!outcome.is_degraded());
        assert_eq!(outcome.candidates.len(), 2);
        assert_eq!(outcome.candidates[0].chunk_id, 1);
        assert_eq!(outcome.candidates[0].source, ChunkSource::Hybrid);
    }

    #[tokio::test]
    async fn failed_signal_is_not_renormalized() {
        let r = retriever(CannedSearch {
            vector: Err(SearchError::SignalUnavailable {
                signal: Signal::Vector,
                reason: "embedding service down".into(),
            }),
            lexical: Ok(vec![hit(5, 1.0)]),
            delay: None,
        });
        let outcome = r
            .retrieve("the heist", SignalWeights::new(0.7, 0.3), None)
            .await
            .unwrap();
        assert!(outcome.is_degraded());
        assert_eq!(outcome.unavailable[0].0, Signal::Vector);
        // Lexical keeps its 0.3 weight rather than being scaled up to 1.0
        assert!((outcome.candidates[0].combined_score - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn slow_signal_times_out_and_degrades() {
        let r = retriever(CannedSearch {
            vector: Ok(vec![hit(1, 0.9)]),
            lexical: Ok(vec![hit(2, 0.8)]),
            delay: Some(Duration::from_millis(200)),
        })
        .with_signal_timeout(Duration::from_millis(20));
        let outcome = r
            .retrieve("the heist", SignalWeights::new(0.5, 0.5), None)
            .await
            .unwrap();
        assert_eq!(outcome.unavailable.len(), 1);
        assert_eq!(outcome.unavailable[0].0, Signal::Vector);
        assert_eq!(outcome.candidates.len(), 1);
        assert_eq!(outcome.candidates[0].chunk_id, 2);
    }

    #[tokio::test]
    async fn both_signals_down_is_an_error() {
        let r = retriever(CannedSearch {
            vector: Err(SearchError::Unavailable("down".into())),
            lexical: Err(SearchError::QueryFailed("bad index".into())),
            delay: None,
        });
        let err = r
            .retrieve("anything", SignalWeights::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Unavailable(_)));
    }

    #[tokio::test]
    async fn follow_up_search_marks_source() {
        let r = retriever(CannedSearch {
            vector: Ok(vec![]),
            lexical: Ok(vec![hit(3, 0.4)]),
            delay: None,
        });
        let found = r
            .search_signal("Sullivan debt", Signal::Lexical, 5, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].source, ChunkSource::FollowUp);
        assert!((found[0].combined_score - 0.4).abs() < 1e-6);
    }
}
