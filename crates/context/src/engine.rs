//! The turn engine — assembles one [`ContextPayload`] per user turn.
//!
//! # Pipeline
//!
//! 1. Classify the input and detect entities (pure, no I/O)
//! 2. Compute the token budget
//! 3. Load the warm slice from recent history, trimmed to its share
//! 4. Run hybrid retrieval and curate the candidates to the augmentation share
//! 5. If the curator flagged a gap, run its follow-up queries in the budget
//!    it left; otherwise expand the warm slice into the slack
//! 6. Merge everything, with degradation notices, into the payload
//!
//! Turns for one session run strictly one after another. The whole turn is
//! bounded by `turn.deadline_ms`.

use crate::budget::{BudgetOutcome, TokenBudget, compute_budget};
use crate::classifier::{QueryClassification, QueryClassifier};
use crate::curator::{CurationDecision, LlmCurator};
use crate::entities::{EntityDetector, LoadReport};
use crate::warm_slice::{WarmSliceExpander, expand_within};
use chrono::Utc;
use lorekeeper_config::AppConfig;
use lorekeeper_core::chunk::{ChunkCandidate, ChunkId, ChunkRange};
use lorekeeper_core::entity::{EntityMatch, RosterSource};
use lorekeeper_core::error::SearchError;
use lorekeeper_core::event::{DomainEvent, EventBus};
use lorekeeper_core::history::HistoryStore;
use lorekeeper_core::message::SessionId;
use lorekeeper_core::provider::Provider;
use lorekeeper_core::search::{SearchService, Signal};
use lorekeeper_retrieval::{HybridRetriever, SignalWeights, policy_from_config};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Shared per-process state handed to the engine at construction.
#[derive(Clone)]
pub struct EngineContext {
    pub config: Arc<AppConfig>,
    pub events: Arc<EventBus>,
}

impl EngineContext {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            events: Arc::new(EventBus::default()),
        }
    }
}

/// The external services a turn reads from.
#[derive(Clone)]
pub struct Collaborators {
    pub roster: Arc<dyn RosterSource>,
    pub search: Arc<dyn SearchService>,
    pub history: Arc<dyn HistoryStore>,
    /// `None` runs every curation through the deterministic fallback
    pub provider: Option<Arc<dyn Provider>>,
}

/// A reduced-fidelity condition the turn continued through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    RosterPartiallyLoaded { errors: Vec<String> },
    SignalUnavailable { signal: Signal, reason: String },
    InputOverflow { input_tokens: usize, total_available: usize },
    HistoryUnavailable { reason: String },
}

impl Degradation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::RosterPartiallyLoaded { .. } => "roster_partially_loaded",
            Self::SignalUnavailable { .. } => "signal_unavailable",
            Self::InputOverflow { .. } => "input_overflow",
            Self::HistoryUnavailable { .. } => "history_unavailable",
        }
    }
}

/// Everything the generation step receives for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextPayload {
    pub classification: QueryClassification,
    pub entities: EntityMatch,
    pub warm_slice: Vec<ChunkCandidate>,
    pub augmentation: Vec<ChunkCandidate>,
    pub budget: TokenBudget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curator_reasoning: Option<String>,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
}

impl ContextPayload {
    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

/// A turn that produced no payload.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Turn exceeded its {deadline_ms}ms deadline")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(#[from] SearchError),
}

#[derive(Debug, Clone, Default)]
struct SessionRecord {
    budget: Option<TokenBudget>,
    curation: Option<CurationDecision>,
}

/// Assembles turn context for every session.
pub struct ContextEngine {
    ctx: EngineContext,
    detector: Arc<EntityDetector>,
    classifier: QueryClassifier,
    roster: Arc<dyn RosterSource>,
    history: Arc<dyn HistoryStore>,
    expander: WarmSliceExpander,
    retriever: HybridRetriever,
    curator: LlmCurator,
    weights: SignalWeights,
    session_locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
    records: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl ContextEngine {
    /// Build an engine with an empty entity table.
    /// Call [`reload_roster`](Self::reload_roster) before the first turn.
    pub fn new(ctx: EngineContext, collaborators: Collaborators) -> Self {
        let config = ctx.config.clone();
        let detector = Arc::new(EntityDetector::new());
        let classifier = QueryClassifier::new(detector.clone());
        let retriever = HybridRetriever::from_config(
            collaborators.search,
            policy_from_config(&config.retrieval.temporal),
            &config.retrieval,
        );
        let curator = match collaborators.provider {
            Some(provider) => LlmCurator::new(provider, config.curator.clone()),
            None => LlmCurator::fallback_only(config.curator.clone()),
        };

        Self {
            detector,
            classifier,
            roster: collaborators.roster,
            expander: WarmSliceExpander::new(collaborators.history.clone()),
            history: collaborators.history,
            retriever,
            curator,
            weights: SignalWeights::from_config(&config.retrieval),
            session_locks: Mutex::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            ctx,
        }
    }

    /// Build an engine and load the roster.
    pub async fn start(ctx: EngineContext, collaborators: Collaborators) -> Self {
        let engine = Self::new(ctx, collaborators);
        engine.reload_roster().await;
        engine
    }

    /// Replace the classifier (e.g. a custom layer order).
    pub fn with_classifier(mut self, classifier: QueryClassifier) -> Self {
        self.classifier = classifier.with_entities(self.detector.clone());
        self
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.ctx.events
    }

    /// Rebuild the entity table from the roster source.
    pub async fn reload_roster(&self) -> LoadReport {
        let report = self.detector.load(self.roster.as_ref()).await;
        self.ctx.events.publish(DomainEvent::RosterReloaded {
            characters: report.characters,
            places: report.places,
            factions: report.factions,
            errors: report.errors.len(),
            timestamp: Utc::now(),
        });
        report
    }

    pub fn classify(&self, text: &str) -> QueryClassification {
        self.classifier.classify(text)
    }

    pub fn detect_entities(&self, text: &str) -> EntityMatch {
        self.detector.detect(text)
    }

    /// The budget computed for the session's last turn.
    pub fn last_budget_breakdown(&self, session_id: &SessionId) -> Option<TokenBudget> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(|r| r.budget)
    }

    /// The curation decision from the session's last turn.
    pub fn last_curation_decision(&self, session_id: &SessionId) -> Option<CurationDecision> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(|r| r.curation.clone())
    }

    /// Assemble the context for one turn.
    ///
    /// A second call for the same session waits until the first finishes.
    pub async fn assemble_context(
        &self,
        session_id: &SessionId,
        user_input: &str,
    ) -> Result<ContextPayload, TurnError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _turn = lock.lock().await;
            self.run_locked(session_id, user_input).await
        };
        drop(lock);
        self.release_session_lock(session_id);
        result
    }

    async fn run_locked(
        &self,
        session_id: &SessionId,
        user_input: &str,
    ) -> Result<ContextPayload, TurnError> {
        let started = Instant::now();
        self.ctx.events.publish(DomainEvent::TurnStarted {
            session_id: session_id.to_string(),
            input_preview: user_input.chars().take(80).collect(),
            timestamp: Utc::now(),
        });
        info!(session_id = %session_id, input_len = user_input.len(), "Turn started");

        let deadline_ms = self.ctx.config.turn.deadline_ms;
        let result = match tokio::time::timeout(
            Duration::from_millis(deadline_ms),
            self.run_turn(session_id, user_input),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TurnError::DeadlineExceeded { deadline_ms }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(payload) => {
                self.ctx.events.publish(DomainEvent::TurnCompleted {
                    session_id: session_id.to_string(),
                    warm_chunks: payload.warm_slice.len(),
                    augmentation_chunks: payload.augmentation.len(),
                    elapsed_ms,
                    timestamp: Utc::now(),
                });
                info!(
                    session_id = %session_id,
                    classification = %payload.classification,
                    entities = payload.entities.len(),
                    warm_chunks = payload.warm_slice.len(),
                    augmentation_chunks = payload.augmentation.len(),
                    degradations = payload.degradations.len(),
                    elapsed_ms,
                    "Turn complete"
                );
            }
            Err(e) => {
                self.ctx.events.publish(DomainEvent::TurnFailed {
                    session_id: session_id.to_string(),
                    error_message: e.to_string(),
                    timestamp: Utc::now(),
                });
                warn!(session_id = %session_id, error = %e, elapsed_ms, "Turn failed");
            }
        }
        result
    }

    fn session_lock(&self, session_id: &SessionId) -> Arc<tokio::sync::Mutex<()>> {
        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    /// Forget the session's lock once no turn holds or awaits it.
    fn release_session_lock(&self, session_id: &SessionId) {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }

    #[cfg(test)]
    fn tracked_sessions(&self) -> usize {
        self.session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn record(&self, session_id: &SessionId, update: impl FnOnce(&mut SessionRecord)) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        update(records.entry(session_id.clone()).or_default());
    }

    async fn run_turn(
        &self,
        session_id: &SessionId,
        user_input: &str,
    ) -> Result<ContextPayload, TurnError> {
        let config = &self.ctx.config;
        let mut degradations = Vec::new();

        // 1. Classification and entities
        let classification = self.classifier.classify(user_input);
        let entities = self.detector.detect(user_input);
        if self.detector.is_degraded() {
            degradations.push(Degradation::RosterPartiallyLoaded {
                errors: self.detector.load_errors(),
            });
        }

        // 2. Budget
        let outcome: BudgetOutcome =
            compute_budget(user_input, config.context_window, &config.budget);
        let budget = outcome.budget;
        if let Some(overflow) = outcome.input_overflow {
            degradations.push(Degradation::InputOverflow {
                input_tokens: overflow.input_tokens,
                total_available: overflow.total_available,
            });
        }
        self.record(session_id, |r| {
            r.budget = Some(budget);
            r.curation = None;
        });
        self.ctx.events.publish(DomainEvent::BudgetComputed {
            session_id: session_id.to_string(),
            total_available: budget.total_available,
            warm_slice: budget.warm_slice,
            structured: budget.structured,
            augmentation: budget.augmentation,
            timestamp: Utc::now(),
        });

        // 3. Warm slice
        let recent_range = match self.history.recent_range(session_id).await {
            Ok(range) => Some(range),
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Recent history unavailable");
                degradations.push(Degradation::HistoryUnavailable {
                    reason: e.to_string(),
                });
                None
            }
        };
        let mut warm_slice = match recent_range {
            Some(range) => self.expander.fetch_range(range).await,
            None => Vec::new(),
        };
        trim_oldest_to_budget(&mut warm_slice, budget.warm_slice);
        let newest_chunk = recent_range.map(|r| r.end);

        // 4. Retrieval and curation
        let mut augmentation = Vec::new();
        let mut decision = None;
        if budget.augmentation > 0 {
            let retrieval = self
                .retriever
                .retrieve(user_input, self.weights, newest_chunk)
                .await?;
            for (signal, reason) in retrieval.unavailable {
                degradations.push(Degradation::SignalUnavailable { signal, reason });
            }

            let warm_ids: HashSet<ChunkId> = warm_slice.iter().map(|c| c.chunk_id).collect();
            let candidates: Vec<ChunkCandidate> = retrieval
                .candidates
                .into_iter()
                .filter(|c| !warm_ids.contains(&c.chunk_id))
                .collect();

            let recent_context = warm_slice
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            let curation_started = Instant::now();
            let curated = self
                .curator
                .curate(user_input, &candidates, &recent_context, budget.augmentation)
                .await;
            let mode = if curated.is_fallback() { "fallback" } else { "llm" };
            self.ctx.events.publish(DomainEvent::CurationCompleted {
                session_id: session_id.to_string(),
                mode: mode.into(),
                kept: curated.kept_chunk_ids.len(),
                additional_queries: curated.additional_queries.len(),
                elapsed_ms: curation_started.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            });

            let mut by_id: HashMap<ChunkId, ChunkCandidate> =
                candidates.into_iter().map(|c| (c.chunk_id, c)).collect();
            augmentation = curated
                .kept_chunk_ids
                .iter()
                .filter_map(|id| by_id.remove(id))
                .collect();
            decision = Some(curated);
        }

        // 5. Fill the remaining budget
        if let Some(d) = decision.as_ref().filter(|d| d.has_gap()) {
            self.run_follow_ups(d, &warm_slice, &mut augmentation, budget, newest_chunk)
                .await;
        } else if let Some(newest) = newest_chunk {
            self.expand_warm_slice(newest, &mut warm_slice, &augmentation, budget)
                .await;
        }

        let curator_reasoning = decision.as_ref().and_then(|d| d.reasoning.clone());
        self.record(session_id, |r| r.curation = decision);

        if !degradations.is_empty() {
            let reasons: Vec<String> = degradations.iter().map(|d| d.label().to_string()).collect();
            warn!(session_id = %session_id, reasons = ?reasons, "Turn degraded");
            self.ctx.events.publish(DomainEvent::TurnDegraded {
                session_id: session_id.to_string(),
                reasons,
                timestamp: Utc::now(),
            });
        }

        Ok(ContextPayload {
            classification,
            entities,
            warm_slice,
            augmentation,
            budget,
            curator_reasoning,
            degradations,
        })
    }

    /// Run the curator's follow-up queries into the augmentation budget it left.
    async fn run_follow_ups(
        &self,
        decision: &CurationDecision,
        warm_slice: &[ChunkCandidate],
        augmentation: &mut Vec<ChunkCandidate>,
        budget: TokenBudget,
        newest_chunk: Option<ChunkId>,
    ) {
        let mut used: usize = augmentation.iter().map(|c| c.token_count).sum();
        let mut present: HashSet<ChunkId> = warm_slice
            .iter()
            .chain(augmentation.iter())
            .map(|c| c.chunk_id)
            .collect();
        let k = self.ctx.config.retrieval.top_k;

        for query in &decision.additional_queries {
            let found = match self
                .retriever
                .search_signal(&query.query_text, query.kind, k, newest_chunk)
                .await
            {
                Ok(found) => found,
                Err(e) => {
                    warn!(signal = %query.kind, error = %e, "Follow-up query failed, skipping");
                    continue;
                }
            };
            let mut added = 0usize;
            for candidate in found {
                if present.contains(&candidate.chunk_id)
                    || used + candidate.token_count > budget.augmentation
                {
                    continue;
                }
                used += candidate.token_count;
                present.insert(candidate.chunk_id);
                augmentation.push(candidate);
                added += 1;
            }
            debug!(signal = %query.kind, added, used, "Follow-up query applied");
        }
    }

    /// Extend the warm slice into budget nobody else used.
    ///
    /// Growth starts from the chunks the slice holds after trimming, and each
    /// side stops at the first chunk it cannot take so the slice stays
    /// contiguous.
    async fn expand_warm_slice(
        &self,
        newest: ChunkId,
        warm_slice: &mut Vec<ChunkCandidate>,
        augmentation: &[ChunkCandidate],
        budget: TokenBudget,
    ) {
        // An empty slice grows backward from just past the newest chunk
        let current = match (warm_slice.first(), warm_slice.last()) {
            (Some(first), Some(last)) => ChunkRange::new(first.chunk_id, last.chunk_id),
            _ => ChunkRange::new(newest.saturating_add(1), newest),
        };
        let warm_used: usize = warm_slice.iter().map(|c| c.token_count).sum();
        let aug_used: usize = augmentation.iter().map(|c| c.token_count).sum();
        let slack = budget.warm_slice.saturating_sub(warm_used)
            + budget.augmentation.saturating_sub(aug_used);

        let avg = if warm_slice.is_empty() {
            self.ctx.config.warm_slice.default_avg_tokens_per_chunk
        } else {
            (warm_used / warm_slice.len()).max(1)
        };

        // The session's newest chunk is the newest of the story
        let bounds = ChunkRange::new(1, newest.max(current.end));
        let plan = expand_within(current, slack, avg, bounds);
        if plan.is_noop() {
            debug!(reason = plan.reason.as_deref().unwrap_or(""), "Warm slice not expanded");
            return;
        }

        let taken: HashSet<ChunkId> = augmentation.iter().map(|c| c.chunk_id).collect();
        let mut next_back = current.start.checked_sub(1);
        let mut next_forward = current.end.checked_add(1);
        let mut used = 0usize;
        for chunk in self.expander.fetch(&plan).await {
            let backward = chunk.chunk_id < current.start;
            let next = if backward { &mut next_back } else { &mut next_forward };
            let fits = *next == Some(chunk.chunk_id)
                && !taken.contains(&chunk.chunk_id)
                && used + chunk.token_count <= slack;
            if !fits {
                *next = None;
                continue;
            }
            used += chunk.token_count;
            *next = if backward {
                chunk.chunk_id.checked_sub(1)
            } else {
                chunk.chunk_id.checked_add(1)
            };
            warm_slice.push(chunk);
        }
        warm_slice.sort_by_key(|c| c.chunk_id);
        debug!(slack, used, chunks = warm_slice.len(), "Warm slice expanded");
    }
}

/// Drop the oldest chunks until the slice fits `limit` tokens.
fn trim_oldest_to_budget(slice: &mut Vec<ChunkCandidate>, limit: usize) {
    let mut total: usize = slice.iter().map(|c| c.token_count).sum();
    let mut drop = 0;
    while total > limit && drop < slice.len() {
        total -= slice[drop].token_count;
        drop += 1;
    }
    if drop > 0 {
        debug!(dropped = drop, limit, "Warm slice trimmed to budget");
        slice.drain(..drop);
    }
}
