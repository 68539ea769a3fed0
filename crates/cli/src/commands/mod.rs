pub mod assemble;
pub mod config_cmd;
pub mod inspect;
pub mod serve;

use lorekeeper_config::AppConfig;
use lorekeeper_context::{Collaborators, ContextEngine, EngineContext, EntityDetector};
use lorekeeper_core::error::ProviderError;
use lorekeeper_core::provider::Provider;
use lorekeeper_providers::OpenAiCompatProvider;
use lorekeeper_retrieval::{HashingEmbedder, InMemoryHistory, InMemorySearch, JsonFileRoster};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the config from `path`, or the default location, with env overrides.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides()?;
            Ok(config)
        }
        None => Ok(AppConfig::load()?),
    }
}

/// The roster file from the flag, falling back to `roster.path`.
pub fn roster_path(config: &AppConfig, flag: Option<PathBuf>) -> Option<PathBuf> {
    flag.or_else(|| config.roster.path.clone())
}

fn require_roster(config: &AppConfig, flag: Option<PathBuf>) -> CliResult<PathBuf> {
    let path = roster_path(config, flag).ok_or("no roster file: pass --roster or set roster.path")?;
    if !path.exists() {
        return Err(format!("roster file not found: {}", path.display()).into());
    }
    Ok(path)
}

/// Load an entity detector from the roster file.
pub async fn load_detector(config: &AppConfig, roster: Option<PathBuf>) -> CliResult<EntityDetector> {
    let path = require_roster(config, roster)?;
    let detector = EntityDetector::new();
    let report = detector.load(&JsonFileRoster::new(path)).await;
    if report.is_degraded() {
        warn!(errors = ?report.errors, "Roster partially loaded");
    }
    Ok(detector)
}

/// Build an engine over file-backed collaborators.
///
/// Search runs in memory over the history file, with hashed embeddings for
/// the vector signal. Without an API key the curator always falls back.
pub async fn build_engine(
    config: AppConfig,
    roster: Option<PathBuf>,
    history: Option<PathBuf>,
) -> CliResult<ContextEngine> {
    let roster_file = require_roster(&config, roster)?;
    let history_file = history
        .or_else(|| config.history.path.clone())
        .ok_or("no history file: pass --history or set history.path")?;

    let history = Arc::new(InMemoryHistory::from_json_file(&history_file)?);
    let search = InMemorySearch::with_embedder(Arc::new(HashingEmbedder::default()));
    search.insert_all(history.all_chunks().await).await?;

    let provider: Option<Arc<dyn Provider>> =
        match OpenAiCompatProvider::from_config(&config.provider) {
            Ok(provider) => Some(Arc::new(provider)),
            Err(ProviderError::NotConfigured(reason)) => {
                info!(reason = %reason, "No curator model available, using fallback curation");
                None
            }
            Err(e) => return Err(e.into()),
        };

    let collaborators = Collaborators {
        roster: Arc::new(JsonFileRoster::new(roster_file)),
        search: Arc::new(search),
        history,
        provider,
    };
    Ok(ContextEngine::start(EngineContext::new(config), collaborators).await)
}
