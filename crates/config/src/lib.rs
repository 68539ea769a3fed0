//! Configuration loading, validation, and management for Lorekeeper.
//!
//! Loads configuration from `~/.lorekeeper/config.toml` (or an explicit
//! path) with environment variable overrides. Validates all settings at
//! startup: a bad ratio range or weight is fatal before any turn runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.lorekeeper/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Size of the downstream generator's context window, in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Ratio ranges for the per-turn budget split
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Hybrid retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Warm slice settings
    #[serde(default)]
    pub warm_slice: WarmSliceConfig,

    /// LLM curator settings
    #[serde(default)]
    pub curator: CuratorConfig,

    /// Whole-turn settings
    #[serde(default)]
    pub turn: TurnConfig,

    /// LLM inference endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Entity roster source
    #[serde(default)]
    pub roster: RosterConfig,

    /// Narrative history source
    #[serde(default)]
    pub history: HistoryConfig,
}

fn default_context_window() -> usize {
    100_000
}

/// A min/max share of the available context, as fractions in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioRange {
    pub min: f64,
    pub max: f64,
}

impl RatioRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min) || !(0.0..=1.0).contains(&self.max) {
            return Err(ConfigError::ValidationError(format!(
                "budget.{name} bounds must be within 0.0..=1.0"
            )));
        }
        if self.min > self.max {
            return Err(ConfigError::ValidationError(format!(
                "budget.{name}.min must not exceed budget.{name}.max"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_warm_ratio")]
    pub warm_slice: RatioRange,

    #[serde(default = "default_structured_ratio")]
    pub structured: RatioRange,

    #[serde(default = "default_augmentation_ratio")]
    pub augmentation: RatioRange,
}

fn default_warm_ratio() -> RatioRange {
    RatioRange::new(0.30, 0.50)
}
fn default_structured_ratio() -> RatioRange {
    RatioRange::new(0.05, 0.15)
}
fn default_augmentation_ratio() -> RatioRange {
    RatioRange::new(0.35, 0.55)
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            warm_slice: default_warm_ratio(),
            structured: default_structured_ratio(),
            augmentation: default_augmentation_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_text_weight")]
    pub text_weight: f32,

    /// Hits requested from each signal
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_signal_timeout_ms")]
    pub signal_timeout_ms: u64,

    #[serde(default)]
    pub temporal: TemporalConfig,
}

fn default_vector_weight() -> f32 {
    0.7
}
fn default_text_weight() -> f32 {
    0.3
}
fn default_top_k() -> usize {
    20
}
fn default_signal_timeout_ms() -> u64 {
    5_000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            text_weight: default_text_weight(),
            top_k: default_top_k(),
            signal_timeout_ms: default_signal_timeout_ms(),
            temporal: TemporalConfig::default(),
        }
    }
}

/// Which temporal scoring policy the combiner uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStrategy {
    /// Discrete recency tiers with fixed boosts
    #[default]
    Categorical,
    /// Smooth half-life decay blended by `temporal_boost_factor`
    Continuous,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalConfig {
    #[serde(default)]
    pub strategy: TemporalStrategy,

    /// 0 ignores recency, 1 lets recency dominate (continuous only)
    #[serde(default = "default_temporal_boost_factor")]
    pub temporal_boost_factor: f32,

    /// Chunk distance at which the continuous decay reaches 0.5
    #[serde(default = "default_half_life_chunks")]
    pub half_life_chunks: f32,

    /// Chunks from the newest that count as "immediate" (categorical)
    #[serde(default = "default_immediate_window")]
    pub immediate_window: u64,

    /// Chunks from the newest that count as "recent" (categorical)
    #[serde(default = "default_recent_window")]
    pub recent_window: u64,

    #[serde(default = "default_immediate_boost")]
    pub immediate_boost: f32,

    #[serde(default = "default_recent_boost")]
    pub recent_boost: f32,
}

fn default_temporal_boost_factor() -> f32 {
    0.3
}
fn default_half_life_chunks() -> f32 {
    200.0
}
fn default_immediate_window() -> u64 {
    20
}
fn default_recent_window() -> u64 {
    100
}
fn default_immediate_boost() -> f32 {
    0.15
}
fn default_recent_boost() -> f32 {
    0.05
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            strategy: TemporalStrategy::default(),
            temporal_boost_factor: default_temporal_boost_factor(),
            half_life_chunks: default_half_life_chunks(),
            immediate_window: default_immediate_window(),
            recent_window: default_recent_window(),
            immediate_boost: default_immediate_boost(),
            recent_boost: default_recent_boost(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmSliceConfig {
    /// Used for expansion when the warm slice itself is empty
    #[serde(default = "default_avg_tokens_per_chunk")]
    pub default_avg_tokens_per_chunk: usize,
}

fn default_avg_tokens_per_chunk() -> usize {
    400
}

impl Default for WarmSliceConfig {
    fn default() -> Self {
        Self {
            default_avg_tokens_per_chunk: default_avg_tokens_per_chunk(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuratorConfig {
    /// When false every turn uses the deterministic fallback
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_curator_model")]
    pub model: String,

    #[serde(default = "default_curator_temperature")]
    pub temperature: f32,

    #[serde(default = "default_curator_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_curator_timeout_ms")]
    pub timeout_ms: u64,

    /// Candidates shown to the model per call
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Characters of chunk text shown per candidate
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    #[serde(default = "default_max_additional_queries")]
    pub max_additional_queries: usize,

    /// Share of the augmentation budget the fallback may fill
    #[serde(default = "default_fallback_budget_fraction")]
    pub fallback_budget_fraction: f64,
}

fn default_true() -> bool {
    true
}
fn default_curator_model() -> String {
    "gpt-4o-mini".into()
}
fn default_curator_temperature() -> f32 {
    0.2
}
fn default_curator_max_tokens() -> u32 {
    1024
}
fn default_curator_timeout_ms() -> u64 {
    15_000
}
fn default_max_candidates() -> usize {
    30
}
fn default_preview_chars() -> usize {
    300
}
fn default_max_additional_queries() -> usize {
    3
}
fn default_fallback_budget_fraction() -> f64 {
    0.6
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_curator_model(),
            temperature: default_curator_temperature(),
            max_tokens: default_curator_max_tokens(),
            timeout_ms: default_curator_timeout_ms(),
            max_candidates: default_max_candidates(),
            preview_chars: default_preview_chars(),
            max_additional_queries: default_max_additional_queries(),
            fallback_budget_fraction: default_fallback_budget_fraction(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Whole-turn deadline
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_deadline_ms() -> u64 {
    60_000
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterConfig {
    /// JSON roster file (`{characters, places, factions}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// JSON history file (`{chunks, sessions}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Priority: env vars > config file > defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `LOREKEEPER_*` environment overrides, then re-validate.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("LOREKEEPER_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("LOREKEEPER_MODEL") {
            self.curator.model = model;
        }

        if let Ok(window) = std::env::var("LOREKEEPER_CONTEXT_WINDOW") {
            self.context_window = window.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "LOREKEEPER_CONTEXT_WINDOW is not a token count: {window}"
                ))
            })?;
        }

        self.validate()
    }

    /// Config directory: `~/.lorekeeper/`
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".lorekeeper")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "context_window must be > 0".into(),
            ));
        }

        self.budget.warm_slice.validate("warm_slice")?;
        self.budget.structured.validate("structured")?;
        self.budget.augmentation.validate("augmentation")?;
        let min_sum =
            self.budget.warm_slice.min + self.budget.structured.min + self.budget.augmentation.min;
        if min_sum > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "budget minimums sum to {min_sum:.2}, which exceeds 1.0"
            )));
        }

        let r = &self.retrieval;
        if r.vector_weight < 0.0 || r.text_weight < 0.0 {
            return Err(ConfigError::ValidationError(
                "retrieval weights must be non-negative".into(),
            ));
        }
        if r.vector_weight + r.text_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "vector_weight + text_weight must be > 0".into(),
            ));
        }
        if r.top_k == 0 {
            return Err(ConfigError::ValidationError(
                "retrieval.top_k must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.temporal.temporal_boost_factor) {
            return Err(ConfigError::ValidationError(
                "temporal_boost_factor must be between 0.0 and 1.0".into(),
            ));
        }
        if r.temporal.half_life_chunks <= 0.0 {
            return Err(ConfigError::ValidationError(
                "half_life_chunks must be > 0".into(),
            ));
        }
        if r.temporal.immediate_window > r.temporal.recent_window {
            return Err(ConfigError::ValidationError(
                "immediate_window must not exceed recent_window".into(),
            ));
        }

        if self.warm_slice.default_avg_tokens_per_chunk == 0 {
            return Err(ConfigError::ValidationError(
                "warm_slice.default_avg_tokens_per_chunk must be > 0".into(),
            ));
        }

        let c = &self.curator;
        if c.temperature < 0.0 || c.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "curator.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if c.fallback_budget_fraction <= 0.0 || c.fallback_budget_fraction > 1.0 {
            return Err(ConfigError::ValidationError(
                "curator.fallback_budget_fraction must be in (0.0, 1.0]".into(),
            ));
        }
        if c.max_candidates == 0 {
            return Err(ConfigError::ValidationError(
                "curator.max_candidates must be > 0".into(),
            ));
        }

        if self.turn.deadline_ms == 0 {
            return Err(ConfigError::ValidationError(
                "turn.deadline_ms must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            budget: BudgetConfig::default(),
            retrieval: RetrievalConfig::default(),
            warm_slice: WarmSliceConfig::default(),
            curator: CuratorConfig::default(),
            turn: TurnConfig::default(),
            provider: ProviderConfig::default(),
            roster: RosterConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.context_window, 100_000);
        assert_eq!(config.budget.warm_slice, RatioRange::new(0.30, 0.50));
        assert!((config.curator.fallback_budget_fraction - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.context_window, config.context_window);
        assert_eq!(parsed.budget.augmentation, config.budget.augmentation);
        assert_eq!(parsed.retrieval.temporal.strategy, TemporalStrategy::Categorical);
    }

    #[test]
    fn inverted_ratio_range_rejected() {
        let mut config = AppConfig::default();
        config.budget.structured = RatioRange::new(0.2, 0.1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("structured"));
    }

    #[test]
    fn minimums_over_one_rejected() {
        let mut config = AppConfig::default();
        config.budget.warm_slice = RatioRange::new(0.6, 0.7);
        config.budget.augmentation = RatioRange::new(0.5, 0.6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn boost_factor_out_of_range_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.temporal.temporal_boost_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_weights_rejected() {
        let mut config = AppConfig::default();
        config.retrieval.vector_weight = 0.0;
        config.retrieval.text_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn fallback_fraction_must_be_positive() {
        let mut config = AppConfig::default();
        config.curator.fallback_budget_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.context_window, 100_000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
context_window = 32000

[retrieval.temporal]
strategy = "continuous"
temporal_boost_factor = 0.5

[curator]
enabled = false
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.context_window, 32_000);
        assert_eq!(config.retrieval.temporal.strategy, TemporalStrategy::Continuous);
        assert!((config.retrieval.temporal.temporal_boost_factor - 0.5).abs() < f32::EPSILON);
        assert!(!config.curator.enabled);
        assert_eq!(config.curator.max_candidates, 30);
        assert_eq!(config.budget.structured, RatioRange::new(0.05, 0.15));
    }

    #[test]
    fn invalid_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "context_window = \"lots\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn api_key_redacted_in_debug() {
        let provider = ProviderConfig {
            api_url: default_api_url(),
            api_key: Some("sk-secret".into()),
        };
        let debug = format!("{provider:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("context_window"));
        assert!(toml_str.contains("fallback_budget_fraction"));
    }
}
