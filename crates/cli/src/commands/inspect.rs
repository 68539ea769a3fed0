//! `lorekeeper classify | detect | budget` — run one stage on its own.

use super::{CliResult, load_detector, roster_path};
use lorekeeper_config::AppConfig;
use lorekeeper_context::budget::compute_budget;
use lorekeeper_context::QueryClassifier;
use std::path::PathBuf;
use std::sync::Arc;

pub async fn classify(config: AppConfig, roster: Option<PathBuf>, input: &str) -> CliResult {
    let classifier = match roster_path(&config, roster) {
        Some(path) => QueryClassifier::new(Arc::new(load_detector(&config, Some(path)).await?)),
        None => QueryClassifier::without_entities(),
    };
    println!("{}", classifier.classify(input));
    Ok(())
}

pub async fn detect(config: AppConfig, roster: Option<PathBuf>, input: &str) -> CliResult {
    let detector = load_detector(&config, roster).await?;
    println!("{}", serde_json::to_string_pretty(&detector.detect(input))?);
    Ok(())
}

pub fn budget(config: AppConfig, window: Option<usize>, input: &str) -> CliResult {
    let window = window.unwrap_or(config.context_window);
    let outcome = compute_budget(input, window, &config.budget);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
