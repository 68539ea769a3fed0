//! `lorekeeper serve` — request envelopes in, response envelopes out.
//!
//! One JSON envelope per line on stdin; one reply per line on stdout, in
//! request order. Logs go to stderr.

use super::{CliResult, build_engine};
use lorekeeper_config::AppConfig;
use lorekeeper_context::ActionRegistry;
use lorekeeper_core::envelope::Envelope;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

pub async fn run(config: AppConfig, roster: Option<PathBuf>, history: Option<PathBuf>) -> CliResult {
    let engine = Arc::new(build_engine(config, roster, history).await?);
    let registry = ActionRegistry::with_defaults(engine);
    info!(actions = ?registry.names(), "Serving envelopes on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Envelope>(&line) {
            Ok(envelope) => registry.dispatch(envelope).await,
            Err(e) => Envelope::error("invalid", format!("unreadable envelope: {e}")),
        };
        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
