//! `lorekeeper assemble` — run one turn and print the payload.

use super::{CliResult, build_engine};
use lorekeeper_config::AppConfig;
use lorekeeper_core::message::SessionId;
use std::path::PathBuf;

pub async fn run(
    config: AppConfig,
    roster: Option<PathBuf>,
    history: Option<PathBuf>,
    session: &str,
    input: &str,
) -> CliResult {
    let engine = build_engine(config, roster, history).await?;
    let payload = engine
        .assemble_context(&SessionId::from(session), input)
        .await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
