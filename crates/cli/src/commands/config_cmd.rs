//! `lorekeeper config` — print the configuration as TOML.

use super::CliResult;
use lorekeeper_config::AppConfig;

pub fn show(config: &AppConfig, default: bool) -> CliResult {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("[REDACTED]".into());
    }
    print!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
