//! Lorekeeper CLI — the main entry point.
//!
//! Commands:
//! - `assemble` — Run a full turn over file-backed collaborators
//! - `classify` — Classify a query
//! - `detect`   — Detect roster entities in text
//! - `budget`   — Show the token budget for an input
//! - `config`   — Print the effective (or default) configuration
//! - `serve`    — Answer JSON-lines request envelopes on stdio

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "lorekeeper",
    about = "Lorekeeper — turn context assembly for interactive narrative engines",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.lorekeeper/config.toml)
    #[arg(short, long, global = true, env = "LOREKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble the context for one turn and print it as JSON
    Assemble {
        /// Session whose recent history forms the warm slice
        #[arg(short, long)]
        session: String,

        /// Roster file (overrides roster.path)
        #[arg(long)]
        roster: Option<PathBuf>,

        /// History file (overrides history.path)
        #[arg(long)]
        history: Option<PathBuf>,

        /// The user's input for this turn
        input: String,
    },

    /// Classify a query
    Classify {
        input: String,

        /// Roster file, enables character-name matching
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// Detect roster entities mentioned in text
    Detect {
        input: String,

        /// Roster file (overrides roster.path)
        #[arg(long)]
        roster: Option<PathBuf>,
    },

    /// Show the token budget for an input
    Budget {
        input: String,

        /// Override the context window size
        #[arg(short, long)]
        window: Option<usize>,
    },

    /// Print the configuration
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        default: bool,
    },

    /// Answer request envelopes, one JSON object per line, on stdin/stdout
    Serve {
        #[arg(long)]
        roster: Option<PathBuf>,

        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Assemble {
            session,
            roster,
            history,
            input,
        } => commands::assemble::run(config, roster, history, &session, &input).await?,
        Commands::Classify { input, roster } => {
            commands::inspect::classify(config, roster, &input).await?
        }
        Commands::Detect { input, roster } => {
            commands::inspect::detect(config, roster, &input).await?
        }
        Commands::Budget { input, window } => commands::inspect::budget(config, window, &input)?,
        Commands::Config { default } => commands::config_cmd::show(&config, default)?,
        Commands::Serve { roster, history } => {
            commands::serve::run(config, roster, history).await?
        }
    }

    Ok(())
}
