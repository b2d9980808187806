mod cmd;
mod output;
mod session;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use reinforce_core::QueueKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "reinforce",
    about = "Inspect and maintain the local reinforcement sync store",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the sync store
    #[arg(long, global = true, env = "REINFORCE_DB", default_value = "reinforce.redb")]
    db: PathBuf,

    /// Sync configuration file (YAML; missing file means defaults)
    #[arg(long, global = true, env = "REINFORCE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log sync decisions at debug level
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue and cartridge state with their sync predicates
    Status,

    /// List records waiting in a queue
    Pending {
        /// Queue: track or report
        kind: QueueKind,

        /// Show at most this many records
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Append a tracked action to the Track queue (no network)
    Track {
        action_id: String,

        /// Metadata entry, repeatable: --meta key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Change the batch size that triggers a queue sync
    BatchSize {
        /// Queue: track or report
        kind: QueueKind,
        size: usize,
    },

    /// Drop every queued action, cached decision and sync timestamp
    Erase {
        /// Required; erase is not reversible
        #[arg(long)]
        yes: bool,
    },

    /// Show, validate or write the sync configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let paths = session::Paths {
        db: cli.db,
        config: cli.config,
    };

    let result = match cli.command {
        Commands::Status => cmd::status::run(&paths, cli.json),
        Commands::Pending { kind, limit } => cmd::pending::run(&paths, kind, limit, cli.json),
        Commands::Track { action_id, meta } => cmd::track::run(&paths, &action_id, &meta, cli.json),
        Commands::BatchSize { kind, size } => cmd::batch_size::run(&paths, kind, size, cli.json),
        Commands::Erase { yes } => cmd::erase::run(&paths, yes, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&paths, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
