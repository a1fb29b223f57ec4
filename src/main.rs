// ABOUTME: CLI entry point for mysql-syncer
// ABOUTME: Parses commands and routes to appropriate handlers

use clap::{Parser, Subcommand};
use mysql_syncer::commands;
use mysql_syncer::commands::bench::BenchArgs;
use mysql_syncer::commands::ConfigArgs;

#[derive(Parser)]
#[command(name = "mysql-syncer")]
#[command(about = "Hash-based MySQL master-to-slave table synchronizer", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make the slave's tables match the master's
    Sync {
        #[command(flatten)]
        config: ConfigArgs,
        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check configuration and connectivity, and print the sync plan
    Validate {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Benchmark VARCHAR against TEXT log tables
    Bench(BenchArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Sync { config, json } => commands::sync(&config, json).await,
        Commands::Validate { config } => commands::validate(&config).await,
        Commands::Bench(args) => commands::bench(&args).await,
    }
}
