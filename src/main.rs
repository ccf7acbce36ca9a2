use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{CollectCommand, ConfigCommand, HistoryCommand, SyncCommand, TreeCommand};
use rubber_sync::config::Config;
use rubber_sync::db::LocalStore;
use rubber_sync::sync::try_auto_sync;

#[derive(Parser)]
#[command(name = "rubber")]
#[command(version)]
#[command(about = "Offline-first rubber tapping records", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register and browse trees
    Tree(TreeCommand),

    /// Record a tapping
    Collect(CollectCommand),

    /// Show a tree's collection history
    History(HistoryCommand),

    /// Sync with the authority
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rubber_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    let Some(command) = cli.command else {
        println!("Use --help to see available commands");
        return Ok(());
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config);
    }

    let store = LocalStore::open(&config.database_path.value).await?;

    // `sync` runs its own sequence; everything else gets the startup trigger.
    if !matches!(command, Commands::Sync(_)) {
        try_auto_sync(&config, &store).await;
    }

    match command {
        Commands::Tree(cmd) => cmd.run(&store).await?,
        Commands::Collect(cmd) => cmd.run(&store).await?,
        Commands::History(cmd) => cmd.run(&store).await?,
        Commands::Sync(cmd) => cmd.run(&store, &config).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
