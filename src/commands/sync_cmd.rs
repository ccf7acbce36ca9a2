//! Sync CLI commands for exchanging records with the authority.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand};

use rubber_sync::config::Config;
use rubber_sync::db::LocalStore;
use rubber_sync::sync::{
    Connectivity, ConnectivityMonitor, HealthProbe, HttpTransport, PullOutcome, PushOutcome,
    SequenceOutcome, StaticConnectivity, SyncError, SyncOrchestrator, SyncTransport,
};

/// Sync with the authority
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Send pending records only
    Push,
    /// Fetch and merge the authority's records only
    Pull,
    /// Show pending counts and server status
    Status,
    /// Stay running and sync every time the server becomes reachable
    Watch,
}

impl SyncCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(store, config).await,
            Some(SyncSubcommand::Push) => self.push(store, config).await,
            Some(SyncSubcommand::Pull) => self.pull(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
            Some(SyncSubcommand::Watch) => self.watch(store, config).await,
        }
    }

    async fn sync(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (transport, connectivity) = connect(config).await?;
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, connectivity);

        println!("Syncing with server...");
        println!();

        match orchestrator.on_startup().await {
            SequenceOutcome::Completed(report) => {
                println!("  pull: {}", report.pull);
                println!("  push: {}", report.push);
                println!();
                let failed = matches!(report.push, PushOutcome::Failed(_))
                    || matches!(report.pull, PullOutcome::Failed(_));
                if failed {
                    return Err("Sync incomplete; pending records will be retried".into());
                }
                println!("Sync complete.");
            }
            SequenceOutcome::Skipped => println!("Another sync is already running."),
        }
        Ok(())
    }

    async fn push(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (transport, connectivity) = connect(config).await?;
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, connectivity);
        let outcome = orchestrator.pusher().try_push().await?;
        println!("Push: {}", outcome);
        Ok(())
    }

    async fn pull(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (transport, connectivity) = connect(config).await?;
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, connectivity);
        let outcome = orchestrator.puller().try_pull().await?;
        println!("Pull: {}", outcome);
        Ok(())
    }

    async fn status(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (sites, observations) = store.pending_counts().await?;

        println!("Sync Status");
        println!("===========");
        println!();
        println!("Pending trees:       {}", sites);
        println!("Pending collections: {}", observations);
        println!();

        if !config.sync.is_configured() {
            println!("Server: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  RUBBER_SYNC_URL");
            println!("  RUBBER_SYNC_API_KEY");
            return Ok(());
        }

        let transport = HttpTransport::from_config(&config.sync)?;
        println!("Server:    {}", transport.base_url());
        match &config.sync.api_key {
            Some(key) => println!("API Key:   {}...", key.chars().take(8).collect::<String>()),
            None => println!("API Key:   (none)"),
        }
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        print!("Server status: ");
        match transport.health().await {
            Ok(()) => println!("✓ reachable"),
            Err(SyncError::Transport(_)) => println!("✗ unreachable"),
            Err(e) => println!("✗ error: {}", e),
        }

        Ok(())
    }

    async fn watch(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::from_config(&config.sync)?);
        let monitor = ConnectivityMonitor::new(false);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            transport.clone(),
            Arc::new(monitor.clone()),
        ));

        let interval = Duration::from_secs(config.sync.probe_interval_secs.max(1));
        println!(
            "Watching for connectivity every {}s. Press Ctrl-C to stop.",
            interval.as_secs()
        );

        let listener = tokio::spawn(orchestrator.run(monitor.subscribe()));
        let probe = HealthProbe::new(transport, monitor, interval);

        tokio::select! {
            _ = probe.run() => {}
            result = tokio::signal::ctrl_c() => result?,
        }

        listener.abort();
        println!("Stopped.");
        Ok(())
    }
}

/// Builds the transport and probes the server once so push and pull see
/// the real connectivity.
async fn connect(
    config: &Config,
) -> Result<(Arc<dyn SyncTransport>, Arc<dyn Connectivity>), SyncError> {
    let transport = HttpTransport::from_config(&config.sync)?;
    let online = match transport.health().await {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Server unreachable ({}); working offline.", e);
            false
        }
    };
    Ok((Arc::new(transport), Arc::new(StaticConnectivity(online))))
}
