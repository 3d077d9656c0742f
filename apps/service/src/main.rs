use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use netprobe::config::Config;
use netprobe::database::{Database, DatabaseImpl, initialize_database};
use netprobe::orchestrator::{DigestOutcome, Orchestrator};
use netprobe::pool::{LibsqlPool, open_pool};
use netprobe::report::ReportingAggregator;

#[derive(Parser)]
#[command(author, version, about = "Schedule ping measurements against the node fleet and report on their health")]
struct Cli {
    /// Config file; defaults to ~/.config/netprobe/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run measurement cycles and digests until interrupted
    Run,
    /// Run a single measurement cycle
    Cycle,
    /// Refresh the node inventory from the directory
    Sync,
    /// Build the digest for the report window
    Digest {
        /// Deliver it through the email channel as well
        #[arg(long)]
        send: bool,
    },
    /// List nodes with failing measurements
    Failing {
        #[arg(long, default_value_t = 24)]
        hours: u64,
    },
    /// List the node inventory
    Nodes,
    /// List stored measurements, newest first
    Measurements {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show one measurement
    Show { id: String },
    /// Print the effective configuration
    Config,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Cancel `token` on the first Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current step");
            token.cancel();
        }
    });
}

async fn connect(config: &Config) -> Result<LibsqlPool> {
    open_pool(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database at {}", config.database.path))
}

/// Store handle for the read-only queries
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    let pool = connect(config).await?;
    let conn = pool.get().await?;
    initialize_database(&conn).await?;
    drop(conn);
    Ok(Arc::new(DatabaseImpl::new_from_pool(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())?;
    logger::init_with_level(&config.logging.level);

    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Config => {
            print!("{}", config);
        }
        Commands::Run => {
            let pool = connect(&config).await?;
            cancel_on_interrupt(cancel.clone());
            Orchestrator::start(config, pool, cancel).await?;
        }
        Commands::Cycle => {
            let pool = connect(&config).await?;
            let orchestrator = Orchestrator::from_config(&config, pool).await?;
            cancel_on_interrupt(cancel.clone());
            let report = orchestrator.run_cycle(&cancel).await.context("measurement cycle abandoned")?;
            print_json(&report)?;
        }
        Commands::Sync => {
            let pool = connect(&config).await?;
            let orchestrator = Orchestrator::from_config(&config, pool).await?;
            let nodes = orchestrator.runner().registry().sync().await?;
            info!("Synced {} nodes", nodes.len());
            print_json(&nodes)?;
        }
        Commands::Digest { send: true } => {
            let pool = connect(&config).await?;
            let orchestrator = Orchestrator::from_config(&config, pool).await?;
            match orchestrator.send_digest().await? {
                DigestOutcome::Sent(report) => print_json(&report)?,
                DigestOutcome::Skipped(report) => {
                    warn!("Email channel not configured, digest was not sent");
                    print_json(&report)?
                }
                DigestOutcome::Failed(report) => {
                    print_json(&report)?;
                    anyhow::bail!("digest delivery failed");
                }
            }
        }
        Commands::Digest { send: false } => {
            let database = open_database(&config).await?;
            let report = ReportingAggregator::new(database).report(config.schedule.report_window).await?;
            print_json(&report)?;
        }
        Commands::Failing { hours } => {
            let database = open_database(&config).await?;
            let window = Duration::from_secs(hours.saturating_mul(3600));
            print_json(&ReportingAggregator::new(database).failing_nodes(window).await?)?;
        }
        Commands::Nodes => {
            let database = open_database(&config).await?;
            print_json(&database.list_nodes().await?)?;
        }
        Commands::Measurements { limit, offset } => {
            let database = open_database(&config).await?;
            print_json(&database.list_measurements(limit, offset).await?)?;
        }
        Commands::Show { id } => {
            let database = open_database(&config).await?;
            let record = database.get_measurement(&id).await?.with_context(|| format!("no measurement with id {id}"))?;
            print_json(&record)?;
        }
    }

    Ok(())
}
