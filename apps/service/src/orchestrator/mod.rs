/// Orchestrator module - coordinates all components
///
/// The orchestrator owns the two schedules of the service:
/// - the measurement cycle (registry sync, then every node in turn)
/// - the digest, built from the trailing report window
///
/// Every collaborator is passed in explicitly, so tests can swap the
/// provider, store and channels for in-memory versions.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, initialize_database};
use crate::monitoring::{CycleReport, CycleRunner, MeasurementExecutor};
use crate::notify::{AlertDispatcher, AlertSink, DigestSink, RetryPolicy, SmtpDigestSink, WebhookSink};
use crate::pool::LibsqlPool;
use crate::provider::GlobalpingClient;
use crate::registry::{DirectoryClient, RegistrySync};
use crate::report::{FleetReport, ReportingAggregator};

/// What happened to a digest run
#[derive(Debug, Clone, PartialEq)]
pub enum DigestOutcome {
    Sent(FleetReport),
    /// No email channel configured; the report was still built
    Skipped(FleetReport),
    /// The email channel is configured but delivery failed
    Failed(FleetReport),
}

/// Main orchestrator for the netprobe service
pub struct Orchestrator {
    runner: CycleRunner,
    aggregator: ReportingAggregator,
    digest_sink: Option<Arc<dyn DigestSink>>,
    cycle_interval: Duration,
    digest_interval: Duration,
    report_window: Duration,
}

impl Orchestrator {
    /// Create and run until `cancel` fires
    pub async fn start(config: Config, pool: LibsqlPool, cancel: CancellationToken) -> Result<()> {
        let orchestrator = Self::from_config(&config, pool).await?;
        orchestrator.run(&cancel).await;
        Ok(())
    }

    pub fn new(
        config: &Config,
        runner: CycleRunner,
        aggregator: ReportingAggregator,
        digest_sink: Option<Arc<dyn DigestSink>>,
    ) -> Self {
        Self {
            runner,
            aggregator,
            digest_sink,
            cycle_interval: config.schedule.cycle_interval,
            digest_interval: config.schedule.digest_interval,
            report_window: config.schedule.report_window,
        }
    }

    /// Wire the production clients from configuration
    pub async fn from_config(config: &Config, pool: LibsqlPool) -> Result<Self> {
        let conn = pool.get().await?;
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

        if config.provider.api_key.is_none() {
            warn!("GLOBALPING_API_KEY is not set, measurements run with anonymous rate limits");
        }
        let provider = Arc::new(GlobalpingClient::new(config.provider.clone())?);
        let directory = Arc::new(DirectoryClient::new(config.directory.clone())?);

        let alert_sink: Option<Arc<dyn AlertSink>> = match &config.alerts.webhook_url {
            Some(url) => Some(Arc::new(WebhookSink::new(url.clone())?)),
            None => {
                info!("Chat webhook not configured, immediate alerts are disabled");
                None
            }
        };
        let alerts = Arc::new(AlertDispatcher::new(alert_sink, RetryPolicy::from_settings(&config.alerts)));

        let digest_sink: Option<Arc<dyn DigestSink>> = match SmtpDigestSink::from_settings(&config.email)? {
            Some(sink) => Some(Arc::new(sink)),
            None => {
                info!("Email configuration incomplete, digests will be skipped");
                None
            }
        };

        let executor = MeasurementExecutor::new(provider, database.clone(), alerts, &config.provider);
        let registry = RegistrySync::new(directory, database.clone());
        let runner = CycleRunner::new(registry, database.clone(), executor, config.schedule.pacing);

        Ok(Self::new(config, runner, ReportingAggregator::new(database), digest_sink))
    }

    pub fn runner(&self) -> &CycleRunner {
        &self.runner
    }

    /// Run cycles and digests on their own cadences until cancelled
    pub async fn run(&self, cancel: &CancellationToken) {
        info!("Starting netprobe orchestrator...");
        tokio::join!(self.cycle_loop(cancel), self.digest_loop(cancel));
        info!("Orchestrator stopped");
    }

    async fn cycle_loop(&self, cancel: &CancellationToken) {
        let mut timer = interval_at(Instant::now(), self.cycle_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            self.run_cycle(cancel).await;
        }
    }

    async fn digest_loop(&self, cancel: &CancellationToken) {
        let mut timer = interval_at(Instant::now() + self.digest_interval, self.digest_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            if let Err(e) = self.send_digest().await {
                error!("Digest failed: {:#}", e);
            }
        }
    }

    /// One cycle; an abandoned cycle is logged and reported as `None`
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Option<CycleReport> {
        match self.runner.run_cycle(cancel).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("Measurement cycle abandoned, retrying next interval: {:#}", e);
                None
            }
        }
    }

    pub async fn build_digest(&self) -> Result<FleetReport> {
        self.aggregator.report(self.report_window).await
    }

    /// Build the digest and hand it to the email channel if there is one.
    /// Delivery failures are logged, not returned.
    pub async fn send_digest(&self) -> Result<DigestOutcome> {
        let report = self.build_digest().await?;
        info!(
            nodes = report.total_nodes,
            failing = report.failing_nodes,
            "Built digest for the last {} hours",
            report.window_hours
        );

        let Some(sink) = &self.digest_sink else {
            info!("Email configuration incomplete. Skipping report.");
            return Ok(DigestOutcome::Skipped(report));
        };

        match sink.deliver(&report).await {
            Ok(()) => Ok(DigestOutcome::Sent(report)),
            Err(e) => {
                warn!("Error sending digest: {}", e);
                Ok(DigestOutcome::Failed(report))
            }
        }
    }
}
