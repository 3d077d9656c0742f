use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::executor::MeasurementExecutor;
use crate::database::Database;
use crate::registry::RegistrySync;

/// Keeps a fixed gap between the end of one node's measurement and the
/// start of the next. Taking `&mut self` means only one caller can hold a
/// turn at a time, so nodes cannot be measured in parallel through it.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_done: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last_done: None }
    }

    /// Wait until the next node may start. Returns `false` if cancelled.
    pub async fn wait_turn(&mut self, cancel: &CancellationToken) -> bool {
        let Some(last_done) = self.last_done else {
            return !cancel.is_cancelled();
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(last_done + self.interval) => true,
        }
    }

    /// Record that the current node finished, successfully or not
    pub fn mark_done(&mut self) {
        self.last_done = Some(Instant::now());
    }
}

/// Counts of one measurement cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub nodes: usize,
    pub stored: usize,
    pub errors: usize,
    /// Stored measurements with a failing or slow probe
    pub failing: usize,
    pub cancelled: bool,
}

/// One full pass: registry sync, then every stored node in turn
pub struct CycleRunner {
    registry: RegistrySync,
    database: Arc<dyn Database>,
    executor: MeasurementExecutor,
    pacing: Duration,
}

impl CycleRunner {
    pub fn new(registry: RegistrySync, database: Arc<dyn Database>, executor: MeasurementExecutor, pacing: Duration) -> Self {
        Self { registry, database, executor, pacing }
    }

    pub fn registry(&self) -> &RegistrySync {
        &self.registry
    }

    /// A storage failure while syncing or listing nodes abandons the cycle.
    /// Everything that goes wrong for a single node is logged and skipped.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        self.registry.sync().await.context("registry sync failed")?;
        let nodes = self.database.list_nodes().await.context("failed to list nodes")?;

        let mut report = CycleReport { nodes: nodes.len(), ..Default::default() };
        info!("Starting measurement cycle for {} nodes", nodes.len());

        let mut pacer = Pacer::new(self.pacing);
        for (index, node) in nodes.iter().enumerate() {
            if !pacer.wait_turn(cancel).await {
                report.cancelled = true;
                break;
            }

            let span = info_span!("node", node_id = %node.node_id, position = index + 1, total = nodes.len());
            let result = self.executor.execute(node, cancel).instrument(span).await;
            pacer.mark_done();

            match result {
                Ok(outcome) => {
                    report.stored += 1;
                    if outcome.failing {
                        report.failing += 1;
                    }
                }
                Err(e) if e.is_cancelled() => {
                    warn!(node_id = %node.node_id, "Measurement cycle cancelled");
                    report.errors += 1;
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    error!(node_id = %node.node_id, "Error measuring node: {}", e);
                    report.errors += 1;
                }
            }
        }

        info!(
            stored = report.stored,
            errors = report.errors,
            failing = report.failing,
            "Completed measurement cycle for {} nodes",
            report.nodes
        );
        Ok(report)
    }
}
