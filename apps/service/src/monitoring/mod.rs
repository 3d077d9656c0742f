/// Monitoring engine module - drives measurements for the node fleet
///
/// This module is responsible for:
/// - Running one node through create, poll, classify, alert and store
/// - Pacing nodes strictly one after another
/// - Classifying probe statistics into health verdicts
pub mod classifier;
pub mod executor;
pub mod scheduler;
pub mod summary;
pub mod types;

pub use classifier::{classify, classify_probe, failing_nodes, FailingNode};
pub use executor::{MeasurementExecutor, NodeOutcome};
pub use scheduler::{CycleReport, CycleRunner, Pacer};
pub use types::{Classification, Verdict};
