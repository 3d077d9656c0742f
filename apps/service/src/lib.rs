pub mod config;
pub mod database;
pub mod monitoring;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod provider;
pub mod registry;
pub mod report;
