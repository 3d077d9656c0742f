/// Database abstraction layer
///
/// Two tables back the whole service: the node inventory, upserted on
/// every registry sync, and the append-only measurement history.

pub mod repository;
pub mod migrations;
pub mod models;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
