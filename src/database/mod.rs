//! Repository contracts and their `sqlx`/MySQL-backed implementations
//! (component B). The core depends only on the traits in
//! [`entities`]; `connect` is the one place that knows about the
//! concrete backend.

pub mod entities;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;

use crate::errors::Result;

/// Opens a connection pool against the MySQL schema in spec.md §6
/// (`user`, `friend`, `allgroup`, `groupuser`, `offlinemessage`).
/// Repositories may issue one statement per call (spec.md §4.B); the pool
/// only needs to guarantee per-statement atomicity, not multi-statement
/// transactions.
pub async fn connect(mysql_url: &str) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(mysql_url)
        .await?;
    Ok(pool)
}
