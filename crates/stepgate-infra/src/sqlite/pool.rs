//! Connection pools for the stepgate database.
//!
//! Every workflow mutation goes through `update_workflow`, a read-modify-write
//! transaction. Those transactions are serialized by giving the writer pool a
//! single connection. Reads (listing, `show`, the approval sweep) use a
//! separate read-only pool so a long `stepgate run` never blocks
//! `stepgate pending` in another terminal. WAL mode is what lets the two
//! coexist across processes.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const READER_CONNECTIONS: u32 = 8;
/// How long a second process waits on the write lock before `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader and writer pools over one database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `database_url` and bring its
    /// schema up to date. Migrations run on the writer before any reader
    /// connection exists.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(database_url, "database ready");
        Ok(Self { reader, writer })
    }
}

/// URL of `stepgate.db` inside `data_dir`.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("stepgate.db").display())
}
