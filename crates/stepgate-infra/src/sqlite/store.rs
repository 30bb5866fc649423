//! SQLite-backed store shared by the workflow and approval repositories.
//!
//! Reads go to the multi-connection reader pool; every write (including the
//! read half of a read-modify-write) goes through the single-connection
//! writer, which serializes mutations per database.

use chrono::{DateTime, SecondsFormat, Utc};
use stepgate_types::error::RepositoryError;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite implementation of the `Store` contract.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: DatabasePool,
}

impl SqliteStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(s: &str, what: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

/// Map a sqlx error, turning constraint violations into domain errors.
pub(crate) fn map_sqlx(e: sqlx::Error) -> RepositoryError {
    if let Some(db) = e.as_database_error() {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(db.message().to_string());
        }
        if db.is_foreign_key_violation() {
            return RepositoryError::NotFound;
        }
    }
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A fresh store on a temporary database. Keep the `TempDir` alive.
    pub async fn temp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteStore::new(pool), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_roundtrip_is_fixed_width() {
        let a = Utc::now();
        let formatted = format_datetime(&a);
        assert!(formatted.ends_with('Z'));
        assert_eq!(formatted.len(), "2026-01-01T00:00:00.000000Z".len());
        let parsed = parse_datetime(&formatted).unwrap();
        assert_eq!(parsed.timestamp_micros(), a.timestamp_micros());
    }

    #[test]
    fn bad_uuid_is_a_query_error() {
        assert!(matches!(parse_uuid("nope"), Err(RepositoryError::Query(_))));
    }
}
