//! Shared database types and utilities.
//!
//! Provides `DatabaseError`, `unix_timestamp()`, the bounded storage-call
//! guard `with_timeout()`, and pool creation helpers for each supported
//! backend (`SQLite`, `PostgreSQL`, `MySQL`).

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySql, Pool, Postgres, Sqlite};
use tracing::info;

use crate::config::DatabaseConfig;

/// Upper bound for a single storage call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled connections are recycled after this long.
const CONNECTION_LIFETIME: Duration = Duration::from_secs(300);

/// Storage errors shared by every backend.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid range: end {to} is before start {from}")]
    InvalidRange { from: i64, to: i64 },

    #[error("Account locked: {0}")]
    AccountLocked(String),
}

impl DatabaseError {
    /// Prefix the error message with the operation that produced it.
    #[must_use]
    pub fn context(self, op: &str) -> Self {
        match self {
            Self::Query(msg) => Self::Query(format!("{op}: {msg}")),
            Self::Migration(msg) => Self::Migration(format!("{op}: {msg}")),
            Self::Connection(msg) => Self::Connection(format!("{op}: {msg}")),
            other => other,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                Self::Validation(db.message().to_string())
            }
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut => Self::Timeout("connection pool".to_string()),
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::PoolClosed => Self::Connection("pool closed".to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Run a storage future with an upper time bound.
///
/// The future is dropped (and with it any in-flight query) once `limit`
/// elapses, and `DatabaseError::Timeout` naming `op` is returned.
pub async fn with_timeout<T, F>(op: &str, limit: Duration, fut: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DatabaseError::Timeout(format!("{op} exceeded {}ms", limit.as_millis())))?
}

/// Open (or create) a `SQLite` connection pool at the given file path.
///
/// Creates the parent directory if it does not exist, enables WAL journal
/// mode, foreign keys, and sets a 5-second busy timeout.
pub async fn open_sqlite_pool(
    path: &Path,
    max_connections: u32,
) -> Result<Pool<Sqlite>, DatabaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io(e.to_string()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(QUERY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(QUERY_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!(path = %path.display(), "SQLite database opened");

    Ok(pool)
}

/// Open an in-memory `SQLite` connection pool (for testing).
///
/// A single connection that never idles out, since closing it would drop
/// the whole database.
pub async fn open_sqlite_in_memory() -> Result<Pool<Sqlite>, DatabaseError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| DatabaseError::Connection(e.to_string()))?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    Ok(pool)
}

/// Connect a `PostgreSQL` pool.
///
/// Uses `database.url` when set, otherwise the discrete host/port/user
/// fields (unset fields fall back to the driver's own defaults).
pub async fn open_postgres_pool(cfg: &DatabaseConfig) -> Result<Pool<Postgres>, DatabaseError> {
    let options = if let Some(url) = &cfg.url {
        PgConnectOptions::from_str(url).map_err(|e| DatabaseError::Connection(e.to_string()))?
    } else {
        let mut options = PgConnectOptions::new();
        if let Some(host) = &cfg.host {
            options = options.host(host);
        }
        if let Some(port) = cfg.port {
            options = options.port(port);
        }
        if let Some(user) = &cfg.user {
            options = options.username(user);
        }
        if let Some(password) = &cfg.password {
            options = options.password(password);
        }
        if let Some(name) = &cfg.name {
            options = options.database(name);
        }
        options
    };

    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.query_timeout())
        .max_lifetime(CONNECTION_LIFETIME)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!("PostgreSQL database connected");

    Ok(pool)
}

/// Connect a `MySQL` pool.
///
/// Uses `database.url` when set, otherwise the discrete host/port/user
/// fields.
pub async fn open_mysql_pool(cfg: &DatabaseConfig) -> Result<Pool<MySql>, DatabaseError> {
    let options = if let Some(url) = &cfg.url {
        MySqlConnectOptions::from_str(url).map_err(|e| DatabaseError::Connection(e.to_string()))?
    } else {
        let mut options = MySqlConnectOptions::new();
        if let Some(host) = &cfg.host {
            options = options.host(host);
        }
        if let Some(port) = cfg.port {
            options = options.port(port);
        }
        if let Some(user) = &cfg.user {
            options = options.username(user);
        }
        if let Some(password) = &cfg.password {
            options = options.password(password);
        }
        if let Some(name) = &cfg.name {
            options = options.database(name);
        }
        options
    };

    let pool = MySqlPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(cfg.query_timeout())
        .max_lifetime(CONNECTION_LIFETIME)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::Connection(e.to_string()))?;

    info!("MySQL database connected");

    Ok(pool)
}

/// Returns the current time as a Unix timestamp (seconds since epoch).
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn unix_timestamp_is_reasonable() {
        let ts = unix_timestamp();
        // Should be after 2024-01-01
        assert!(ts > 1_704_067_200);
    }

    #[tokio::test]
    async fn with_timeout_passes_through_result() {
        let value = with_timeout("noop", QUERY_TIMEOUT, async { Ok::<_, DatabaseError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn with_timeout_reports_elapsed_operation() {
        let err = with_timeout("slow_query", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, DatabaseError>(())
        })
        .await
        .unwrap_err();
        match err {
            DatabaseError::Timeout(msg) => assert!(msg.contains("slow_query")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn context_prefixes_query_errors_only() {
        let err = DatabaseError::Query("boom".into()).context("add_reads");
        assert_eq!(err.to_string(), "Query error: add_reads: boom");

        let err = DatabaseError::NotFound("Key abc".into()).context("get_key");
        assert_eq!(err.to_string(), "Not found: Key abc");
    }

    #[tokio::test]
    async fn in_memory_pool_opens() {
        let pool = open_sqlite_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
    }
}
