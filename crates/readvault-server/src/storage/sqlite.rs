//! `SQLite` backend.

use std::path::Path;
use std::time::Duration;

use readvault_core::Driver;
use readvault_core::config::DatabaseConfig;
use readvault_core::db::{DatabaseError, QUERY_TIMEOUT, open_sqlite_in_memory, open_sqlite_pool};
use sqlx::{Pool, Sqlite};

use super::migrate::{SchemaCatalog, Upgrade};
use super::sql::{QUESTION_MARK, Statements, impl_sql_database};

const NOTIFICATION_TABLE: &str = "CREATE TABLE IF NOT EXISTS notification (
    notification_id INTEGER PRIMARY KEY AUTOINCREMENT,
    key_value TEXT NOT NULL REFERENCES api_key(key_value),
    notification_type TEXT NOT NULL,
    notification_when INTEGER NOT NULL,
    notification_created_at INTEGER NOT NULL,
    UNIQUE (key_value, notification_when)
)";

pub(crate) static CATALOG: SchemaCatalog = SchemaCatalog {
    create: &[
        "CREATE TABLE IF NOT EXISTS settings (
            name TEXT NOT NULL UNIQUE,
            value TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS account (
            account_id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_name TEXT NOT NULL,
            account_email TEXT NOT NULL,
            account_password TEXT NOT NULL,
            account_type TEXT NOT NULL,
            account_wrong_pass INTEGER NOT NULL DEFAULT 0,
            account_locked BOOLEAN NOT NULL DEFAULT FALSE,
            account_token TEXT NOT NULL DEFAULT '',
            account_refresh_token TEXT NOT NULL DEFAULT '',
            account_created_at INTEGER NOT NULL,
            account_updated_at INTEGER NOT NULL,
            account_deleted BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_account_active_email
            ON account(account_email) WHERE account_deleted = FALSE",
        "CREATE TABLE IF NOT EXISTS api_key (
            account_id INTEGER NOT NULL REFERENCES account(account_id),
            key_name TEXT NOT NULL,
            key_value TEXT NOT NULL UNIQUE,
            key_type TEXT NOT NULL,
            reader_name TEXT NOT NULL,
            valid_until INTEGER,
            key_created_at INTEGER NOT NULL,
            key_updated_at INTEGER NOT NULL,
            key_deleted BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_api_key_active_reader
            ON api_key(account_id, reader_name) WHERE key_deleted = FALSE",
        "CREATE TABLE IF NOT EXISTS a_read (
            key_value TEXT NOT NULL REFERENCES api_key(key_value),
            identifier TEXT NOT NULL,
            seconds INTEGER NOT NULL,
            milliseconds INTEGER NOT NULL,
            ident_type TEXT NOT NULL,
            read_type TEXT NOT NULL,
            antenna INTEGER,
            reader TEXT NOT NULL,
            rssi TEXT NOT NULL,
            read_created_at INTEGER NOT NULL,
            UNIQUE (key_value, identifier, seconds, milliseconds, ident_type)
        )",
        "CREATE INDEX IF NOT EXISTS idx_a_read_seconds ON a_read(key_value, seconds)",
        NOTIFICATION_TABLE,
    ],
    upgrades: &[Upgrade {
        version: 2,
        statements: &[NOTIFICATION_TABLE],
    }],
};

const STATEMENTS: Statements = QUESTION_MARK;

/// Store backed by a `SQLite` file or in-memory database.
pub struct SqliteDatabase {
    pool: Pool<Sqlite>,
    timeout: Duration,
}

impl SqliteDatabase {
    /// Open the database file, creating it if needed. The schema is not
    /// touched; call `ensure_schema` before use.
    pub async fn open(path: &Path, cfg: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = open_sqlite_pool(path, cfg.max_connections).await?;
        Ok(Self {
            pool,
            timeout: cfg.query_timeout(),
        })
    }

    /// In-memory database with no schema.
    pub async fn connect_in_memory() -> Result<Self, DatabaseError> {
        let pool = open_sqlite_in_memory().await?;
        Ok(Self {
            pool,
            timeout: QUERY_TIMEOUT,
        })
    }

    /// In-memory database with the latest schema applied (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Self::connect_in_memory().await?;
        super::migrate::ensure_schema(&db, &CATALOG).await?;
        Ok(db)
    }

    /// Replace the per-operation timeout.
    #[must_use]
    pub const fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl_sql_database!(SqliteDatabase, Driver::Sqlite, STATEMENTS, CATALOG);
