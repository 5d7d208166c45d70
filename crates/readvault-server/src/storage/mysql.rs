//! `MySQL` backend.
//!
//! `MySQL` has neither partial indexes nor `ON CONFLICT`. Uniqueness among
//! non-deleted rows uses stored generated columns that are `NULL` once a
//! row is soft-deleted, and duplicate inserts use `ON DUPLICATE KEY UPDATE`.
//! DDL commits implicitly here, so a failed create script can leave some
//! tables behind; every statement is `IF NOT EXISTS`, so a retry finishes
//! the job.

use std::time::Duration;

use readvault_core::Driver;
use readvault_core::config::DatabaseConfig;
use readvault_core::db::{DatabaseError, open_mysql_pool};
use sqlx::{MySql, Pool};

use super::migrate::{SchemaCatalog, Upgrade};
use super::sql::{QUESTION_MARK, Statements, impl_sql_database};

const NOTIFICATION_TABLE: &str = "CREATE TABLE IF NOT EXISTS notification (
    notification_id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    key_value VARCHAR(100) NOT NULL,
    notification_type VARCHAR(50) NOT NULL,
    notification_when BIGINT NOT NULL,
    notification_created_at BIGINT NOT NULL,
    UNIQUE KEY uq_notification_key_when (key_value, notification_when),
    FOREIGN KEY (key_value) REFERENCES api_key(key_value)
)";

pub(crate) static CATALOG: SchemaCatalog = SchemaCatalog {
    create: &[
        "CREATE TABLE IF NOT EXISTS settings (
            name VARCHAR(100) NOT NULL,
            value VARCHAR(100) NOT NULL,
            UNIQUE KEY uq_settings_name (name)
        )",
        "CREATE TABLE IF NOT EXISTS account (
            account_id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
            account_name VARCHAR(100) NOT NULL,
            account_email VARCHAR(100) NOT NULL,
            account_password VARCHAR(300) NOT NULL,
            account_type VARCHAR(20) NOT NULL,
            account_wrong_pass INT NOT NULL DEFAULT 0,
            account_locked BOOLEAN NOT NULL DEFAULT FALSE,
            account_token VARCHAR(1000) NOT NULL DEFAULT '',
            account_refresh_token VARCHAR(1000) NOT NULL DEFAULT '',
            account_created_at BIGINT NOT NULL,
            account_updated_at BIGINT NOT NULL,
            account_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            account_active_email VARCHAR(100)
                AS (IF(account_deleted, NULL, account_email)) STORED,
            UNIQUE KEY uq_account_active_email (account_active_email)
        )",
        "CREATE TABLE IF NOT EXISTS api_key (
            account_id BIGINT NOT NULL,
            key_name VARCHAR(100) NOT NULL,
            key_value VARCHAR(100) NOT NULL,
            key_type VARCHAR(20) NOT NULL,
            reader_name VARCHAR(100) NOT NULL,
            valid_until BIGINT NULL,
            key_created_at BIGINT NOT NULL,
            key_updated_at BIGINT NOT NULL,
            key_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            key_active_reader VARCHAR(100)
                AS (IF(key_deleted, NULL, reader_name)) STORED,
            UNIQUE KEY uq_api_key_value (key_value),
            UNIQUE KEY uq_api_key_active_reader (account_id, key_active_reader),
            FOREIGN KEY (account_id) REFERENCES account(account_id)
        )",
        "CREATE TABLE IF NOT EXISTS a_read (
            key_value VARCHAR(100) NOT NULL,
            identifier VARCHAR(100) NOT NULL,
            seconds BIGINT NOT NULL,
            milliseconds INT NOT NULL,
            ident_type VARCHAR(10) NOT NULL,
            read_type VARCHAR(10) NOT NULL,
            antenna INT NULL,
            reader VARCHAR(50) NOT NULL,
            rssi VARCHAR(10) NOT NULL,
            read_created_at BIGINT NOT NULL,
            UNIQUE KEY uq_a_read (key_value, identifier, seconds, milliseconds, ident_type),
            KEY idx_a_read_seconds (key_value, seconds),
            FOREIGN KEY (key_value) REFERENCES api_key(key_value)
        )",
        NOTIFICATION_TABLE,
    ],
    upgrades: &[Upgrade {
        version: 2,
        statements: &[NOTIFICATION_TABLE],
    }],
};

const STATEMENTS: Statements = Statements {
    set_setting: "INSERT INTO settings (name, value) VALUES (?, ?) \
                  ON DUPLICATE KEY UPDATE value = VALUES(value)",
    // A no-op update keeps foreign key errors visible, unlike INSERT IGNORE.
    insert_read: "INSERT INTO a_read (key_value, identifier, seconds, milliseconds, \
                  ident_type, read_type, antenna, reader, rssi, read_created_at) \
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                  ON DUPLICATE KEY UPDATE key_value = key_value",
    // A duplicate fails the unique key and is reported as `SaveOutcome::Duplicate`.
    insert_notification: "INSERT INTO notification (key_value, notification_type, \
                          notification_when, notification_created_at) \
                          VALUES (?, ?, ?, ?)",
    ..QUESTION_MARK
};

/// Store backed by a `MySQL` server.
pub struct MySqlDatabase {
    pool: Pool<MySql>,
    timeout: Duration,
}

impl MySqlDatabase {
    /// Connect using the database section of the configuration. The schema
    /// is not touched; call `ensure_schema` before use.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = open_mysql_pool(cfg).await?;
        Ok(Self {
            pool,
            timeout: cfg.query_timeout(),
        })
    }
}

impl_sql_database!(MySqlDatabase, Driver::Mysql, STATEMENTS, CATALOG);
