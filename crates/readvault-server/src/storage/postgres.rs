//! `PostgreSQL` backend.

use std::time::Duration;

use readvault_core::Driver;
use readvault_core::config::DatabaseConfig;
use readvault_core::db::{DatabaseError, open_postgres_pool};
use sqlx::{Pool, Postgres};

use super::migrate::{SchemaCatalog, Upgrade};
use super::sql::{Statements, account_columns, impl_sql_database, key_columns, read_columns};

const NOTIFICATION_TABLE: &str = "CREATE TABLE IF NOT EXISTS notification (
    notification_id BIGSERIAL PRIMARY KEY,
    key_value VARCHAR(100) NOT NULL REFERENCES api_key(key_value),
    notification_type VARCHAR(50) NOT NULL,
    notification_when BIGINT NOT NULL,
    notification_created_at BIGINT NOT NULL,
    UNIQUE (key_value, notification_when)
)";

pub(crate) static CATALOG: SchemaCatalog = SchemaCatalog {
    create: &[
        "CREATE TABLE IF NOT EXISTS settings (
            name VARCHAR(100) NOT NULL UNIQUE,
            value VARCHAR(100) NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS account (
            account_id BIGSERIAL PRIMARY KEY,
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
            account_deleted BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_account_active_email
            ON account(account_email) WHERE account_deleted = FALSE",
        "CREATE TABLE IF NOT EXISTS api_key (
            account_id BIGINT NOT NULL REFERENCES account(account_id),
            key_name VARCHAR(100) NOT NULL,
            key_value VARCHAR(100) NOT NULL UNIQUE,
            key_type VARCHAR(20) NOT NULL,
            reader_name VARCHAR(100) NOT NULL,
            valid_until BIGINT,
            key_created_at BIGINT NOT NULL,
            key_updated_at BIGINT NOT NULL,
            key_deleted BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_api_key_active_reader
            ON api_key(account_id, reader_name) WHERE key_deleted = FALSE",
        "CREATE TABLE IF NOT EXISTS a_read (
            key_value VARCHAR(100) NOT NULL REFERENCES api_key(key_value),
            identifier VARCHAR(100) NOT NULL,
            seconds BIGINT NOT NULL,
            milliseconds INT NOT NULL,
            ident_type VARCHAR(10) NOT NULL,
            read_type VARCHAR(10) NOT NULL,
            antenna INT,
            reader VARCHAR(50) NOT NULL,
            rssi VARCHAR(10) NOT NULL,
            read_created_at BIGINT NOT NULL,
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

const STATEMENTS: Statements = Statements {
    get_setting: "SELECT value FROM settings WHERE name = $1",
    set_setting: "INSERT INTO settings (name, value) VALUES ($1, $2) \
                  ON CONFLICT (name) DO UPDATE SET value = excluded.value",

    insert_account: "INSERT INTO account (account_name, account_email, account_password, \
                     account_type, account_created_at, account_updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
    account_by_email: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE AND a.account_email = $1"
    ),
    account_by_key: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a JOIN api_key k ON k.account_id = a.account_id \
         WHERE a.account_deleted = FALSE AND k.key_deleted = FALSE AND k.key_value = $1"
    ),
    account_by_id: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE AND a.account_id = $1"
    ),
    deleted_account_by_email: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = TRUE AND a.account_email = $1 \
         ORDER BY a.account_id DESC LIMIT 1"
    ),
    list_accounts: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE ORDER BY a.account_id"
    ),
    delete_account: "UPDATE account SET account_deleted = TRUE, account_updated_at = $1 \
                     WHERE account_deleted = FALSE AND account_id = $2",
    delete_account_keys: "UPDATE api_key SET key_deleted = TRUE, key_updated_at = $1 \
                          WHERE key_deleted = FALSE AND account_id = $2",
    resurrect_account: "UPDATE account SET account_deleted = FALSE, account_updated_at = $1 \
                        WHERE account_deleted = TRUE AND account_id = $2",
    update_account: "UPDATE account SET account_name = $1, account_type = $2, \
                     account_updated_at = $3 \
                     WHERE account_deleted = FALSE AND account_email = $4",
    change_password: "UPDATE account SET account_password = $1, account_updated_at = $2 \
                      WHERE account_deleted = FALSE AND account_email = $3",
    change_password_logout: "UPDATE account SET account_password = $1, account_token = '', \
                             account_refresh_token = '', account_updated_at = $2 \
                             WHERE account_deleted = FALSE AND account_email = $3",
    change_email: "UPDATE account SET account_email = $1, account_token = '', \
                   account_refresh_token = '', account_updated_at = $2 \
                   WHERE account_deleted = FALSE AND account_email = $3",
    invalid_password: "UPDATE account SET \
                       account_locked = (account_locked OR account_wrong_pass + 1 >= $1), \
                       account_token = CASE WHEN account_wrong_pass + 1 >= $2 \
                       THEN '' ELSE account_token END, \
                       account_refresh_token = CASE WHEN account_wrong_pass + 1 >= $3 \
                       THEN '' ELSE account_refresh_token END, \
                       account_updated_at = $4, \
                       account_wrong_pass = account_wrong_pass + 1 \
                       WHERE account_deleted = FALSE AND account_id = $5",
    valid_password: "UPDATE account SET account_wrong_pass = 0, account_updated_at = $1 \
                     WHERE account_deleted = FALSE AND account_locked = FALSE \
                     AND account_id = $2",
    unlock_account: "UPDATE account SET account_wrong_pass = 0, account_locked = FALSE, \
                     account_updated_at = $1 \
                     WHERE account_deleted = FALSE AND account_locked = TRUE \
                     AND account_id = $2",
    update_tokens: "UPDATE account SET account_token = $1, account_refresh_token = $2, \
                    account_updated_at = $3 \
                    WHERE account_deleted = FALSE AND account_id = $4",

    insert_key: "INSERT INTO api_key (account_id, key_name, key_value, key_type, reader_name, \
                 valid_until, key_created_at, key_updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    get_key: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.key_value = $1"
    ),
    keys_by_email: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k JOIN account a ON a.account_id = k.account_id \
         WHERE k.key_deleted = FALSE AND a.account_deleted = FALSE AND a.account_email = $1 \
         ORDER BY k.reader_name"
    ),
    keys_by_account: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.account_id = $1 \
         ORDER BY k.reader_name"
    ),
    sibling_keys: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.account_id = \
         (SELECT s.account_id FROM api_key s WHERE s.key_value = $1) \
         ORDER BY k.reader_name"
    ),
    update_key: "UPDATE api_key SET key_name = $1, key_type = $2, reader_name = $3, \
                 valid_until = $4, key_updated_at = $5 \
                 WHERE key_deleted = FALSE AND key_value = $6",
    delete_key: "UPDATE api_key SET key_deleted = TRUE, key_updated_at = $1 \
                 WHERE key_deleted = FALSE AND key_value = $2",
    key_and_account: concat!(
        "SELECT ",
        account_columns!(),
        ", k.key_name, k.key_value, k.key_type, k.reader_name, k.valid_until \
         FROM api_key k JOIN account a ON a.account_id = k.account_id \
         WHERE k.key_deleted = FALSE AND a.account_deleted = FALSE AND k.key_value = $1"
    ),

    insert_read: "INSERT INTO a_read (key_value, identifier, seconds, milliseconds, \
                  ident_type, read_type, antenna, reader, rssi, read_created_at) \
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                  ON CONFLICT (key_value, identifier, seconds, milliseconds, ident_type) \
                  DO NOTHING",
    get_reads: concat!(
        "SELECT ",
        read_columns!(),
        " FROM a_read r JOIN api_key k ON k.key_value = r.key_value \
         WHERE k.account_id = $1 AND k.reader_name = $2 \
         AND r.seconds >= $3 AND r.seconds <= $4 \
         ORDER BY r.seconds, r.milliseconds, r.identifier"
    ),
    delete_reads_range: "DELETE FROM a_read WHERE seconds >= $1 AND seconds <= $2 \
                         AND key_value IN (SELECT key_value FROM api_key \
                         WHERE account_id = $3 AND reader_name = $4)",
    delete_reads_before: "DELETE FROM a_read WHERE seconds <= $1 \
                          AND key_value IN (SELECT key_value FROM api_key \
                          WHERE account_id = $2 AND reader_name = $3)",
    delete_key_reads: "DELETE FROM a_read WHERE key_value = $1",
    delete_reader_reads: "DELETE FROM a_read WHERE key_value IN (SELECT key_value \
                          FROM api_key WHERE account_id = $1 AND reader_name = $2)",

    insert_notification: "INSERT INTO notification (key_value, notification_type, \
                          notification_when, notification_created_at) \
                          VALUES ($1, $2, $3, $4) \
                          ON CONFLICT (key_value, notification_when) DO NOTHING",
    latest_notification: "SELECT n.notification_id, n.notification_type, \
                          n.notification_when \
                          FROM notification n JOIN api_key k ON k.key_value = n.key_value \
                          WHERE k.account_id = $1 AND k.reader_name = $2 \
                          ORDER BY n.notification_when DESC, n.notification_id DESC LIMIT 1",
};

/// Store backed by a `PostgreSQL` server.
pub struct PostgresDatabase {
    pool: Pool<Postgres>,
    timeout: Duration,
}

impl PostgresDatabase {
    /// Connect using the database section of the configuration. The schema
    /// is not touched; call `ensure_schema` before use.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = open_postgres_pool(cfg).await?;
        Ok(Self {
            pool,
            timeout: cfg.query_timeout(),
        })
    }
}

impl_sql_database!(PostgresDatabase, Driver::Postgres, STATEMENTS, CATALOG);
