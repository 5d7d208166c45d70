//! SQL text per dialect and the macro that turns it into a [`Database`]
//! implementation.
//!
//! The three backends run the same queries with the same bind order. Only
//! placeholder syntax and a handful of upsert forms differ, so each backend
//! provides a [`Statements`] table and `impl_sql_database!` generates the
//! rest.
//!
//! [`Database`]: super::Database

/// Account columns, read through the `a` alias.
macro_rules! account_columns {
    () => {
        "a.account_id, a.account_name, a.account_email, a.account_password, a.account_type, \
         a.account_wrong_pass, a.account_locked, a.account_token, a.account_refresh_token"
    };
}

/// Key columns, read through the `k` alias.
macro_rules! key_columns {
    () => {
        "k.account_id, k.key_name, k.key_value, k.key_type, k.reader_name, k.valid_until"
    };
}

/// Read columns, read through the `r` alias.
macro_rules! read_columns {
    () => {
        "r.key_value, r.identifier, r.seconds, r.milliseconds, r.ident_type, r.read_type, \
         r.antenna, r.reader, r.rssi"
    };
}

pub(crate) use {account_columns, key_columns, read_columns};

/// Every statement a backend runs outside of schema DDL.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Statements {
    pub get_setting: &'static str,
    pub set_setting: &'static str,

    pub insert_account: &'static str,
    pub account_by_email: &'static str,
    pub account_by_key: &'static str,
    pub account_by_id: &'static str,
    pub deleted_account_by_email: &'static str,
    pub list_accounts: &'static str,
    pub delete_account: &'static str,
    pub delete_account_keys: &'static str,
    pub resurrect_account: &'static str,
    pub update_account: &'static str,
    pub change_password: &'static str,
    pub change_password_logout: &'static str,
    pub change_email: &'static str,
    pub invalid_password: &'static str,
    pub valid_password: &'static str,
    pub unlock_account: &'static str,
    pub update_tokens: &'static str,

    pub insert_key: &'static str,
    pub get_key: &'static str,
    pub keys_by_email: &'static str,
    pub keys_by_account: &'static str,
    pub sibling_keys: &'static str,
    pub update_key: &'static str,
    pub delete_key: &'static str,
    pub key_and_account: &'static str,

    pub insert_read: &'static str,
    pub get_reads: &'static str,
    pub delete_reads_range: &'static str,
    pub delete_reads_before: &'static str,
    pub delete_key_reads: &'static str,
    pub delete_reader_reads: &'static str,

    pub insert_notification: &'static str,
    pub latest_notification: &'static str,
}

/// `?`-placeholder statements, used as-is by `SQLite` and as the base for
/// `MySQL`.
pub(crate) const QUESTION_MARK: Statements = Statements {
    get_setting: "SELECT value FROM settings WHERE name = ?",
    set_setting: "INSERT INTO settings (name, value) VALUES (?, ?) \
                  ON CONFLICT (name) DO UPDATE SET value = excluded.value",

    insert_account: "INSERT INTO account (account_name, account_email, account_password, \
                     account_type, account_created_at, account_updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
    account_by_email: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE AND a.account_email = ?"
    ),
    account_by_key: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a JOIN api_key k ON k.account_id = a.account_id \
         WHERE a.account_deleted = FALSE AND k.key_deleted = FALSE AND k.key_value = ?"
    ),
    account_by_id: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE AND a.account_id = ?"
    ),
    deleted_account_by_email: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = TRUE AND a.account_email = ? \
         ORDER BY a.account_id DESC LIMIT 1"
    ),
    list_accounts: concat!(
        "SELECT ",
        account_columns!(),
        " FROM account a WHERE a.account_deleted = FALSE ORDER BY a.account_id"
    ),
    delete_account: "UPDATE account SET account_deleted = TRUE, account_updated_at = ? \
                     WHERE account_deleted = FALSE AND account_id = ?",
    delete_account_keys: "UPDATE api_key SET key_deleted = TRUE, key_updated_at = ? \
                          WHERE key_deleted = FALSE AND account_id = ?",
    resurrect_account: "UPDATE account SET account_deleted = FALSE, account_updated_at = ? \
                        WHERE account_deleted = TRUE AND account_id = ?",
    update_account: "UPDATE account SET account_name = ?, account_type = ?, \
                     account_updated_at = ? \
                     WHERE account_deleted = FALSE AND account_email = ?",
    change_password: "UPDATE account SET account_password = ?, account_updated_at = ? \
                      WHERE account_deleted = FALSE AND account_email = ?",
    change_password_logout: "UPDATE account SET account_password = ?, account_token = '', \
                             account_refresh_token = '', account_updated_at = ? \
                             WHERE account_deleted = FALSE AND account_email = ?",
    change_email: "UPDATE account SET account_email = ?, account_token = '', \
                   account_refresh_token = '', account_updated_at = ? \
                   WHERE account_deleted = FALSE AND account_email = ?",
    // The counter increment comes last: MySQL evaluates assignments left to
    // right, and every other expression must see the old value.
    invalid_password: "UPDATE account SET \
                       account_locked = (account_locked OR account_wrong_pass + 1 >= ?), \
                       account_token = CASE WHEN account_wrong_pass + 1 >= ? \
                       THEN '' ELSE account_token END, \
                       account_refresh_token = CASE WHEN account_wrong_pass + 1 >= ? \
                       THEN '' ELSE account_refresh_token END, \
                       account_updated_at = ?, \
                       account_wrong_pass = account_wrong_pass + 1 \
                       WHERE account_deleted = FALSE AND account_id = ?",
    valid_password: "UPDATE account SET account_wrong_pass = 0, account_updated_at = ? \
                     WHERE account_deleted = FALSE AND account_locked = FALSE \
                     AND account_id = ?",
    unlock_account: "UPDATE account SET account_wrong_pass = 0, account_locked = FALSE, \
                     account_updated_at = ? \
                     WHERE account_deleted = FALSE AND account_locked = TRUE \
                     AND account_id = ?",
    update_tokens: "UPDATE account SET account_token = ?, account_refresh_token = ?, \
                    account_updated_at = ? \
                    WHERE account_deleted = FALSE AND account_id = ?",

    insert_key: "INSERT INTO api_key (account_id, key_name, key_value, key_type, reader_name, \
                 valid_until, key_created_at, key_updated_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    get_key: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.key_value = ?"
    ),
    keys_by_email: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k JOIN account a ON a.account_id = k.account_id \
         WHERE k.key_deleted = FALSE AND a.account_deleted = FALSE AND a.account_email = ? \
         ORDER BY k.reader_name"
    ),
    keys_by_account: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.account_id = ? \
         ORDER BY k.reader_name"
    ),
    sibling_keys: concat!(
        "SELECT ",
        key_columns!(),
        " FROM api_key k WHERE k.key_deleted = FALSE AND k.account_id = \
         (SELECT s.account_id FROM api_key s WHERE s.key_value = ?) \
         ORDER BY k.reader_name"
    ),
    update_key: "UPDATE api_key SET key_name = ?, key_type = ?, reader_name = ?, \
                 valid_until = ?, key_updated_at = ? \
                 WHERE key_deleted = FALSE AND key_value = ?",
    delete_key: "UPDATE api_key SET key_deleted = TRUE, key_updated_at = ? \
                 WHERE key_deleted = FALSE AND key_value = ?",
    key_and_account: concat!(
        "SELECT ",
        account_columns!(),
        ", k.key_name, k.key_value, k.key_type, k.reader_name, k.valid_until \
         FROM api_key k JOIN account a ON a.account_id = k.account_id \
         WHERE k.key_deleted = FALSE AND a.account_deleted = FALSE AND k.key_value = ?"
    ),

    insert_read: "INSERT INTO a_read (key_value, identifier, seconds, milliseconds, \
                  ident_type, read_type, antenna, reader, rssi, read_created_at) \
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                  ON CONFLICT (key_value, identifier, seconds, milliseconds, ident_type) \
                  DO NOTHING",
    get_reads: concat!(
        "SELECT ",
        read_columns!(),
        " FROM a_read r JOIN api_key k ON k.key_value = r.key_value \
         WHERE k.account_id = ? AND k.reader_name = ? AND r.seconds >= ? AND r.seconds <= ? \
         ORDER BY r.seconds, r.milliseconds, r.identifier"
    ),
    delete_reads_range: "DELETE FROM a_read WHERE seconds >= ? AND seconds <= ? \
                         AND key_value IN (SELECT key_value FROM api_key \
                         WHERE account_id = ? AND reader_name = ?)",
    delete_reads_before: "DELETE FROM a_read WHERE seconds <= ? \
                          AND key_value IN (SELECT key_value FROM api_key \
                          WHERE account_id = ? AND reader_name = ?)",
    delete_key_reads: "DELETE FROM a_read WHERE key_value = ?",
    delete_reader_reads: "DELETE FROM a_read WHERE key_value IN (SELECT key_value \
                          FROM api_key WHERE account_id = ? AND reader_name = ?)",

    insert_notification: "INSERT INTO notification (key_value, notification_type, \
                          notification_when, notification_created_at) \
                          VALUES (?, ?, ?, ?) \
                          ON CONFLICT (key_value, notification_when) DO NOTHING",
    latest_notification: "SELECT n.notification_id, n.notification_type, \
                          n.notification_when \
                          FROM notification n JOIN api_key k ON k.key_value = n.key_value \
                          WHERE k.account_id = ? AND k.reader_name = ? \
                          ORDER BY n.notification_when DESC, n.notification_id DESC LIMIT 1",
};

/// Generate `SchemaOps` and `Database` for a backend struct with `pool`
/// and `timeout` fields.
///
/// `$statements` names a [`Statements`] constant and `$catalog` a
/// `SchemaCatalog` static in the invoking module.
macro_rules! impl_sql_database {
    ($backend:ty, $driver:expr, $statements:ident, $catalog:ident) => {
        #[::async_trait::async_trait]
        impl $crate::storage::migrate::SchemaOps for $backend {
            async fn stored_version(&self) -> i64 {
                match $crate::storage::Database::get_setting(
                    self,
                    $crate::storage::migrate::VERSION_SETTING,
                )
                .await
                {
                    Ok(value) => $crate::storage::migrate::parse_version(value.as_deref()),
                    Err(e) => {
                        ::tracing::debug!(error = %e, "No readable schema version");
                        $crate::storage::migrate::NO_SCHEMA
                    }
                }
            }

            async fn apply(
                &self,
                statements: &[&str],
                version: i64,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("apply_schema", self.timeout, async {
                    let mut tx = self.pool.begin().await?;
                    for statement in statements {
                        ::sqlx::query(statement)
                            .execute(&mut *tx)
                            .await
                            .map_err(|e| DatabaseError::Migration(e.to_string()))?;
                    }
                    ::sqlx::query($statements.set_setting)
                        .bind($crate::storage::migrate::VERSION_SETTING)
                        .bind(version.to_string())
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }
        }

        #[::async_trait::async_trait]
        impl $crate::storage::Database for $backend {
            fn driver(&self) -> ::readvault_core::Driver {
                $driver
            }

            async fn ensure_schema(&self) -> Result<(), ::readvault_core::db::DatabaseError> {
                $crate::storage::migrate::ensure_schema(self, &$catalog).await
            }

            async fn schema_version(&self) -> i64 {
                $crate::storage::migrate::SchemaOps::stored_version(self).await
            }

            async fn get_setting(
                &self,
                name: &str,
            ) -> Result<Option<String>, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("get_setting", self.timeout, async {
                    let row: Option<(String,)> = ::sqlx::query_as($statements.get_setting)
                        .bind(name)
                        .fetch_optional(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(row.map(|(value,)| value))
                })
                .await
            }

            async fn set_setting(
                &self,
                name: &str,
                value: &str,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("set_setting", self.timeout, async {
                    ::sqlx::query($statements.set_setting)
                        .bind(name)
                        .bind(value)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            // -------------------------------------------------------------
            // Accounts
            // -------------------------------------------------------------

            async fn add_account(
                &self,
                account: $crate::storage::models::NewAccount,
            ) -> Result<$crate::storage::models::Account, ::readvault_core::db::DatabaseError>
            {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                $crate::storage::database::ensure_hashed(&account.password)?;
                with_timeout("add_account", self.timeout, async {
                    let now = unix_timestamp();
                    ::sqlx::query($statements.insert_account)
                        .bind(&account.name)
                        .bind(&account.email)
                        .bind(&account.password)
                        .bind(account.account_type.as_str())
                        .bind(now)
                        .bind(now)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                ::tracing::info!(email = %account.email, "Account created");
                $crate::storage::Database::get_account(
                    self,
                    $crate::storage::models::AccountLookup::Email(&account.email),
                )
                .await
            }

            async fn get_account(
                &self,
                lookup: $crate::storage::models::AccountLookup<'_>,
            ) -> Result<$crate::storage::models::Account, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Account, AccountLookup, AccountRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("get_account", self.timeout, async {
                    let query = match lookup {
                        AccountLookup::Email(email) => {
                            ::sqlx::query_as::<_, AccountRow>($statements.account_by_email)
                                .bind(email)
                        }
                        AccountLookup::Key(key) => {
                            ::sqlx::query_as::<_, AccountRow>($statements.account_by_key)
                                .bind(key)
                        }
                        AccountLookup::Id(id) => {
                            ::sqlx::query_as::<_, AccountRow>($statements.account_by_id).bind(id)
                        }
                    };
                    let row = query
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or_else(|| DatabaseError::NotFound(lookup.to_string()))?;
                    Account::try_from(row)
                })
                .await
            }

            async fn get_deleted_account(
                &self,
                email: &str,
            ) -> Result<$crate::storage::models::Account, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Account, AccountRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("get_deleted_account", self.timeout, async {
                    let row = ::sqlx::query_as::<_, AccountRow>($statements.deleted_account_by_email)
                        .bind(email)
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or_else(|| {
                            DatabaseError::NotFound(format!("Deleted account with email {email}"))
                        })?;
                    Account::try_from(row)
                })
                .await
            }

            async fn list_accounts(
                &self,
            ) -> Result<Vec<$crate::storage::models::Account>, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Account, AccountRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("list_accounts", self.timeout, async {
                    let rows = ::sqlx::query_as::<_, AccountRow>($statements.list_accounts)
                        .fetch_all(&self.pool)
                        .await?;
                    rows.into_iter()
                        .map(Account::try_from)
                        .collect::<Result<Vec<_>, DatabaseError>>()
                })
                .await
            }

            async fn delete_account(&self, id: i64) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("delete_account", self.timeout, async {
                    let now = unix_timestamp();
                    let mut tx = self.pool.begin().await?;
                    let result = ::sqlx::query($statements.delete_account)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DatabaseError::NotFound(format!("Account {id}")));
                    }
                    let keys = ::sqlx::query($statements.delete_account_keys)
                        .bind(now)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                    ::tracing::info!(account_id = id, keys = keys.rows_affected(), "Account deleted");
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn resurrect_account(
                &self,
                email: &str,
            ) -> Result<$crate::storage::models::Account, ::readvault_core::db::DatabaseError>
            {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                let deleted = $crate::storage::Database::get_deleted_account(self, email).await?;
                with_timeout("resurrect_account", self.timeout, async {
                    let result = ::sqlx::query($statements.resurrect_account)
                        .bind(unix_timestamp())
                        .bind(deleted.id)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "resurrect account")?;
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                ::tracing::info!(email = %email, "Account resurrected");
                $crate::storage::Database::get_account(
                    self,
                    $crate::storage::models::AccountLookup::Id(deleted.id),
                )
                .await
            }

            async fn update_account(
                &self,
                account: &$crate::storage::models::Account,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("update_account", self.timeout, async {
                    let result = ::sqlx::query($statements.update_account)
                        .bind(&account.name)
                        .bind(account.account_type.as_str())
                        .bind(unix_timestamp())
                        .bind(&account.email)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "update account")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn change_password(
                &self,
                email: &str,
                digest: &str,
                force_logout: bool,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                $crate::storage::database::ensure_hashed(digest)?;
                let statement = if force_logout {
                    $statements.change_password_logout
                } else {
                    $statements.change_password
                };
                with_timeout("change_password", self.timeout, async {
                    let result = ::sqlx::query(statement)
                        .bind(digest)
                        .bind(unix_timestamp())
                        .bind(email)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "change password")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn change_email(
                &self,
                old_email: &str,
                new_email: &str,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("change_email", self.timeout, async {
                    let result = ::sqlx::query($statements.change_email)
                        .bind(new_email)
                        .bind(unix_timestamp())
                        .bind(old_email)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "change email")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn record_invalid_password(
                &self,
                account: &$crate::storage::models::Account,
            ) -> Result<$crate::storage::models::Account, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::MAX_LOGIN_ATTEMPTS;
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("record_invalid_password", self.timeout, async {
                    let result = ::sqlx::query($statements.invalid_password)
                        .bind(MAX_LOGIN_ATTEMPTS)
                        .bind(MAX_LOGIN_ATTEMPTS)
                        .bind(MAX_LOGIN_ATTEMPTS)
                        .bind(unix_timestamp())
                        .bind(account.id)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(
                        result.rows_affected(),
                        "record invalid password",
                    )?;
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                let updated = $crate::storage::Database::get_account(
                    self,
                    $crate::storage::models::AccountLookup::Id(account.id),
                )
                .await?;
                if updated.locked && !account.locked {
                    ::tracing::warn!(email = %updated.email, "Account locked after failed logins");
                }
                Ok(updated)
            }

            async fn record_valid_password(
                &self,
                account: &$crate::storage::models::Account,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                let rows = with_timeout("record_valid_password", self.timeout, async {
                    let result = ::sqlx::query($statements.valid_password)
                        .bind(unix_timestamp())
                        .bind(account.id)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(result.rows_affected())
                })
                .await?;
                if rows > 0 {
                    return Ok(());
                }
                let current = $crate::storage::Database::get_account(
                    self,
                    $crate::storage::models::AccountLookup::Id(account.id),
                )
                .await?;
                if current.locked {
                    Err(DatabaseError::AccountLocked(current.email))
                } else {
                    $crate::storage::sql::require_row(rows, "record valid password")
                }
            }

            async fn unlock_account(
                &self,
                account: &$crate::storage::models::Account,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("unlock_account", self.timeout, async {
                    let result = ::sqlx::query($statements.unlock_account)
                        .bind(unix_timestamp())
                        .bind(account.id)
                        .execute(&self.pool)
                        .await?;
                    if result.rows_affected() == 0 {
                        return Err(DatabaseError::Validation(format!(
                            "Account {} is not locked",
                            account.email
                        )));
                    }
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                ::tracing::info!(email = %account.email, "Account unlocked");
                Ok(())
            }

            async fn update_tokens(
                &self,
                account: &$crate::storage::models::Account,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("update_tokens", self.timeout, async {
                    let result = ::sqlx::query($statements.update_tokens)
                        .bind(&account.token)
                        .bind(&account.refresh_token)
                        .bind(unix_timestamp())
                        .bind(account.id)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "update tokens")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            // -------------------------------------------------------------
            // Keys
            // -------------------------------------------------------------

            async fn add_key(
                &self,
                key: $crate::storage::models::Key,
            ) -> Result<$crate::storage::models::Key, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                // Owner must be an active account; the foreign key alone
                // accepts soft-deleted ones.
                $crate::storage::Database::get_account(
                    self,
                    $crate::storage::models::AccountLookup::Id(key.account_id),
                )
                .await?;
                with_timeout("add_key", self.timeout, async {
                    let now = unix_timestamp();
                    ::sqlx::query($statements.insert_key)
                        .bind(key.account_id)
                        .bind(&key.name)
                        .bind(&key.value)
                        .bind(key.scope.as_str())
                        .bind(&key.reader_name)
                        .bind(key.valid_until)
                        .bind(now)
                        .bind(now)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                ::tracing::info!(
                    account_id = key.account_id,
                    reader = %key.reader_name,
                    scope = %key.scope,
                    "Key created"
                );
                $crate::storage::Database::get_key(self, &key.value).await
            }

            async fn get_key(
                &self,
                value: &str,
            ) -> Result<$crate::storage::models::Key, ::readvault_core::db::DatabaseError> {
                use $crate::storage::models::{Key, KeyRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("get_key", self.timeout, async {
                    let row = ::sqlx::query_as::<_, KeyRow>($statements.get_key)
                        .bind(value)
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or_else(|| DatabaseError::NotFound("Key".to_string()))?;
                    Key::try_from(row)
                })
                .await
            }

            async fn list_account_keys(
                &self,
                owner: $crate::storage::models::KeyOwner<'_>,
            ) -> Result<Vec<$crate::storage::models::Key>, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Key, KeyOwner, KeyRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("list_account_keys", self.timeout, async {
                    let query = match owner {
                        KeyOwner::Email(email) => {
                            ::sqlx::query_as::<_, KeyRow>($statements.keys_by_email).bind(email)
                        }
                        KeyOwner::Id(id) => {
                            ::sqlx::query_as::<_, KeyRow>($statements.keys_by_account).bind(id)
                        }
                    };
                    let rows = query.fetch_all(&self.pool).await?;
                    rows.into_iter()
                        .map(Key::try_from)
                        .collect::<Result<Vec<_>, DatabaseError>>()
                })
                .await
            }

            async fn list_sibling_keys(
                &self,
                value: &str,
            ) -> Result<Vec<$crate::storage::models::Key>, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Key, KeyRow};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("list_sibling_keys", self.timeout, async {
                    let rows = ::sqlx::query_as::<_, KeyRow>($statements.sibling_keys)
                        .bind(value)
                        .fetch_all(&self.pool)
                        .await?;
                    rows.into_iter()
                        .map(Key::try_from)
                        .collect::<Result<Vec<_>, DatabaseError>>()
                })
                .await
            }

            async fn update_key(
                &self,
                key: &$crate::storage::models::Key,
            ) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("update_key", self.timeout, async {
                    let result = ::sqlx::query($statements.update_key)
                        .bind(&key.name)
                        .bind(key.scope.as_str())
                        .bind(&key.reader_name)
                        .bind(key.valid_until)
                        .bind(unix_timestamp())
                        .bind(&key.value)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "update key")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn delete_key(&self, value: &str) -> Result<(), ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("delete_key", self.timeout, async {
                    let result = ::sqlx::query($statements.delete_key)
                        .bind(unix_timestamp())
                        .bind(value)
                        .execute(&self.pool)
                        .await?;
                    $crate::storage::sql::require_row(result.rows_affected(), "delete key")?;
                    Ok::<_, DatabaseError>(())
                })
                .await
            }

            async fn get_key_and_account(
                &self,
                value: &str,
            ) -> Result<$crate::storage::models::KeyAndAccount, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{KeyAccountRow, KeyAndAccount};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("get_key_and_account", self.timeout, async {
                    let row = ::sqlx::query_as::<_, KeyAccountRow>($statements.key_and_account)
                        .bind(value)
                        .fetch_optional(&self.pool)
                        .await?
                        .ok_or_else(|| DatabaseError::NotFound("Key/Account".to_string()))?;
                    KeyAndAccount::try_from(row)
                })
                .await
            }

            // -------------------------------------------------------------
            // Reads
            // -------------------------------------------------------------

            async fn add_reads(
                &self,
                key: &str,
                reads: Vec<$crate::storage::models::Read>,
            ) -> Result<Vec<$crate::storage::models::Read>, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::Read;
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                if reads.is_empty() {
                    return Ok(reads);
                }
                with_timeout("add_reads", self.timeout, async {
                    let now = unix_timestamp();
                    let mut tx = self.pool.begin().await?;
                    for read in &reads {
                        ::sqlx::query($statements.insert_read)
                            .bind(key)
                            .bind(&read.identifier)
                            .bind(read.seconds)
                            .bind(read.milliseconds)
                            .bind(read.ident_type.as_str())
                            .bind(read.kind.as_str())
                            .bind(read.antenna)
                            .bind(&read.reader)
                            .bind(&read.rssi)
                            .bind(now)
                            .execute(&mut *tx)
                            .await?;
                    }
                    tx.commit().await?;
                    Ok::<_, DatabaseError>(())
                })
                .await?;
                ::tracing::debug!(count = reads.len(), "Reads stored");
                Ok(reads
                    .into_iter()
                    .map(|read| Read {
                        key: key.to_string(),
                        ..read
                    })
                    .collect())
            }

            async fn get_reads(
                &self,
                account_id: i64,
                reader_name: &str,
                from: i64,
                to: i64,
            ) -> Result<Vec<$crate::storage::models::Read>, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::{Read, ReadRow, DEFAULT_READ_WINDOW_SECS};
                use ::readvault_core::db::{with_timeout, DatabaseError};

                let to = if to < from {
                    from.saturating_add(DEFAULT_READ_WINDOW_SECS)
                } else {
                    to
                };
                with_timeout("get_reads", self.timeout, async {
                    let rows = ::sqlx::query_as::<_, ReadRow>($statements.get_reads)
                        .bind(account_id)
                        .bind(reader_name)
                        .bind(from)
                        .bind(to)
                        .fetch_all(&self.pool)
                        .await?;
                    rows.into_iter()
                        .map(Read::try_from)
                        .collect::<Result<Vec<_>, DatabaseError>>()
                })
                .await
            }

            async fn delete_reads(
                &self,
                account_id: i64,
                reader_name: &str,
                from: i64,
                to: i64,
            ) -> Result<u64, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                if to < from {
                    return Err(DatabaseError::InvalidRange { from, to });
                }
                with_timeout("delete_reads", self.timeout, async {
                    let result = ::sqlx::query($statements.delete_reads_range)
                        .bind(from)
                        .bind(to)
                        .bind(account_id)
                        .bind(reader_name)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(result.rows_affected())
                })
                .await
            }

            async fn delete_reads_before(
                &self,
                account_id: i64,
                reader_name: &str,
                before: i64,
            ) -> Result<u64, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("delete_reads_before", self.timeout, async {
                    let result = ::sqlx::query($statements.delete_reads_before)
                        .bind(before)
                        .bind(account_id)
                        .bind(reader_name)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(result.rows_affected())
                })
                .await
            }

            async fn delete_key_reads(&self, key: &str) -> Result<u64, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("delete_key_reads", self.timeout, async {
                    let result = ::sqlx::query($statements.delete_key_reads)
                        .bind(key)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(result.rows_affected())
                })
                .await
            }

            async fn delete_reader_reads(
                &self,
                account_id: i64,
                reader_name: &str,
            ) -> Result<u64, ::readvault_core::db::DatabaseError> {
                use ::readvault_core::db::{with_timeout, DatabaseError};

                with_timeout("delete_reader_reads", self.timeout, async {
                    let result = ::sqlx::query($statements.delete_reader_reads)
                        .bind(account_id)
                        .bind(reader_name)
                        .execute(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(result.rows_affected())
                })
                .await
            }

            // -------------------------------------------------------------
            // Notifications
            // -------------------------------------------------------------

            async fn save_notification(
                &self,
                kind: $crate::storage::models::NotificationType,
                when: i64,
                key: &str,
            ) -> Result<$crate::storage::models::SaveOutcome, ::readvault_core::db::DatabaseError>
            {
                use $crate::storage::models::SaveOutcome;
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                with_timeout("save_notification", self.timeout, async {
                    let result = ::sqlx::query($statements.insert_notification)
                        .bind(key)
                        .bind(kind.as_str())
                        .bind(when)
                        .bind(unix_timestamp())
                        .execute(&self.pool)
                        .await
                        .map_err(DatabaseError::from);
                    match result {
                        Ok(done) if done.rows_affected() == 0 => Ok(SaveOutcome::Duplicate),
                        Ok(_) => Ok(SaveOutcome::Inserted),
                        Err(DatabaseError::Conflict(_)) => Ok(SaveOutcome::Duplicate),
                        Err(e) => Err(e),
                    }
                })
                .await
            }

            async fn get_notification(
                &self,
                account_id: i64,
                reader_name: &str,
            ) -> Result<
                Option<$crate::storage::models::Notification>,
                ::readvault_core::db::DatabaseError,
            > {
                use $crate::storage::models::{
                    Notification, NotificationRow, NOTIFICATION_FRESHNESS_SECS,
                };
                use ::readvault_core::db::{unix_timestamp, with_timeout, DatabaseError};

                let row = with_timeout("get_notification", self.timeout, async {
                    let row = ::sqlx::query_as::<_, NotificationRow>($statements.latest_notification)
                        .bind(account_id)
                        .bind(reader_name)
                        .fetch_optional(&self.pool)
                        .await?;
                    Ok::<_, DatabaseError>(row)
                })
                .await?;
                let cutoff = unix_timestamp() - NOTIFICATION_FRESHNESS_SECS;
                match row {
                    Some(row) if row.notification_when > cutoff => {
                        Notification::try_from(row).map(Some)
                    }
                    _ => Ok(None),
                }
            }

            async fn close(&self) {
                self.pool.close().await;
            }
        }
    };
}

pub(crate) use impl_sql_database;

/// Promote a zero-row update to an error.
pub(crate) fn require_row(
    rows: u64,
    op: &str,
) -> Result<(), readvault_core::db::DatabaseError> {
    if rows == 0 {
        Err(readvault_core::db::DatabaseError::Validation(format!(
            "{op} matched no active row"
        )))
    } else {
        Ok(())
    }
}
