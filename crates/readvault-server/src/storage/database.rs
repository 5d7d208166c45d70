//! The backend-neutral storage interface.
//!
//! One implementation exists per SQL dialect. The process selects one at
//! start-up with [`open_database`] and hands the resulting
//! `Arc<dyn Database>` to every service that needs storage.

use std::sync::Arc;

use async_trait::async_trait;
use readvault_core::db::DatabaseError;
use readvault_core::{Config, Driver};
use tracing::info;

use super::models::{
    Account, AccountLookup, Key, KeyAndAccount, KeyOwner, NewAccount, Notification,
    NotificationType, Read, SaveOutcome,
};
use super::mysql::MySqlDatabase;
use super::postgres::PostgresDatabase;
use super::sqlite::SqliteDatabase;

/// Storage operations shared by every backend.
#[async_trait]
pub trait Database: Send + Sync {
    fn driver(&self) -> Driver;

    // ---------------------------------------------------------------------
    // Schema and settings
    // ---------------------------------------------------------------------

    /// Create or upgrade the schema to the latest version.
    async fn ensure_schema(&self) -> Result<(), DatabaseError>;

    /// Stored schema version, or `-1` when no usable version is recorded.
    async fn schema_version(&self) -> i64;

    async fn get_setting(&self, name: &str) -> Result<Option<String>, DatabaseError>;

    /// Insert or overwrite a setting.
    async fn set_setting(&self, name: &str, value: &str) -> Result<(), DatabaseError>;

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Create an account. The password must already be a digest.
    async fn add_account(&self, account: NewAccount) -> Result<Account, DatabaseError>;

    async fn get_account(&self, lookup: AccountLookup<'_>) -> Result<Account, DatabaseError>;

    /// Most recently deleted account with this email.
    async fn get_deleted_account(&self, email: &str) -> Result<Account, DatabaseError>;

    /// All non-deleted accounts.
    async fn list_accounts(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Soft-delete an account and every key it owns, atomically.
    async fn delete_account(&self, id: i64) -> Result<(), DatabaseError>;

    /// Undo the soft delete of the most recently deleted account with `email`.
    async fn resurrect_account(&self, email: &str) -> Result<Account, DatabaseError>;

    /// Persist `name` and `account_type` for the account identified by email.
    async fn update_account(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn change_password(
        &self,
        email: &str,
        digest: &str,
        force_logout: bool,
    ) -> Result<(), DatabaseError>;

    /// Change the login email. Always clears both tokens.
    async fn change_email(&self, old_email: &str, new_email: &str) -> Result<(), DatabaseError>;

    /// Count a failed login, locking the account when the limit is hit.
    /// Returns the account as it is after the update.
    async fn record_invalid_password(&self, account: &Account) -> Result<Account, DatabaseError>;

    /// Reset the failed-login counter. Fails with `AccountLocked` when the
    /// account is locked.
    async fn record_valid_password(&self, account: &Account) -> Result<(), DatabaseError>;

    async fn unlock_account(&self, account: &Account) -> Result<(), DatabaseError>;

    /// Persist the account's access and refresh tokens.
    async fn update_tokens(&self, account: &Account) -> Result<(), DatabaseError>;

    // ---------------------------------------------------------------------
    // Keys
    // ---------------------------------------------------------------------

    async fn add_key(&self, key: Key) -> Result<Key, DatabaseError>;

    async fn get_key(&self, value: &str) -> Result<Key, DatabaseError>;

    async fn list_account_keys(&self, owner: KeyOwner<'_>) -> Result<Vec<Key>, DatabaseError>;

    /// Non-deleted keys belonging to the same account as `value`.
    async fn list_sibling_keys(&self, value: &str) -> Result<Vec<Key>, DatabaseError>;

    async fn update_key(&self, key: &Key) -> Result<(), DatabaseError>;

    async fn delete_key(&self, value: &str) -> Result<(), DatabaseError>;

    /// Resolve a bearer value to its non-deleted key and account.
    async fn get_key_and_account(&self, value: &str) -> Result<KeyAndAccount, DatabaseError>;

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Insert reads under `key` in one transaction, ignoring duplicates.
    /// Returns the submitted reads.
    async fn add_reads(&self, key: &str, reads: Vec<Read>) -> Result<Vec<Read>, DatabaseError>;

    /// Reads for a reader with `from <= seconds <= to`. When `to < from`
    /// the window becomes `[from, from + 360]`.
    async fn get_reads(
        &self,
        account_id: i64,
        reader_name: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<Read>, DatabaseError>;

    /// Delete reads with `from <= seconds <= to`. Rejects `to < from`.
    async fn delete_reads(
        &self,
        account_id: i64,
        reader_name: &str,
        from: i64,
        to: i64,
    ) -> Result<u64, DatabaseError>;

    /// Delete reads with `seconds <= before`.
    async fn delete_reads_before(
        &self,
        account_id: i64,
        reader_name: &str,
        before: i64,
    ) -> Result<u64, DatabaseError>;

    async fn delete_key_reads(&self, key: &str) -> Result<u64, DatabaseError>;

    /// Delete reads for every key, current or retired, of this reader.
    async fn delete_reader_reads(
        &self,
        account_id: i64,
        reader_name: &str,
    ) -> Result<u64, DatabaseError>;

    // ---------------------------------------------------------------------
    // Notifications
    // ---------------------------------------------------------------------

    async fn save_notification(
        &self,
        kind: NotificationType,
        when: i64,
        key: &str,
    ) -> Result<SaveOutcome, DatabaseError>;

    /// Latest notification for the reader, if it is younger than five
    /// minutes.
    async fn get_notification(
        &self,
        account_id: i64,
        reader_name: &str,
    ) -> Result<Option<Notification>, DatabaseError>;

    async fn close(&self);
}

/// Connect the backend named by configuration.
pub async fn open_database(config: &Config) -> Result<Arc<dyn Database>, DatabaseError> {
    let driver = config
        .database
        .driver()
        .map_err(|e| DatabaseError::Configuration(e.to_string()))?;

    let db: Arc<dyn Database> = match driver {
        Driver::Sqlite => {
            let path = config
                .database
                .sqlite_path()
                .map_err(|e| DatabaseError::Configuration(e.to_string()))?;
            Arc::new(SqliteDatabase::open(&path, &config.database).await?)
        }
        Driver::Postgres => Arc::new(PostgresDatabase::connect(&config.database).await?),
        Driver::Mysql => Arc::new(MySqlDatabase::connect(&config.database).await?),
    };

    info!(driver = %driver, "Storage backend selected");
    Ok(db)
}

/// Refuse anything that is not a password digest.
pub(crate) fn ensure_hashed(digest: &str) -> Result<(), DatabaseError> {
    if crate::auth::password::digest_looks_hashed(digest) {
        Ok(())
    } else {
        Err(DatabaseError::Validation(
            "password must be hashed before it is stored".to_string(),
        ))
    }
}
