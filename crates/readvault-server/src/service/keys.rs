//! Key management for account holders.

use std::sync::Arc;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::api::ApiError;
use crate::storage::{AccountLookup, Database, Key, KeyOwner, Scope};

/// Fields an account holder supplies for a new or updated key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub scope: String,
    #[serde(rename = "reader")]
    pub reader_name: String,
    /// RFC 3339 timestamp; empty or absent never expires.
    #[serde(default)]
    pub valid_until: Option<String>,
}

/// Parse an optional RFC 3339 expiration into Unix seconds.
pub fn parse_expiration(value: Option<&str>) -> Result<Option<i64>, ApiError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|when| Some(when.timestamp()))
            .map_err(|_| ApiError::bad_request(format!("{text} is not a valid date"))),
    }
}

#[derive(Clone)]
pub struct KeyService {
    db: Arc<dyn Database>,
}

impl KeyService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Create a key for the account with `email`, generating its value.
    #[instrument(skip(self, request), fields(reader = %request.reader_name))]
    pub async fn add_key(&self, email: &str, request: &KeyRequest) -> Result<Key, ApiError> {
        let account = self.db.get_account(AccountLookup::Email(email)).await?;
        let key = Key {
            account_id: account.id,
            name: request.name.clone(),
            value: uuid::Uuid::new_v4().to_string(),
            reader_name: request.reader_name.clone(),
            scope: request.scope.parse::<Scope>()?,
            valid_until: parse_expiration(request.valid_until.as_deref())?,
        };
        Ok(self.db.add_key(key).await?)
    }

    pub async fn list_keys(&self, email: &str) -> Result<Vec<Key>, ApiError> {
        Ok(self.db.list_account_keys(KeyOwner::Email(email)).await?)
    }

    /// Overwrite name, scope, reader and expiration of an existing key.
    #[instrument(skip_all, fields(reader = %request.reader_name))]
    pub async fn update_key(&self, value: &str, request: &KeyRequest) -> Result<Key, ApiError> {
        let mut key = self.db.get_key(value).await?;
        key.name.clone_from(&request.name);
        key.scope = request.scope.parse()?;
        key.reader_name.clone_from(&request.reader_name);
        key.valid_until = parse_expiration(request.valid_until.as_deref())?;
        self.db.update_key(&key).await?;
        Ok(key)
    }

    /// Soft-delete a key, optionally purging the reads uploaded with it.
    /// Returns the number of reads purged.
    #[instrument(skip(self, value))]
    pub async fn delete_key(&self, value: &str, purge_reads: bool) -> Result<u64, ApiError> {
        self.db.delete_key(value).await?;
        let purged = if purge_reads {
            self.db.delete_key_reads(value).await?
        } else {
            0
        };
        info!(purged, "Key deleted");
        Ok(purged)
    }
}
