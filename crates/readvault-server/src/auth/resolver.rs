//! Bearer key resolution for data-plane calls.

use std::sync::Arc;

use readvault_core::db::DatabaseError;
use tracing::{debug, instrument};

use super::AuthError;
use super::bearer::parse_bearer;
use crate::storage::{Database, KeyAndAccount, Scope};

/// What a data-plane call is about to do with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read reads, notifications or reader names. Any scope.
    Query,
    /// Upload reads or notifications. `write` or `delete`.
    Ingest,
    /// Remove reads. `delete` only.
    Delete,
}

impl Access {
    pub const fn permits(self, scope: Scope) -> bool {
        match self {
            Self::Query => true,
            Self::Ingest => matches!(scope, Scope::Write | Scope::Delete),
            Self::Delete => matches!(scope, Scope::Delete),
        }
    }
}

/// Resolves bearer headers to a live key and its account.
#[derive(Clone)]
pub struct Authorizer {
    db: Arc<dyn Database>,
}

impl Authorizer {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Parse `header`, load the key and account, then check expiry and
    /// scope. The header is checked before any storage call.
    #[instrument(skip_all, fields(access = ?access))]
    pub async fn authorize(
        &self,
        header: Option<&str>,
        access: Access,
    ) -> Result<KeyAndAccount, AuthError> {
        let value = parse_bearer(header.ok_or(AuthError::MissingHeader)?)?;

        let resolved = self
            .db
            .get_key_and_account(value)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => AuthError::NotFound,
                other => AuthError::Database(other),
            })?;

        if resolved.key.is_expired() {
            debug!(reader = %resolved.key.reader_name, "Rejected expired key");
            return Err(AuthError::Expired);
        }
        if !access.permits(resolved.key.scope) {
            debug!(
                reader = %resolved.key.reader_name,
                scope = %resolved.key.scope,
                "Rejected key without required scope"
            );
            return Err(AuthError::Scope);
        }
        Ok(resolved)
    }
}
