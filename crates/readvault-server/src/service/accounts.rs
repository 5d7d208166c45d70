//! Password login and session tokens for account holders.

use std::sync::Arc;

use readvault_core::config::AdminConfig;
use readvault_core::db::DatabaseError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::api::{ApiError, STATUS_INTERNAL};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::{AuthError, JwtManager};
use crate::storage::{Account, AccountLookup, AccountType, Database, NewAccount};

/// Token pair handed out on login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<dyn Database>,
    jwt: Arc<JwtManager>,
}

impl AccountService {
    pub fn new(db: Arc<dyn Database>, jwt: Arc<JwtManager>) -> Self {
        Self { db, jwt }
    }

    /// Hash `password` and create the account.
    #[instrument(skip(self, password))]
    pub async fn create_account(
        &self,
        name: &str,
        email: &str,
        password: &str,
        account_type: AccountType,
    ) -> Result<Account, ApiError> {
        let digest = hash_password(password)?;
        let account = self
            .db
            .add_account(NewAccount {
                name: name.to_string(),
                email: email.to_string(),
                password: digest,
                account_type,
            })
            .await?;
        Ok(account)
    }

    /// Check the password and start a session.
    ///
    /// A wrong password counts toward the lock; a locked account cannot log
    /// in even with the right one.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        let mut account = self
            .db
            .get_account(AccountLookup::Email(email))
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => AuthError::InvalidCredentials,
                other => AuthError::Database(other),
            })?;
        if account.locked {
            return Err(AuthError::Locked.into());
        }

        if !verify_password(password, &account.password)? {
            let updated = self.db.record_invalid_password(&account).await?;
            warn!(attempts = updated.wrong_pass_attempts, "Invalid password");
            let err = if updated.locked {
                AuthError::Locked
            } else {
                AuthError::InvalidCredentials
            };
            return Err(err.into());
        }

        self.db
            .record_valid_password(&account)
            .await
            .map_err(|e| match e {
                DatabaseError::AccountLocked(_) => AuthError::Locked,
                other => AuthError::Database(other),
            })?;

        let session = self.start_session(&mut account).await?;
        info!(account_id = account.id, "Login successful");
        Ok(session)
    }

    /// Exchange a refresh token for a new pair. The presented token must be
    /// the one stored on the account.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, ApiError> {
        let claims = self
            .jwt
            .validate(refresh_token)
            .map_err(|_| AuthError::InvalidToken)?;
        if !claims.is_refresh() {
            return Err(AuthError::InvalidToken.into());
        }
        let mut account = self.account_for(claims.account_id()).await?;
        if account.refresh_token != refresh_token {
            return Err(AuthError::InvalidToken.into());
        }
        if account.locked {
            return Err(AuthError::Locked.into());
        }
        self.start_session(&mut account).await
    }

    /// Clear both tokens.
    #[instrument(skip(self))]
    pub async fn logout(&self, email: &str) -> Result<(), ApiError> {
        let mut account = self.db.get_account(AccountLookup::Email(email)).await?;
        account.token.clear();
        account.refresh_token.clear();
        self.db.update_tokens(&account).await?;
        info!(account_id = account.id, "Logged out");
        Ok(())
    }

    /// Resolve an access token to its account.
    #[instrument(skip_all)]
    pub async fn validate_access(&self, access_token: &str) -> Result<Account, ApiError> {
        let claims = self
            .jwt
            .validate(access_token)
            .map_err(|_| AuthError::InvalidToken)?;
        if !claims.is_access() {
            return Err(AuthError::InvalidToken.into());
        }
        let account = self.account_for(claims.account_id()).await?;
        if account.token != access_token {
            return Err(AuthError::InvalidToken.into());
        }
        if account.locked {
            return Err(AuthError::Locked.into());
        }
        Ok(account)
    }

    /// Replace the password, optionally ending every session.
    #[instrument(skip(self, password))]
    pub async fn change_password(
        &self,
        email: &str,
        password: &str,
        force_logout: bool,
    ) -> Result<(), ApiError> {
        let digest = hash_password(password)?;
        self.db.change_password(email, &digest, force_logout).await?;
        Ok(())
    }

    async fn account_for(&self, id: Option<i64>) -> Result<Account, ApiError> {
        let id = id.ok_or(AuthError::InvalidToken)?;
        self.db
            .get_account(AccountLookup::Id(id))
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound(_) => ApiError::from(AuthError::InvalidToken),
                other => ApiError::from(other),
            })
    }

    async fn start_session(&self, account: &mut Account) -> Result<Session, ApiError> {
        let (access_token, expires_in) = self
            .jwt
            .issue_access_token(account.id, &account.email)
            .map_err(|e| ApiError::new(STATUS_INTERNAL, e.to_string()))?;
        let (refresh_token, _) = self
            .jwt
            .issue_refresh_token(account.id, &account.email)
            .map_err(|e| ApiError::new(STATUS_INTERNAL, e.to_string()))?;

        account.token.clone_from(&access_token);
        account.refresh_token.clone_from(&refresh_token);
        self.db.update_tokens(account).await?;

        Ok(Session {
            access_token,
            refresh_token,
            expires_in,
        })
    }
}

/// Apply the schema and make sure at least one account exists.
///
/// With no accounts at all, an admin is created from `admin`; missing
/// credentials there are a configuration error.
#[instrument(skip_all)]
pub async fn bootstrap(db: &dyn Database, admin: &AdminConfig) -> Result<(), DatabaseError> {
    db.ensure_schema().await?;
    if !db.list_accounts().await?.is_empty() {
        return Ok(());
    }

    let (Some(name), Some(email), Some(password)) = (&admin.name, &admin.email, &admin.password)
    else {
        return Err(DatabaseError::Configuration(
            "no accounts exist and admin name, email or password is not configured".to_string(),
        ));
    };
    let digest = hash_password(password)
        .map_err(|e| DatabaseError::Configuration(format!("cannot hash admin password: {e}")))?;
    db.add_account(NewAccount {
        name: name.clone(),
        email: email.clone(),
        password: digest,
        account_type: AccountType::Admin,
    })
    .await?;
    info!(email = %email, "Admin account created");
    Ok(())
}
