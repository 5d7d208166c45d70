//! JWT token issuance and validation.

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use readvault_core::config::AuthConfig;
use readvault_core::db::unix_timestamp;

use super::claims::Claims;

/// Manages JWT token creation and validation.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
}

impl JwtManager {
    /// Create a new `JwtManager` with the given secret.
    pub fn new(secret: &[u8], access_ttl_secs: i64, refresh_ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    pub fn from_config(cfg: &AuthConfig) -> Self {
        Self::new(
            cfg.jwt_secret.as_bytes(),
            cfg.access_ttl_secs,
            cfg.refresh_ttl_secs,
        )
    }

    /// Issue an access token. Returns the token and its lifetime in seconds.
    pub fn issue_access_token(
        &self,
        account_id: i64,
        email: &str,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let (token, _) = self.issue(account_id, email, "access", self.access_ttl_secs)?;
        Ok((token, self.access_ttl_secs))
    }

    /// Issue a refresh token. Returns the token and its expiry timestamp.
    pub fn issue_refresh_token(
        &self,
        account_id: i64,
        email: &str,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        self.issue(account_id, email, "refresh", self.refresh_ttl_secs)
    }

    fn issue(
        &self,
        account_id: i64,
        email: &str,
        token_type: &str,
        ttl_secs: i64,
    ) -> Result<(String, i64), jsonwebtoken::errors::Error> {
        let now = unix_timestamp();
        let exp = now + ttl_secs;
        let claims = Claims {
            jti: uuid::Uuid::new_v4().to_string(),
            sub: account_id.to_string(),
            email: email.to_string(),
            iat: now,
            exp,
            token_type: token_type.to_string(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, exp))
    }

    /// Validate a token and return its claims.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data =
            jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}
