//! JWT claims for account sessions.

use serde::{Deserialize, Serialize};

/// Claims embedded in access and refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (account ID).
    pub sub: String,
    pub email: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Token type: "access" or "refresh".
    pub token_type: String,
}

impl Claims {
    pub fn is_access(&self) -> bool {
        self.token_type == "access"
    }

    pub fn is_refresh(&self) -> bool {
        self.token_type == "refresh"
    }

    /// Account ID carried in `sub`.
    pub fn account_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}
