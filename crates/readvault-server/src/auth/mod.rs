//! Authentication for `ReadVault`.
//!
//! Provides password hashing, JWT session tokens for account holders, and
//! bearer key resolution for devices.

pub mod bearer;
pub mod claims;
pub mod jwt;
pub mod password;
pub mod resolver;

use readvault_core::db::DatabaseError;

pub use claims::Claims;
pub use jwt::JwtManager;
pub use resolver::{Access, Authorizer};

/// Credential failures. All of them are reported to callers as
/// unauthorized; the message tells them apart.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,

    #[error("Malformed Authorization header")]
    MalformedHeader,

    #[error("Key/Account Not Found")]
    NotFound,

    #[error("Expired Key")]
    Expired,

    #[error("Unauthorized")]
    Scope,

    #[error("Account Locked")]
    Locked,

    #[error("Invalid Credentials")]
    InvalidCredentials,

    #[error("Invalid Token")]
    InvalidToken,

    #[error(transparent)]
    Database(DatabaseError),
}
