//! Request and response shapes for the data plane, and the error every
//! service call reports.

use readvault_core::db::DatabaseError;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::AuthError;
use crate::auth::password::PasswordError;
use crate::storage::{Notification, Read, RequestNotification, RequestRead};

pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_CONFLICT: u16 = 409;
pub const STATUS_INTERNAL: u16 = 500;

/// Failure of a service call, carrying an HTTP-compatible status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status} {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(STATUS_BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(STATUS_UNAUTHORIZED, message)
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Validation(_) | DatabaseError::InvalidRange { .. } => {
                Self::bad_request(e.to_string())
            }
            DatabaseError::NotFound(_) => Self::new(STATUS_NOT_FOUND, e.to_string()),
            DatabaseError::Conflict(_) => Self::new(STATUS_CONFLICT, e.to_string()),
            DatabaseError::AccountLocked(_) => Self::unauthorized("Account Locked"),
            other => {
                error!(error = %other, "Storage failure");
                Self::new(STATUS_INTERNAL, other.to_string())
            }
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        error!(error = %e, "Password hashing failure");
        Self::new(STATUS_INTERNAL, e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Database(db) => db.into(),
            other => Self::unauthorized(other.to_string()),
        }
    }
}

// =========================================================================
// Reads
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReadsRequest {
    #[serde(rename = "reader")]
    pub reader_name: String,
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReadsResponse {
    pub count: usize,
    pub reads: Vec<Read>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReadsRequest {
    pub reads: Vec<RequestRead>,
}

/// Rows submitted or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReadsRequest {
    #[serde(rename = "reader")]
    pub reader_name: String,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub end: Option<i64>,
}

// =========================================================================
// Notifications
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveNotificationRequest {
    pub notification: RequestNotification,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNotificationRequest {
    #[serde(rename = "reader")]
    pub reader_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetNotificationResponse {
    #[serde(rename = "reader")]
    pub reader_name: String,
    pub notification: Notification,
}

// =========================================================================
// Readers
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reader {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetReadersResponse {
    pub readers: Vec<Reader>,
}
