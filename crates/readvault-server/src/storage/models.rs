//! Data models for `ReadVault` storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use readvault_core::db::{DatabaseError, unix_timestamp};
use serde::{Deserialize, Serialize};

/// Consecutive wrong passwords that lock an account.
pub const MAX_LOGIN_ATTEMPTS: i32 = 4;

/// Window applied by `get_reads` when the caller's end precedes its start.
pub const DEFAULT_READ_WINDOW_SECS: i64 = 360;

/// How recent a notification must be for `get_notification` to return it.
pub const NOTIFICATION_FRESHNESS_SECS: i64 = 300;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored
/// as text.
macro_rules! text_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DatabaseError::Validation(format!(
                        "{other} is not a valid {}",
                        $what
                    ))),
                }
            }
        }
    };
}

// =========================================================================
// Accounts
// =========================================================================

/// Role of an account holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Free,
    Paid,
    Admin,
}

text_enum!(AccountType, "account type", {
    Free => "free",
    Paid => "paid",
    Admin => "admin",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub email: String,
    /// Password digest (PHC string), never plaintext.
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(skip)]
    pub wrong_pass_attempts: i32,
    pub locked: bool,
    #[serde(skip)]
    pub token: String,
    #[serde(skip)]
    pub refresh_token: String,
}

/// Fields required to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    /// Must already be a password digest.
    pub password: String,
    pub account_type: AccountType,
}

/// Ways to identify a single non-deleted account.
#[derive(Debug, Clone, Copy)]
pub enum AccountLookup<'a> {
    Email(&'a str),
    Key(&'a str),
    Id(i64),
}

impl fmt::Display for AccountLookup<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email(email) => write!(f, "Account with email {email}"),
            Self::Key(_) => f.write_str("Account for key"),
            Self::Id(id) => write!(f, "Account {id}"),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AccountRow {
    pub account_id: i64,
    pub account_name: String,
    pub account_email: String,
    pub account_password: String,
    pub account_type: String,
    pub account_wrong_pass: i32,
    pub account_locked: bool,
    pub account_token: String,
    pub account_refresh_token: String,
}

impl TryFrom<AccountRow> for Account {
    type Error = DatabaseError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.account_id,
            name: row.account_name,
            email: row.account_email,
            password: row.account_password,
            account_type: row.account_type.parse()?,
            wrong_pass_attempts: row.account_wrong_pass,
            locked: row.account_locked,
            token: row.account_token,
            refresh_token: row.account_refresh_token,
        })
    }
}

// =========================================================================
// Keys
// =========================================================================

/// The single capability a key grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Read,
    Write,
    Delete,
}

text_enum!(Scope, "key scope", {
    Read => "read",
    Write => "write",
    Delete => "delete",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub account_id: i64,
    pub name: String,
    /// The bearer credential itself.
    pub value: String,
    #[serde(rename = "reader")]
    pub reader_name: String,
    #[serde(rename = "type")]
    pub scope: Scope,
    /// Unix seconds; `None` never expires.
    pub valid_until: Option<i64>,
}

impl Key {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_timestamp())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.valid_until.is_some_and(|until| until <= now)
    }
}

/// Identifies the account whose keys are listed.
#[derive(Debug, Clone, Copy)]
pub enum KeyOwner<'a> {
    Email(&'a str),
    Id(i64),
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct KeyRow {
    pub account_id: i64,
    pub key_name: String,
    pub key_value: String,
    pub key_type: String,
    pub reader_name: String,
    pub valid_until: Option<i64>,
}

impl TryFrom<KeyRow> for Key {
    type Error = DatabaseError;

    fn try_from(row: KeyRow) -> Result<Self, Self::Error> {
        Ok(Self {
            account_id: row.account_id,
            name: row.key_name,
            value: row.key_value,
            reader_name: row.reader_name,
            scope: row.key_type.parse()?,
            valid_until: row.valid_until,
        })
    }
}

/// Result of resolving a bearer value: the key and its owning account.
#[derive(Debug, Clone)]
pub struct KeyAndAccount {
    pub key: Key,
    pub account: Account,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct KeyAccountRow {
    #[sqlx(flatten)]
    pub account: AccountRow,
    pub key_name: String,
    pub key_value: String,
    pub key_type: String,
    pub reader_name: String,
    pub valid_until: Option<i64>,
}

impl TryFrom<KeyAccountRow> for KeyAndAccount {
    type Error = DatabaseError;

    fn try_from(row: KeyAccountRow) -> Result<Self, Self::Error> {
        let account = Account::try_from(row.account)?;
        let key = Key {
            account_id: account.id,
            name: row.key_name,
            value: row.key_value,
            reader_name: row.reader_name,
            scope: row.key_type.parse()?,
            valid_until: row.valid_until,
        };
        Ok(Self { key, account })
    }
}

// =========================================================================
// Reads
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentType {
    Chip,
    Bib,
}

text_enum!(IdentType, "identifier type", {
    Chip => "chip",
    Bib => "bib",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadKind {
    Reader,
    Manual,
}

text_enum!(ReadKind, "read type", {
    Reader => "reader",
    Manual => "manual",
});

/// One timestamped chip or bib observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Read {
    /// Key value the read was uploaded under. Never serialized: it is a
    /// bearer credential.
    #[serde(skip)]
    pub key: String,
    pub identifier: String,
    pub seconds: i64,
    pub milliseconds: i32,
    pub ident_type: IdentType,
    #[serde(rename = "type")]
    pub kind: ReadKind,
    pub antenna: Option<i32>,
    pub reader: String,
    pub rssi: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ReadRow {
    pub key_value: String,
    pub identifier: String,
    pub seconds: i64,
    pub milliseconds: i32,
    pub ident_type: String,
    pub read_type: String,
    pub antenna: Option<i32>,
    pub reader: String,
    pub rssi: String,
}

impl TryFrom<ReadRow> for Read {
    type Error = DatabaseError;

    fn try_from(row: ReadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.key_value,
            identifier: row.identifier,
            seconds: row.seconds,
            milliseconds: row.milliseconds,
            ident_type: row.ident_type.parse()?,
            kind: row.read_type.parse()?,
            antenna: row.antenna,
            reader: row.reader,
            rssi: row.rssi,
        })
    }
}

/// A read as submitted by a device, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestRead {
    pub identifier: String,
    pub seconds: i64,
    #[serde(default)]
    pub milliseconds: i32,
    pub ident_type: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub antenna: Option<i32>,
    #[serde(default)]
    pub reader: String,
    #[serde(default)]
    pub rssi: String,
}

impl RequestRead {
    /// Check field shapes and convert into a storable `Read`.
    pub fn validate(&self) -> Result<Read, DatabaseError> {
        if self.identifier.trim().is_empty() {
            return Err(DatabaseError::Validation("identifier is required".into()));
        }
        if self.identifier.len() > 100 || self.reader.len() > 50 || self.rssi.len() > 10 {
            return Err(DatabaseError::Validation("read field too long".into()));
        }
        if self.seconds < 0 {
            return Err(DatabaseError::Validation(format!(
                "{} is not a valid seconds value",
                self.seconds
            )));
        }
        if !(0..1000).contains(&self.milliseconds) {
            return Err(DatabaseError::Validation(format!(
                "{} is not a valid milliseconds value",
                self.milliseconds
            )));
        }
        Ok(Read {
            key: String::new(),
            identifier: self.identifier.clone(),
            seconds: self.seconds,
            milliseconds: self.milliseconds,
            ident_type: self.ident_type.parse()?,
            kind: self.kind.parse()?,
            antenna: self.antenna,
            reader: self.reader.clone(),
            rssi: self.rssi.clone(),
        })
    }
}

// =========================================================================
// Notifications
// =========================================================================

/// Device-health events a reader can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    UpsDisconnected,
    UpsConnected,
    UpsOnBattery,
    UpsLowBattery,
    UpsOnline,
    ShuttingDown,
    Restarting,
    HighTemp,
    MaxTemp,
}

text_enum!(NotificationType, "notification type", {
    UpsDisconnected => "UPS_DISCONNECTED",
    UpsConnected => "UPS_CONNECTED",
    UpsOnBattery => "UPS_ON_BATTERY",
    UpsLowBattery => "UPS_LOW_BATTERY",
    UpsOnline => "UPS_ONLINE",
    ShuttingDown => "SHUTTING_DOWN",
    Restarting => "RESTARTING",
    HighTemp => "HIGH_TEMP",
    MaxTemp => "MAX_TEMP",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub when: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct NotificationRow {
    pub notification_id: i64,
    pub notification_type: String,
    pub notification_when: i64,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = DatabaseError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let when = DateTime::from_timestamp(row.notification_when, 0).ok_or_else(|| {
            DatabaseError::Validation(format!("{} is out of range", row.notification_when))
        })?;
        Ok(Self {
            id: row.notification_id,
            kind: row.notification_type.parse()?,
            when,
        })
    }
}

/// A notification as submitted by a device, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestNotification {
    #[serde(rename = "type")]
    pub kind: String,
    /// RFC 3339 timestamp.
    pub when: String,
}

impl RequestNotification {
    /// Parse the type and timestamp, returning the timestamp in Unix seconds.
    pub fn validate(&self) -> Result<(NotificationType, i64), DatabaseError> {
        let kind = self.kind.parse()?;
        let when = DateTime::parse_from_rfc3339(&self.when)
            .map_err(|_| DatabaseError::Validation(format!("{} is not a valid date", self.when)))?;
        Ok((kind, when.timestamp()))
    }
}

/// Whether `save_notification` stored a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    /// A notification with the same key and timestamp already exists.
    Duplicate,
}
