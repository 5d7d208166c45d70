//! SQL storage for `ReadVault`.
//!
//! Provides persistence for accounts, keys, reads and notifications on
//! `SQLite`, `PostgreSQL` or `MySQL`, plus the versioned schema migration
//! shared by all three.

pub mod database;
pub mod migrate;
mod models;
mod mysql;
mod postgres;
mod sql;
mod sqlite;

#[cfg(test)]
mod tests;

pub use database::{Database, open_database};
pub use models::*;
pub use mysql::MySqlDatabase;
pub use postgres::PostgresDatabase;
pub use readvault_core::db::DatabaseError;
pub use sqlite::SqliteDatabase;
