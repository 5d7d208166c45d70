//! `ReadVault` Server Library
//!
//! Core functionality for the `ReadVault` store:
//! - SQL storage (SQLite, PostgreSQL, MySQL) for accounts, keys, reads and
//!   notifications, with a versioned schema migration runner
//! - Password hashing, JWT session tokens and bearer-key authorization
//! - Transport-agnostic account, key and data-plane services

pub mod auth;
pub mod service;
pub mod storage;
