//! `ReadVault` Core Library
//!
//! Shared functionality for `ReadVault` components:
//! - Storage error taxonomy, pool helpers and the bounded storage-call guard
//! - Configuration resolution and hierarchy
//! - Tracing initialisation

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::{Config, Driver};
pub use error::{Error, Result};
