//! Transport-agnostic services.
//!
//! Each call returns the response shape or an [`ApiError`] whose status an
//! HTTP layer can send unchanged.

pub mod accounts;
pub mod api;
pub mod keys;
pub mod reads;


pub use accounts::{AccountService, Session, bootstrap};
pub use api::ApiError;
pub use keys::{KeyRequest, KeyService};
pub use reads::ReadService;
