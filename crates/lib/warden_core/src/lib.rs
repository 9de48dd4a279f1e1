//! # warden_core
//!
//! Core domain logic for Warden: credential verification, session token
//! rotation and the single-use verification/reset token workflows.

pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod mail;
pub mod migrate;
pub mod models;
pub mod reaper;
pub mod store;
pub mod users;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
