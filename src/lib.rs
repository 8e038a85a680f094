//! SSRF canary: library crate.
//!
//! Issues unguessable URL tokens and records every request that dereferences
//! one. Re-exports modules needed by integration tests in `tests/`.

pub mod api;
pub mod capture;
pub mod config;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod server;
pub mod store;
