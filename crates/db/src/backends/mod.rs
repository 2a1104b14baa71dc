//! Database Backend Abstractions
//!
//! The traits in `core` are the only surface the migration engine touches;
//! `postgres` provides the production implementation.

pub mod core;
pub mod postgres;

pub use self::core::*;
pub use self::postgres::{PostgresBackend, PostgresPool};
