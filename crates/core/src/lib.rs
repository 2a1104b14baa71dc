//! # stockroom-core
//!
//! Configuration, logging and error types shared by the stockroom crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AppConfigTrait, ConfigError, ConfigSource, MigrateConfig, DEFAULT_LOCK_KEY,
    DEFAULT_MIGRATIONS_TABLE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, LoggingConfig};
