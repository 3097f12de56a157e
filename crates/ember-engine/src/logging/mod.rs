//! Logging setup.
//!
//! Everything logs through the `log` facade; this module only installs the
//! `env_logger` backend once per process.

mod init;

pub use init::{Logging, LoggingConfig};
