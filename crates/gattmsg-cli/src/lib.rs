//! GattMsg CLI library
//!
//! Argument parsing, layered configuration and the command handlers behind
//! the `gattmsg` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod printer;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
