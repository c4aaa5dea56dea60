//! Rollcall CLI library
//!
//! Command-line front end for the presence engine: advertise the attendance
//! beacon, find the classroom receiver, check in, and inspect the radio.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::{Cli, Commands};
pub use commands::CommandDispatcher;
pub use config::AppConfig;
pub use error::{CliError, Result};
