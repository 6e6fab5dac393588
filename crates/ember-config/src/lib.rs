//! Configuration for the ember session server.
//!
//! Settings persist to disk as RON and can be overridden from the command
//! line. Unknown fields are ignored and missing ones take their defaults, so
//! old and new config files both load.

mod cli;
mod config;
mod error;
mod paths;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, TransportKind};
pub use error::ConfigError;
pub use paths::AppDirs;
