//! Command-line argument parsing for the ember session server.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, TransportKind};

/// Ember server command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "ember-server", about = "Ember session server")]
pub struct CliArgs {
    /// Host address to join (stream transport only).
    #[arg(long)]
    pub server: Option<String>,

    /// Port to bind, or of the host to join.
    #[arg(long)]
    pub port: Option<u16>,

    /// Session variant.
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Host a session instead of joining one (stream transport only).
    #[arg(long)]
    pub host: bool,

    /// Connection slot limit.
    #[arg(long)]
    pub max_connections: Option<u8>,

    /// Session updates per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(transport) = args.transport {
            self.network.transport = transport;
        }
        if let Some(max) = args.max_connections {
            self.network.max_connections = max;
        }
        if let Some(rate) = args.tick_rate {
            self.network.tick_rate_hz = rate;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            transport: Some(TransportKind::Tcp),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.network.transport, TransportKind::Tcp);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 7777);
        assert_eq!(config.network.max_connections, 8);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "ember-server",
            "--transport",
            "tcp",
            "--host",
            "--port",
            "9100",
            "--tick-rate",
            "30",
        ]);
        assert_eq!(args.transport, Some(TransportKind::Tcp));
        assert!(args.host);
        assert_eq!(args.port, Some(9100));
        assert_eq!(args.tick_rate, Some(30));
        assert!(args.server.is_none());
    }
}
